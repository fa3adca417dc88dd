//! # Broker capability traits.
//!
//! The aggregator never talks to a concrete pub/sub service. It calls into two
//! traits:
//! - [`Connector`] builds a [`Broker`] client for a project (once per reconciliation pass);
//! - [`Broker`] lists topics, manages subscriptions and pulls messages.
//!
//! ## Contract
//! - `list_topics` is lazy and may be paginated; an `Err` item aborts discovery.
//! - `create_subscription` must report a name clash as [`BrokerError::AlreadyExists`]
//!   so the caller can fall back to [`Broker::get_subscription`].
//! - `pull` resolves with the next message; it may wait indefinitely. Callers
//!   race it against cancellation, so implementations must be cancel-safe
//!   (dropping the future must not lose a message).
//! - No timeouts are imposed by the aggregator beyond what the client enforces.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::broker::message::Message;
use crate::broker::names::{Subscription, SubscriptionName, TopicName};
use crate::error::BrokerError;

/// Lazy sequence of topic names, possibly spanning several pages.
pub type TopicStream = BoxStream<'static, Result<TopicName, BrokerError>>;

/// Shared broker client handle.
pub type BrokerRef = Arc<dyn Broker>;

/// Client for one project of a pub/sub service.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Lists every topic of the project.
    fn list_topics(&self) -> TopicStream;

    /// Creates a subscription `name` on `topic`.
    async fn create_subscription(
        &self,
        topic: &TopicName,
        name: &SubscriptionName,
        ack_deadline: Duration,
    ) -> Result<Subscription, BrokerError>;

    /// Looks up an existing subscription.
    async fn get_subscription(&self, name: &SubscriptionName) -> Result<Subscription, BrokerError>;

    /// Deletes a subscription.
    async fn delete_subscription(&self, subscription: &Subscription) -> Result<(), BrokerError>;

    /// Waits for the next message of `subscription`.
    async fn pull(&self, subscription: &Subscription) -> Result<Message, BrokerError>;
}

/// Builds broker clients.
///
/// Called at the start of every reconciliation pass; a failure skips that pass only.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, project: &str) -> Result<BrokerRef, BrokerError>;
}

/// Connector that hands out one pre-built client regardless of project.
#[derive(Clone)]
pub struct StaticConnector {
    broker: BrokerRef,
}

impl StaticConnector {
    pub fn new(broker: BrokerRef) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn connect(&self, _project: &str) -> Result<BrokerRef, BrokerError> {
        Ok(Arc::clone(&self.broker))
    }
}
