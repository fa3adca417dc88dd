//! # Topic discovery.
//!
//! [`discover`] walks the broker's full topic listing and keeps the names the
//! [`TopicFilter`] accepts, preserving listing order.
//!
//! ## Rules
//! - The listing is consumed to exhaustion; pages are fetched lazily by the stream.
//! - The first `Err` item aborts discovery and is returned as is; the caller never
//!   sees a partial list.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::TryStreamExt;

use crate::broker::{Broker, TopicName};
use crate::error::BrokerError;

type Predicate = dyn Fn(&TopicName) -> bool + Send + Sync;

/// Predicate selecting the topics to aggregate.
///
/// The predicate sees the topic name exactly as the broker lists it (usually
/// fully qualified); use [`TopicName::short_name`] for the bare id.
///
/// ```
/// use topicvisor::{TopicFilter, TopicName};
///
/// let f = TopicFilter::prefix("orders-");
/// assert!(f.matches(&TopicName::qualified("p", "orders-a")));
/// assert!(!f.matches(&TopicName::qualified("p", "billing")));
/// ```
#[derive(Clone)]
pub struct TopicFilter {
    predicate: Arc<Predicate>,
    label: Arc<str>,
}

impl TopicFilter {
    /// Wraps an arbitrary predicate.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&TopicName) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(f),
            label: "custom".into(),
        }
    }

    /// Accepts every topic.
    pub fn all() -> Self {
        Self {
            predicate: Arc::new(|_| true),
            label: "all".into(),
        }
    }

    /// Accepts topics whose short name starts with `prefix`.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let label = format!("prefix({prefix})");
        Self {
            predicate: Arc::new(move |t: &TopicName| t.short_name().starts_with(&prefix)),
            label: label.into(),
        }
    }

    /// Accepts exactly the given short names.
    pub fn exact<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: HashSet<String> = ids.into_iter().map(Into::into).collect();
        let label = format!("exact({})", ids.len());
        Self {
            predicate: Arc::new(move |t: &TopicName| ids.contains(t.short_name())),
            label: label.into(),
        }
    }

    #[inline]
    pub fn matches(&self, topic: &TopicName) -> bool {
        (self.predicate)(topic)
    }
}

impl fmt::Debug for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TopicFilter").field(&self.label).finish()
    }
}

impl Default for TopicFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Returns every listed topic accepted by `filter`, in listing order.
pub async fn discover<B>(broker: &B, filter: &TopicFilter) -> Result<Vec<TopicName>, BrokerError>
where
    B: Broker + ?Sized,
{
    let mut listing = broker.list_topics();
    let mut topics = Vec::new();
    while let Some(topic) = listing.try_next().await? {
        if filter.matches(&topic) {
            topics.push(topic);
        }
    }
    Ok(topics)
}
