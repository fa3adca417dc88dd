//! Broker surface: the capabilities the aggregator calls into.
//!
//! ## Contents
//! - [`Broker`], [`Connector`] capability traits (async, object-safe)
//! - [`TopicName`], [`SubscriptionName`], [`Subscription`] identifiers and handles
//! - [`Message`], [`Acknowledge`] delivered payloads and their ack capability
//! - [`MemoryBroker`] in-memory implementation of both traits
//!
//! Concrete cloud clients live outside this crate; they only need to implement
//! [`Connector`] and [`Broker`].

mod client;
mod memory;
mod message;
mod names;

pub use client::{Broker, BrokerRef, Connector, StaticConnector, TopicStream};
pub use memory::MemoryBroker;
pub use message::{Acknowledge, Message};
pub use names::{Subscription, SubscriptionName, TopicName};
