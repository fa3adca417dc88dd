//! # topicvisor
//!
//! **Topicvisor** multiplexes a dynamic set of pub/sub topics into one message
//! stream.
//!
//! It periodically discovers the topics of a project, keeps exactly one
//! subscription and one consumption worker per matching topic, tears down
//! topics that vanish, and fans every worker's messages into a single
//! [`MessageStream`].
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                        ┌──────────────────────────────┐
//!   Connector ──connect──► Reconciler (single writer)   │ every refresh_interval
//!                        │  discover ─► diff ─► sweep   │ or Aggregator::refresh()
//!                        └──┬──────────────┬────────────┘
//!                 onboard   │              │ publish (one atomic swap)
//!                           ▼              ▼
//!     ┌──────────────────────────┐   ┌───────────────────────────────┐
//!     │ ConsumptionWorker per    │   │ Registry: ArcSwap<Snapshot>   │
//!     │ topic (idle ─► pulling)  │   │  topic → {subscription,       │
//!     └────┬─────────┬───────────┘   │           worker, version}    │
//!          │ Message │ Message       └───────────────────────────────┘
//!          ▼         ▼
//!     ┌───────────────────────┐
//!     │ bounded mpsc (fan-in) │ ──► MessageStream (one consumer)
//!     └───────────────────────┘
//!
//!   Reconciler / Workers / Aggregator ── Event ──► Bus ──► bus listener
//!                                                           ├─► AliveTracker
//!                                                           └─► SubscriberSet ─► LogWriter, ...
//! ```
//!
//! ### Topic lifecycle
//! ```text
//! discovered & untracked ─► create subscription (AlreadyExists ─► get) ─► spawn idle worker
//!                        ─► start signal ─► tracked with version v
//! discovered & tracked   ─► version := v (same subscription handle, same worker)
//! tracked, not in pass v ─► cancel ─► join (grace) ─► delete subscription? ─► untracked
//! ```
//!
//! ## Features
//! | Area              | Description                                                | Key types / traits                         |
//! |-------------------|------------------------------------------------------------|--------------------------------------------|
//! | **Runtime**       | Start, stop, on-demand passes, introspection.              | [`Aggregator`], [`AggregatorBuilder`]      |
//! | **Broker**        | Capability traits and an in-memory backend.                | [`Broker`], [`Connector`], [`MemoryBroker`]|
//! | **Discovery**     | Which topics to aggregate.                                 | [`TopicFilter`], [`discover`]              |
//! | **Registry**      | Immutable snapshots of active topics.                      | [`RegistrySnapshot`], [`TopicLease`]       |
//! | **Subscriber API**| Hook into runtime events (logging, metrics, alerts).      | [`Subscribe`], [`Event`], [`EventKind`]    |
//! | **Policies**      | Pull retry delays.                                         | [`BackoffPolicy`], [`JitterPolicy`]        |
//! | **Errors**        | Typed broker and runtime errors.                           | [`BrokerError`], [`RuntimeError`]          |
//!
//! ## Optional features
//! - `logging` (default): [`LogWriter`] forwards every event to `tracing`; the
//!   builder installs it automatically.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use topicvisor::{Aggregator, AggregatorConfig, MemoryBroker, TopicFilter};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = MemoryBroker::new("shop");
//!     broker.create_topic("orders-a");
//!     broker.create_topic("billing");
//!
//!     let cfg = AggregatorConfig::new("shop")
//!         .with_filter(TopicFilter::prefix("orders-"))
//!         .with_refresh_interval(Duration::from_secs(30));
//!     let agg = Aggregator::builder(cfg, Arc::new(broker.clone())).build();
//!
//!     let mut messages = agg.start().await?;
//!     agg.refresh().await?;
//!
//!     broker.publish("orders-a", "order #1")?;
//!     if let Some(msg) = messages.recv().await {
//!         assert_eq!(msg.topic().short_name(), "orders-a");
//!         msg.ack();
//!     }
//!
//!     agg.stop(true).await?;
//!     assert!(messages.recv().await.is_none());
//!     Ok(())
//! }
//! ```
mod broker;
mod core;
mod error;
mod events;
mod policies;
mod subscribers;

// ---- Public re-exports ----

pub use broker::{
    Acknowledge, Broker, BrokerRef, Connector, MemoryBroker, Message, StaticConnector,
    Subscription, SubscriptionName, TopicName, TopicStream,
};
pub use crate::core::{
    Aggregator, AggregatorBuilder, AggregatorConfig, AliveTracker, Entry, MessageStream,
    PassReport, RegistrySnapshot, TopicFilter, TopicLease, Version, discover,
};
pub use error::{BrokerError, RuntimeError};
pub use events::{Bus, Event, EventKind, PassSummary};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use subscribers::{Subscribe, SubscriberSet};

// Built-in `tracing` subscriber.
// Enabled by default; opt out with `default-features = false`.
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
