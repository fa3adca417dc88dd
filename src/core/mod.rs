//! Runtime core: discovery, reconciliation, workers and lifecycle.
//!
//! The public entry point is [`Aggregator`].
//!
//! Internal modules:
//! - [`discovery`]: lists the project's topics and applies the [`TopicFilter`];
//! - [`registry`]: atomically swapped snapshots of active topic leases;
//! - [`reconciler`]: the periodic pass (diff, onboard, mark-and-sweep, publish);
//! - [`worker`]: one pull loop per topic with a start signal and cancellation;
//! - [`output`]: the fan-in [`MessageStream`];
//! - [`alive`]: live worker tracking fed by the event bus;
//! - [`aggregator`], [`builder`]: wiring, start/stop/refresh.

mod aggregator;
mod alive;
mod builder;
mod config;
mod discovery;
mod output;
mod reconciler;
mod registry;
mod worker;

pub use aggregator::Aggregator;
pub use alive::AliveTracker;
pub use builder::AggregatorBuilder;
pub use config::AggregatorConfig;
pub use discovery::{TopicFilter, discover};
pub use output::MessageStream;
pub use reconciler::PassReport;
pub use registry::{Entry, RegistrySnapshot, TopicLease, Version};
