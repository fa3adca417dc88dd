//! # Event subscribers.
//!
//! Subscribers observe runtime [`Event`](crate::Event)s without ever blocking
//! the reconciler or the consumption workers.
//!
//! ## Architecture
//! ```text
//! Reconciler / Workers ── publish ──► Bus ──► bus listener ──► AliveTracker::update()
//!                                                   └────────► SubscriberSet::emit()
//!                                                                 ├──► LogWriter
//!                                                                 └──► custom ...
//! ```
//!
//! ## Contents
//! - [`Subscribe`] the trait to implement
//! - [`SubscriberSet`] per-subscriber queues, workers and panic isolation
//! - [`LogWriter`] `tracing` adapter (feature `logging`, installed by default)

#[cfg(feature = "logging")]
mod log;
mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
