//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by the aggregator, reconciler,
//! consumption workers and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`], [`PassSummary`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Aggregator`, `Reconciler`, `ConsumptionWorker`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the aggregator's bus listener (updates `AliveTracker`, then
//!   fans out to `SubscriberSet`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind, PassSummary};
