//! # Event subscriber trait.
//!
//! Provides [`Subscribe`], the extension point for plugging custom event
//! handlers into an aggregator.
//!
//! Each subscriber gets:
//! - **Dedicated worker task** (runs independently)
//! - **Per-subscriber bounded queue** (capacity via [`Subscribe::queue_capacity`])
//! - **Panic isolation** (panics are caught and reported as `EventKind::SubscriberPanicked`)
//!
//! ## Architecture
//! ```text
//! SubscriberSet ──► [bounded queue] ──► worker task ──► subscriber.on_event()
//!                                    └─► panic caught → EventKind::SubscriberPanicked
//! ```
//!
//! ## Rules
//! - A slow subscriber only affects its own queue.
//! - Queue overflow drops the event **for this subscriber only** and publishes
//!   `EventKind::SubscriberOverflow`.
//! - Events are processed sequentially (FIFO) per subscriber.
//! - Subscribers never block the reconciler, the workers, or each other.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use topicvisor::{Event, EventKind, Subscribe};
//!
//! struct Churn;
//!
//! #[async_trait]
//! impl Subscribe for Churn {
//!     async fn on_event(&self, ev: &Event) {
//!         if matches!(ev.kind, EventKind::TopicAdded | EventKind::TopicRemoved) {
//!             // export a metric, etc.
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "churn" }
//!     fn queue_capacity(&self) -> usize { 2048 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for runtime observability.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally; do not panic.
/// - Slow processing affects only this subscriber's queue.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event.
    ///
    /// Called from a dedicated worker task, not in the publisher context.
    async fn on_event(&self, event: &Event);

    /// Returns the subscriber name used in overflow/panic events.
    ///
    /// The default uses `type_name::<Self>()`, which can be verbose; override it when possible.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the preferred queue capacity for this subscriber (clamped to at least 1).
    ///
    /// Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
