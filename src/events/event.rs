//! # Runtime events emitted by the reconciler, workers and the aggregator.
//!
//! The [`EventKind`] enum classifies event types across five categories:
//! - **Pass events**: one reconciliation pass (started, connect/discovery failures, completed)
//! - **Topic events**: onboarding and teardown of individual topics
//! - **Worker events**: consumption worker lifecycle and pull failures
//! - **Shutdown events**: stop requested, all stopped within grace, grace exceeded
//! - **Delivery events**: subscriber overflow/panic and bus lag
//!
//! The [`Event`] struct carries additional metadata such as timestamps, topic,
//! subscription, pass version, reasons, and backoff delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use topicvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::PullFailed)
//!     .with_topic("projects/p/topics/orders-a")
//!     .with_reason("connection reset")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_millis(400));
//!
//! assert_eq!(ev.kind, EventKind::PullFailed);
//! assert_eq!(ev.topic.as_deref(), Some("projects/p/topics/orders-a"));
//! assert_eq!(ev.delay_ms, Some(400));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `topic`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `topic`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    /// The bus listener fell behind and skipped events. Liveness counts may be
    /// stale until the affected workers stop and start again.
    ///
    /// Sets:
    /// - `reason`: `skipped=<n>`
    EventsLagged,

    // === Pass events ===
    /// A reconciliation pass began.
    ///
    /// Sets:
    /// - `version`: pass version
    PassStarted,

    /// The broker client could not be built; the pass was skipped.
    ///
    /// Sets:
    /// - `version`: pass version
    /// - `reason`: broker error
    ConnectFailed,

    /// Topic listing failed; the pass was skipped and the previous snapshot kept.
    ///
    /// Sets:
    /// - `version`: pass version
    /// - `reason`: broker error
    DiscoveryFailed,

    /// The pass published a new registry snapshot.
    ///
    /// Sets:
    /// - `version`: pass version
    /// - `pass`: per-pass counters
    PassCompleted,

    // === Topic events ===
    /// A newly matching topic got a subscription and a started worker.
    ///
    /// Sets:
    /// - `topic`, `subscription`, `version`, `worker`
    TopicAdded,

    /// A topic vanished (or stopped matching) and its lease was torn down.
    ///
    /// Sets:
    /// - `topic`, `subscription`, `version`, `worker`
    TopicRemoved,

    /// Subscription creation hit a conflict and the existing one was reused.
    ///
    /// Sets:
    /// - `topic`, `subscription`
    /// - `reason`: the conflict error
    SubscriptionReused,

    /// The topic could not be onboarded this pass (will be retried next pass).
    ///
    /// Sets:
    /// - `topic`, `subscription`, `version`
    /// - `reason`: broker error
    SubscriptionFailed,

    /// Best-effort subscription deletion failed; the broker-side subscription may be orphaned.
    ///
    /// Sets:
    /// - `topic`, `subscription`
    /// - `reason`: broker error
    SubscriptionDeleteFailed,

    // === Worker events ===
    /// Worker received its start signal and entered the pull loop.
    ///
    /// Sets:
    /// - `topic`, `subscription`, `worker`
    WorkerStarted,

    /// Worker exited.
    ///
    /// Sets:
    /// - `topic`, `subscription`, `worker`
    /// - `reason`: exit reason (`cancelled`, `output_closed`, `never_started`)
    WorkerStopped,

    /// A pull failed; the worker retries after a delay.
    ///
    /// Sets:
    /// - `topic`, `subscription`, `worker`
    /// - `attempt`: consecutive failures so far (1-based)
    /// - `delay_ms`: delay before the next pull
    /// - `reason`: broker error
    PullFailed,

    /// An already-pulled message could not be handed over before teardown and was nacked.
    ///
    /// Sets:
    /// - `topic`, `subscription`, `worker`
    /// - `reason`: why (`drain_timeout`, `output_closed`)
    MessageReleased,

    // === Shutdown events ===
    /// Stop requested by the owner.
    ///
    /// Sets:
    /// - `reason`: `delete_subscriptions=true|false`
    StopRequested,

    /// All workers stopped within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some workers were aborted.
    GraceExceeded,
}

/// Counters attached to [`EventKind::PassCompleted`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub added: u32,
    pub retained: u32,
    pub removed: u32,
    pub failed: u32,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Topic name (or subscriber name for subscriber events).
    pub topic: Option<Arc<str>>,
    /// Subscription name, if applicable.
    pub subscription: Option<Arc<str>>,
    /// Reconciliation pass version, if applicable.
    pub version: Option<u64>,
    /// Worker id, if applicable.
    pub worker: Option<u64>,
    /// Attempt / consecutive failure count (starting from 1).
    pub attempt: Option<u32>,
    /// Delay before the next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, exit reasons, overflow details).
    pub reason: Option<Arc<str>>,
    /// Pass counters (only for `PassCompleted`).
    pub pass: Option<PassSummary>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            topic: None,
            subscription: None,
            version: None,
            worker: None,
            attempt: None,
            delay_ms: None,
            reason: None,
            pass: None,
        }
    }

    /// Attaches a topic name.
    #[inline]
    pub fn with_topic(mut self, topic: impl Into<Arc<str>>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Attaches a subscription name.
    #[inline]
    pub fn with_subscription(mut self, subscription: impl Into<Arc<str>>) -> Self {
        self.subscription = Some(subscription.into());
        self
    }

    /// Attaches a pass version.
    #[inline]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Attaches a worker id.
    #[inline]
    pub fn with_worker(mut self, worker: u64) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches pass counters.
    #[inline]
    pub fn with_pass(mut self, summary: PassSummary) -> Self {
        self.pass = Some(summary);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_topic(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_topic(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::new(EventKind::PassStarted);
        let b = Event::new(EventKind::PassCompleted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_is_clamped_to_u32_millis() {
        let ev = Event::new(EventKind::PullFailed).with_delay(Duration::from_secs(u64::MAX / 2));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
