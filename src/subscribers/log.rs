//! # LogWriter: events to `tracing` records.
//!
//! Maps every [`EventKind`] to one structured `tracing` record. The binary
//! decides where records go by installing a `tracing` subscriber.
//!
//! ## Levels
//! - `warn`: connect/discovery/subscription/pull failures, released messages,
//!   grace exceeded, subscriber overflow/panic, listener lag
//! - `info`: topics added/removed, pass completed, stop lifecycle
//! - `debug`: pass started, worker started/stopped

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that forwards events to `tracing`.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let topic = e.topic.as_deref().unwrap_or("-");
        let subscription = e.subscription.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::PassStarted => debug!(version = ?e.version, "reconciliation pass started"),
            EventKind::PassCompleted => {
                let p = e.pass.unwrap_or_default();
                info!(
                    version = ?e.version,
                    added = p.added,
                    retained = p.retained,
                    removed = p.removed,
                    failed = p.failed,
                    "reconciliation pass completed"
                );
            }
            EventKind::ConnectFailed => {
                warn!(version = ?e.version, reason, "broker connect failed; pass skipped")
            }
            EventKind::DiscoveryFailed => {
                warn!(version = ?e.version, reason, "topic discovery failed; pass skipped")
            }
            EventKind::TopicAdded => info!(topic, subscription, worker = ?e.worker, "topic added"),
            EventKind::TopicRemoved => {
                info!(topic, subscription, worker = ?e.worker, exit = reason, "topic removed")
            }
            EventKind::SubscriptionReused => {
                info!(topic, subscription, "subscription already exists; reusing it")
            }
            EventKind::SubscriptionFailed => {
                warn!(topic, subscription, reason, "subscription setup failed; retrying next pass")
            }
            EventKind::SubscriptionDeleteFailed => {
                warn!(topic, subscription, reason, "subscription delete failed")
            }
            EventKind::WorkerStarted => debug!(topic, worker = ?e.worker, "worker started"),
            EventKind::WorkerStopped => {
                debug!(topic, worker = ?e.worker, exit = reason, "worker stopped")
            }
            EventKind::PullFailed => warn!(
                topic,
                subscription,
                attempt = ?e.attempt,
                delay_ms = ?e.delay_ms,
                reason,
                "pull failed; backing off"
            ),
            EventKind::MessageReleased => {
                warn!(topic, subscription, reason, "in-flight message nacked on teardown")
            }
            EventKind::StopRequested => info!(reason, "stop requested"),
            EventKind::AllStoppedWithin => info!("all workers stopped within grace"),
            EventKind::GraceExceeded => warn!(reason, "grace exceeded; workers aborted"),
            EventKind::SubscriberOverflow => warn!(subscriber = topic, reason, "subscriber overflow"),
            EventKind::SubscriberPanicked => {
                warn!(subscriber = topic, reason, "subscriber panicked")
            }
            EventKind::EventsLagged => {
                warn!(reason, "event listener lagged; liveness counts may be stale")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PassSummary;

    #[tokio::test]
    async fn every_kind_is_logged() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .try_init();

        let writer = LogWriter::new();
        let kinds = [
            EventKind::PassStarted,
            EventKind::PassCompleted,
            EventKind::ConnectFailed,
            EventKind::DiscoveryFailed,
            EventKind::TopicAdded,
            EventKind::TopicRemoved,
            EventKind::SubscriptionReused,
            EventKind::SubscriptionFailed,
            EventKind::SubscriptionDeleteFailed,
            EventKind::WorkerStarted,
            EventKind::WorkerStopped,
            EventKind::PullFailed,
            EventKind::MessageReleased,
            EventKind::StopRequested,
            EventKind::AllStoppedWithin,
            EventKind::GraceExceeded,
            EventKind::SubscriberOverflow,
            EventKind::SubscriberPanicked,
            EventKind::EventsLagged,
        ];
        for kind in kinds {
            let ev = Event::new(kind)
                .with_topic("projects/p/topics/t")
                .with_version(1)
                .with_pass(PassSummary::default());
            writer.on_event(&ev).await;
        }
    }
}
