//! # Non-blocking event fan-out to multiple subscribers.
//!
//! [`SubscriberSet`] gives every subscriber its own bounded lane and delivery
//! task, so the bus listener hands events over without ever waiting on a
//! subscriber.
//!
//! ## Architecture
//! ```text
//! emit(event) ─► Arc<Event>
//!     ├──► lane 1 (bounded) ──► deliver task ──► on_event() ── panic ─► SubscriberPanicked
//!     ├──► lane 2 (bounded) ──► deliver task ──► on_event()
//!     └──► lane N ── full/closed ─► SubscriberOverflow (event skipped for lane N only)
//! ```
//!
//! ## Rules
//! - Per-subscriber FIFO; no ordering across subscribers.
//! - Overflow of an overflow or lag event is not reported again.
//! - [`shutdown`](SubscriberSet::shutdown) closes the lanes and waits until every
//!   queued event is delivered. Dropping the set instead aborts delivery.
//!
//! **Warning**: `AssertUnwindSafe` is used, which can leave shared state inconsistent
//! if a subscriber panics while holding a lock.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;

use crate::events::{Bus, Event, EventKind};
use crate::subscribers::Subscribe;

struct Lane {
    name: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
}

/// Fan-out coordinator for event subscribers.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    tasks: JoinSet<()>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one delivery task per subscriber.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut tasks = JoinSet::new();
        let lanes = subs
            .into_iter()
            .map(|sub| {
                let (tx, rx) = mpsc::channel(sub.queue_capacity().max(1));
                let name = sub.name();
                tasks.spawn(deliver(sub, rx, bus.clone()));
                Lane { name, tx }
            })
            .collect();
        Self { lanes, tasks, bus }
    }

    /// Queues `ev` on every lane without waiting.
    pub fn emit(&self, ev: Event) {
        let quiet = matches!(
            ev.kind,
            EventKind::SubscriberOverflow | EventKind::EventsLagged
        );
        let ev = Arc::new(ev);

        for lane in &self.lanes {
            let reason = match lane.tx.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => "full",
                Err(TrySendError::Closed(_)) => "closed",
            };
            if !quiet {
                self.bus.publish(Event::subscriber_overflow(lane.name, reason));
            }
        }
    }

    /// Closes every lane and waits for the delivery tasks to drain them.
    pub async fn shutdown(mut self) {
        self.lanes.clear();
        while self.tasks.join_next().await.is_some() {}
    }
}

async fn deliver(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>, bus: Bus) {
    while let Some(ev) = rx.recv().await {
        let handled = AssertUnwindSafe(sub.on_event(&ev)).catch_unwind().await;
        if let Err(payload) = handled {
            bus.publish(Event::subscriber_panicked(
                sub.name(),
                panic_message(payload.as_ref()),
            ));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&'static str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
