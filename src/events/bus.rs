//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] publishes events from many sources (reconciler, workers, aggregator)
//! over a [`tokio::sync::broadcast`] ring buffer. The aggregator reads it through
//! a [`Listener`], which never loses track silently: when it falls behind, the
//! skipped count surfaces as an [`EventKind::EventsLagged`] event.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                 Listener (one):
//!   Reconciler ──┐
//!   Worker 1   ──┼──────► Bus ───────► Listener::next() ─┬─► AliveTracker
//!   Worker N   ──┤  (broadcast ring)   Lagged(n) ──►     └─► SubscriberSet
//!   Aggregator ──┘                     EventsLagged{skipped=n}
//! ```
//!
//! ## Rules
//! - `publish()` never blocks; events published with no receiver are dropped.
//! - One ring buffer of `capacity` events is shared by every receiver.
//! - Raw receivers from [`Bus::subscribe`] see `RecvError::Lagged` themselves.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use super::event::{Event, EventKind};

/// Broadcast channel for runtime events.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (min 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Raw receiver of every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Lag-reporting receiver of every event published after this call.
    pub(crate) fn listen(&self) -> Listener {
        Listener {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiver that turns a lag into an [`EventKind::EventsLagged`] event.
pub(crate) struct Listener {
    rx: broadcast::Receiver<Event>,
}

impl Listener {
    /// Next event; `None` once every publisher is gone.
    pub(crate) async fn next(&mut self) -> Option<Event> {
        match self.rx.recv().await {
            Ok(ev) => Some(ev),
            Err(RecvError::Lagged(skipped)) => Some(lagged(skipped)),
            Err(RecvError::Closed) => None,
        }
    }

    /// Next already-published event, without waiting.
    pub(crate) fn try_next(&mut self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Lagged(skipped)) => Some(lagged(skipped)),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }
}

fn lagged(skipped: u64) -> Event {
    Event::new(EventKind::EventsLagged).with_reason(format!("skipped={skipped}"))
}
