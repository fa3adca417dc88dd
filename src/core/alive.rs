//! # Worker liveness tracker with sequence-based ordering.
//!
//! Maintains which consumption workers are currently alive, and for each topic
//! the highest number of workers ever alive at the same time.
//!
//! ## Architecture
//! ```text
//! Workers ──► Bus ──► bus listener ──► AliveTracker::update()
//!                                             │
//!                                             ▼
//!                               workers: HashMap<worker_id, {topic, seq}>
//!                               peak:    HashMap<topic, max simultaneous>
//! ```
//!
//! ## Rules
//! - Only `WorkerStarted` / `WorkerStopped` change liveness
//! - Read operations (`live`, `peak`, `snapshot`) are **eventually consistent**
//! - Events with `seq <= last_seq` for a worker are **rejected** (stale)
//! - A stopped worker is forgotten; worker ids are never reused

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::events::{Event, EventKind};

#[derive(Debug, Clone)]
struct WorkerState {
    topic: Arc<str>,
    last_seq: u64,
}

#[derive(Debug, Default)]
struct State {
    workers: HashMap<u64, WorkerState>,
    peak: HashMap<Arc<str>, usize>,
}

impl State {
    fn live(&self, topic: &str) -> usize {
        self.workers
            .values()
            .filter(|w| w.topic.as_ref() == topic)
            .count()
    }
}

/// Thread-safe tracker of alive consumption workers.
#[derive(Debug, Default)]
pub struct AliveTracker {
    state: RwLock<State>,
}

impl AliveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a worker lifecycle event. Returns `true` if liveness changed.
    ///
    /// ```text
    /// update(WorkerStarted, worker=7, seq=10) → alive, peak(topic) updated
    /// update(WorkerStopped, worker=7, seq=12) → forgotten
    /// update(WorkerStarted, worker=7, seq=11) → rejected (stale while tracked)
    /// ```
    pub async fn update(&self, ev: &Event) -> bool {
        let (Some(worker), Some(topic)) = (ev.worker, ev.topic.as_ref()) else {
            return false;
        };

        let mut state = self.state.write().await;
        match ev.kind {
            EventKind::WorkerStarted => {
                if let Some(known) = state.workers.get(&worker) {
                    if ev.seq <= known.last_seq {
                        return false;
                    }
                }
                state.workers.insert(
                    worker,
                    WorkerState {
                        topic: Arc::clone(topic),
                        last_seq: ev.seq,
                    },
                );
                let live = state.live(topic);
                let peak = state.peak.entry(Arc::clone(topic)).or_insert(0);
                *peak = (*peak).max(live);
                true
            }
            EventKind::WorkerStopped => {
                let fresh = state
                    .workers
                    .get(&worker)
                    .is_some_and(|known| ev.seq > known.last_seq);
                if fresh {
                    state.workers.remove(&worker);
                }
                fresh
            }
            _ => false,
        }
    }

    /// Number of workers currently alive for `topic`.
    pub async fn live(&self, topic: &str) -> usize {
        self.state.read().await.live(topic)
    }

    /// Highest number of simultaneously alive workers ever seen for `topic`.
    pub async fn peak(&self, topic: &str) -> usize {
        self.state
            .read()
            .await
            .peak
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// Sorted list of topics with at least one alive worker.
    pub async fn snapshot(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut topics: Vec<String> = state
            .workers
            .values()
            .map(|w| w.topic.to_string())
            .collect();
        topics.sort_unstable();
        topics.dedup();
        topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: EventKind, worker: u64, topic: &str) -> Event {
        Event::new(kind).with_worker(worker).with_topic(topic)
    }

    #[tokio::test]
    async fn tracks_live_and_peak_per_topic() {
        let tracker = AliveTracker::new();
        assert!(tracker.update(&ev(EventKind::WorkerStarted, 1, "a")).await);
        assert!(tracker.update(&ev(EventKind::WorkerStarted, 2, "b")).await);
        assert!(tracker.update(&ev(EventKind::WorkerStopped, 1, "a")).await);
        assert!(tracker.update(&ev(EventKind::WorkerStarted, 3, "a")).await);

        assert_eq!(tracker.live("a").await, 1);
        assert_eq!(tracker.peak("a").await, 1);
        assert_eq!(tracker.snapshot().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn overlapping_workers_raise_the_peak() {
        let tracker = AliveTracker::new();
        tracker.update(&ev(EventKind::WorkerStarted, 1, "a")).await;
        tracker.update(&ev(EventKind::WorkerStarted, 2, "a")).await;
        assert_eq!(tracker.peak("a").await, 2);
    }

    #[tokio::test]
    async fn stale_and_unrelated_events_are_ignored() {
        let tracker = AliveTracker::new();
        let started = ev(EventKind::WorkerStarted, 1, "a");
        let stale_stop = Event {
            seq: 0,
            ..ev(EventKind::WorkerStopped, 1, "a")
        };
        tracker.update(&started).await;

        assert!(!tracker.update(&stale_stop).await);
        assert!(!tracker.update(&ev(EventKind::PullFailed, 1, "a")).await);
        assert!(!tracker.update(&ev(EventKind::WorkerStopped, 99, "a")).await);
        assert_eq!(tracker.live("a").await, 1);
    }
}
