//! # ConsumptionWorker: one topic's pull loop.
//!
//! A worker is spawned **idle**, holding its subscription handle. It moves to
//! **pulling** exactly once, when its [`StartSignal`] fires, and runs until its
//! cancellation token is cancelled (**terminated**).
//!
//! ## State machine
//! ```text
//!            start signal                 token cancelled
//!   idle ─────────────────► pulling ─────────────────────► terminated
//!     │                        │ output closed                  ▲
//!     │ token cancelled /      └────────────────────────────────┤
//!     │ signal dropped                                          │
//!     └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Pull loop
//! ```text
//! loop {
//!   ├─► select(biased) { cancelled → exit, pull() → result }
//!   ├─► Ok(msg)  → failures = 0; forward(msg)
//!   │                ├─ select(biased) { reserve() → send, cancelled → drain }
//!   │                └─ drain: reserve() within drain_grace, else nack + exit
//!   └─► Err(e)   → publish PullFailed; sleep (cancellable):
//!                    retryable e → backoff.next(failures), else backoff.ceiling()
//! }
//! ```
//!
//! ## Rules
//! - Cancellation is checked at every pull, every forward, and every backoff sleep.
//! - A message already pulled is offered to the output before the worker exits;
//!   if the consumer does not take it within `drain_grace` it is nacked.
//! - Messages are forwarded unmodified; acknowledgment is the consumer's job.
//! - Every pull failure is retried; only the delay depends on the error kind.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerRef, Message, Subscription, TopicName};
use crate::events::{Bus, Event, EventKind};
use crate::policies::BackoffPolicy;

/// Global worker id counter.
static WORKER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Why a worker exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    /// Cancelled before the start signal arrived (or the signal was dropped).
    NeverStarted,
    /// Cancelled while pulling.
    Cancelled,
    /// The fan-in output is gone.
    OutputClosed,
    /// Did not stop within grace and was aborted.
    Aborted,
    /// The worker task panicked.
    Panicked,
    /// Already joined by an earlier shutdown.
    Joined,
}

impl WorkerExit {
    pub(crate) fn as_label(&self) -> &'static str {
        match self {
            WorkerExit::NeverStarted => "never_started",
            WorkerExit::Cancelled => "cancelled",
            WorkerExit::OutputClosed => "output_closed",
            WorkerExit::Aborted => "aborted",
            WorkerExit::Panicked => "panicked",
            WorkerExit::Joined => "joined",
        }
    }
}

/// Settings shared by every worker of an aggregator.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WorkerParams {
    pub backoff: BackoffPolicy,
    pub drain_grace: Duration,
}

/// Single-use rendezvous moving a worker from idle to pulling.
pub(crate) struct StartSignal(oneshot::Sender<()>);

impl StartSignal {
    /// Fires the signal. Returns `false` if the worker already exited.
    pub(crate) fn fire(self) -> bool {
        self.0.send(()).is_ok()
    }
}

/// Control side of a spawned worker: cancellation token and join handle.
pub(crate) struct WorkerHandle {
    id: u64,
    cancel: CancellationToken,
    join: Mutex<Option<JoinHandle<WorkerExit>>>,
}

impl WorkerHandle {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Signals the worker to terminate. Idempotent.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the worker and waits up to `grace` for it to exit; aborts it past that.
    pub(crate) async fn shutdown(&self, grace: Duration) -> WorkerExit {
        self.cancel.cancel();
        let Some(mut join) = self.join.lock().await.take() else {
            return WorkerExit::Joined;
        };

        match time::timeout(grace, &mut join).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(_join_err)) => WorkerExit::Panicked,
            Err(_elapsed) => {
                join.abort();
                WorkerExit::Aborted
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            id: WORKER_SEQ.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
            join: Mutex::new(None),
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Pulls one subscription and forwards into the shared output.
pub(crate) struct ConsumptionWorker {
    id: u64,
    topic: TopicName,
    subscription: Subscription,
    broker: BrokerRef,
    output: mpsc::Sender<Message>,
    bus: Bus,
    params: WorkerParams,
}

impl ConsumptionWorker {
    pub(crate) fn new(
        subscription: Subscription,
        broker: BrokerRef,
        output: mpsc::Sender<Message>,
        bus: Bus,
        params: WorkerParams,
    ) -> Self {
        Self {
            id: WORKER_SEQ.fetch_add(1, Ordering::Relaxed),
            topic: subscription.topic().clone(),
            subscription,
            broker,
            output,
            bus,
            params,
        }
    }

    /// Spawns the worker in the idle state.
    ///
    /// The returned [`StartSignal`] must be fired for the worker to start pulling.
    pub(crate) fn spawn(self, token: CancellationToken) -> (WorkerHandle, StartSignal) {
        let (start_tx, start_rx) = oneshot::channel();
        let id = self.id;
        let run_token = token.clone();
        let join = tokio::spawn(async move { self.run(start_rx, run_token).await });

        let handle = WorkerHandle {
            id,
            cancel: token,
            join: Mutex::new(Some(join)),
        };
        (handle, StartSignal(start_tx))
    }

    async fn run(self, start: oneshot::Receiver<()>, token: CancellationToken) -> WorkerExit {
        let started = select! {
            biased;
            _ = token.cancelled() => false,
            res = start => res.is_ok(),
        };

        let exit = if started {
            self.bus.publish(self.event(EventKind::WorkerStarted));
            self.pull_loop(&token).await
        } else {
            WorkerExit::NeverStarted
        };

        self.bus
            .publish(self.event(EventKind::WorkerStopped).with_reason(exit.as_label()));
        exit
    }

    async fn pull_loop(&self, token: &CancellationToken) -> WorkerExit {
        let mut failures: u32 = 0;

        loop {
            let pulled = select! {
                biased;
                _ = token.cancelled() => return WorkerExit::Cancelled,
                res = self.broker.pull(&self.subscription) => res,
            };

            match pulled {
                Ok(msg) => {
                    failures = 0;
                    if let Err(exit) = self.forward(msg, token).await {
                        return exit;
                    }
                }
                Err(err) => {
                    let delay = if err.is_retryable() {
                        self.params.backoff.next(failures)
                    } else {
                        self.params.backoff.ceiling()
                    };
                    failures = failures.saturating_add(1);
                    self.bus.publish(
                        self.event(EventKind::PullFailed)
                            .with_attempt(failures)
                            .with_delay(delay)
                            .with_reason(err.to_string()),
                    );

                    let sleep = time::sleep(delay);
                    tokio::pin!(sleep);
                    select! {
                        _ = &mut sleep => {}
                        _ = token.cancelled() => return WorkerExit::Cancelled,
                    }
                }
            }
        }
    }

    /// Hands `msg` to the output; blocks until the consumer has room.
    async fn forward(&self, msg: Message, token: &CancellationToken) -> Result<(), WorkerExit> {
        let reserved = select! {
            biased;
            permit = self.output.reserve() => Some(permit),
            _ = token.cancelled() => None,
        };

        let permit = match reserved {
            Some(permit) => permit,
            None => match time::timeout(self.params.drain_grace, self.output.reserve()).await {
                Ok(permit) => permit,
                Err(_elapsed) => {
                    self.release(msg, "drain_timeout");
                    return Err(WorkerExit::Cancelled);
                }
            },
        };

        match permit {
            Ok(permit) => {
                permit.send(msg);
                Ok(())
            }
            Err(_closed) => {
                self.release(msg, "output_closed");
                Err(WorkerExit::OutputClosed)
            }
        }
    }

    /// Gives an undeliverable message back to the broker.
    fn release(&self, msg: Message, reason: &'static str) {
        msg.nack();
        self.bus
            .publish(self.event(EventKind::MessageReleased).with_reason(reason));
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_topic(&self.topic)
            .with_subscription(self.subscription.name())
            .with_worker(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, MemoryBroker};
    use crate::error::BrokerError;
    use crate::policies::JitterPolicy;
    use bytes::Bytes;
    use tokio::sync::broadcast;

    struct Fixture {
        broker: MemoryBroker,
        subscription: Subscription,
        bus: Bus,
        events: broadcast::Receiver<Event>,
    }

    async fn fixture() -> Fixture {
        let broker = MemoryBroker::new("p");
        let topic = broker.create_topic("orders-a");
        let subscription = broker
            .create_subscription(&topic, &"orders-a-agg".into(), Duration::from_secs(60))
            .await
            .unwrap();
        let bus = Bus::new(256);
        let events = bus.subscribe();
        Fixture {
            broker,
            subscription,
            bus,
            events,
        }
    }

    fn worker(fx: &Fixture, output: mpsc::Sender<Message>, drain_grace: Duration) -> ConsumptionWorker {
        ConsumptionWorker::new(
            fx.subscription.clone(),
            fx.broker.client(),
            output,
            fx.bus.clone(),
            WorkerParams {
                backoff: BackoffPolicy::constant(Duration::from_millis(1)),
                drain_grace,
            },
        )
    }

    fn drain_kinds(rx: &mut broadcast::Receiver<Event>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn idle_until_started_then_forwards_in_order() {
        let fx = fixture().await;
        for body in ["1", "2", "3"] {
            fx.broker.publish("orders-a", body).unwrap();
        }
        let (tx, mut rx) = mpsc::channel(1);
        let (handle, start) = worker(&fx, tx, Duration::from_secs(1)).spawn(CancellationToken::new());

        time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err(), "idle worker must not pull");

        assert!(start.fire());
        for expected in ["1", "2", "3"] {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.data(), &Bytes::from(expected));
            assert_eq!(msg.topic().short_name(), "orders-a");
            msg.ack();
        }

        assert_eq!(handle.shutdown(Duration::from_secs(1)).await, WorkerExit::Cancelled);
    }

    #[tokio::test]
    async fn pull_failures_are_retried_with_backoff() {
        let mut fx = fixture().await;
        fx.broker
            .fail_next_pulls("orders-a-agg", 3, BrokerError::unavailable("reset"));
        fx.broker.publish("orders-a", "after-outage").unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let (handle, start) = worker(&fx, tx, Duration::from_secs(1)).spawn(CancellationToken::new());
        start.fire();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.data(), &Bytes::from("after-outage"));
        handle.shutdown(Duration::from_secs(1)).await;

        let mut attempts = Vec::new();
        while let Ok(ev) = fx.events.try_recv() {
            if ev.kind == EventKind::PullFailed {
                attempts.push(ev.attempt.unwrap());
            }
        }
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn permanent_pull_errors_wait_the_capped_delay() {
        let mut fx = fixture().await;
        fx.broker.fail_next_pulls(
            "orders-a-agg",
            1,
            BrokerError::NotFound {
                resource: "orders-a-agg".into(),
            },
        );
        fx.broker
            .fail_next_pulls("orders-a-agg", 1, BrokerError::unavailable("reset"));
        fx.broker.publish("orders-a", "eventually").unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let params = WorkerParams {
            backoff: BackoffPolicy {
                first: Duration::from_millis(1),
                max: Duration::from_millis(30),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
            drain_grace: Duration::from_secs(1),
        };
        let w = ConsumptionWorker::new(
            fx.subscription.clone(),
            fx.broker.client(),
            tx,
            fx.bus.clone(),
            params,
        );
        let (handle, start) = w.spawn(CancellationToken::new());
        start.fire();

        assert_eq!(rx.recv().await.unwrap().data(), &Bytes::from("eventually"));
        handle.shutdown(Duration::from_secs(1)).await;

        let mut delays = Vec::new();
        while let Ok(ev) = fx.events.try_recv() {
            if ev.kind == EventKind::PullFailed {
                delays.push(ev.delay_ms.unwrap());
            }
        }
        // Not found: straight to the cap. Unavailable: second failure, 1ms × 2.
        assert_eq!(delays, vec![30, 2]);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_blocked_pull() {
        let mut fx = fixture().await;
        let (tx, _rx) = mpsc::channel(1);
        let (handle, start) = worker(&fx, tx, Duration::from_secs(1)).spawn(CancellationToken::new());
        start.fire();
        time::sleep(Duration::from_millis(20)).await;

        let exit = time::timeout(Duration::from_millis(500), handle.shutdown(Duration::from_secs(5)))
            .await
            .expect("worker must stop promptly");
        assert_eq!(exit, WorkerExit::Cancelled);

        let kinds = drain_kinds(&mut fx.events);
        assert_eq!(kinds, vec![EventKind::WorkerStarted, EventKind::WorkerStopped]);
    }

    #[tokio::test]
    async fn pulled_message_is_still_delivered_after_cancel() {
        let fx = fixture().await;
        fx.broker.publish("orders-a", "first").unwrap();
        fx.broker.publish("orders-a", "second").unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let (handle, start) = worker(&fx, tx, Duration::from_secs(2)).spawn(CancellationToken::new());
        start.fire();
        // "first" fills the output, "second" is pulled and waiting for room.
        time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        assert_eq!(rx.recv().await.unwrap().data(), &Bytes::from("first"));
        assert_eq!(rx.recv().await.unwrap().data(), &Bytes::from("second"));
        assert_eq!(handle.shutdown(Duration::from_secs(1)).await, WorkerExit::Cancelled);
        assert!(fx.broker.acknowledgments().is_empty());
    }

    #[tokio::test]
    async fn undelivered_message_is_nacked_after_drain_grace() {
        let mut fx = fixture().await;
        fx.broker.publish("orders-a", "first").unwrap();
        fx.broker.publish("orders-a", "second").unwrap();

        let (tx, _rx) = mpsc::channel(1);
        let (handle, start) =
            worker(&fx, tx, Duration::from_millis(20)).spawn(CancellationToken::new());
        start.fire();
        time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.shutdown(Duration::from_secs(1)).await, WorkerExit::Cancelled);
        assert_eq!(fx.broker.acknowledgments(), vec![("2".to_string(), false)]);
        assert!(drain_kinds(&mut fx.events).contains(&EventKind::MessageReleased));
    }

    #[tokio::test]
    async fn cancelled_before_start_never_pulls() {
        let fx = fixture().await;
        fx.broker.publish("orders-a", "x").unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let (handle, start) = worker(&fx, tx, Duration::from_secs(1)).spawn(CancellationToken::new());

        assert_eq!(handle.shutdown(Duration::from_secs(1)).await, WorkerExit::NeverStarted);
        assert!(!start.fire());
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.shutdown(Duration::from_secs(1)).await, WorkerExit::Joined);
    }

    #[tokio::test]
    async fn closed_output_releases_message_and_exits() {
        let fx = fixture().await;
        fx.broker.publish("orders-a", "orphan").unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let (handle, start) = worker(&fx, tx, Duration::from_secs(1)).spawn(CancellationToken::new());
        start.fire();
        time::sleep(Duration::from_millis(30)).await;

        assert_eq!(handle.shutdown(Duration::from_secs(1)).await, WorkerExit::OutputClosed);
        assert_eq!(fx.broker.acknowledgments(), vec![("1".to_string(), false)]);
    }
}
