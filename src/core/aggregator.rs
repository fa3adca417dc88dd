//! # Aggregator: owns the reconciler, the registry and the fan-in output.
//!
//! The [`Aggregator`] is the public face of the runtime. It wires the event bus,
//! the [`SubscriberSet`], the [`AliveTracker`] and the [`Registry`], and drives
//! the reconciler task between [`start`](Aggregator::start) and
//! [`stop`](Aggregator::stop).
//!
//! ## High-level architecture
//! ```text
//! start():
//!   bus listener: Bus.listen() ─► AliveTracker::update(&Event) ─► SubscriberSet::emit(Event)
//!   output = mpsc::channel(output_capacity) ──► MessageStream (returned)
//!   Reconciler::run(refresh requests) ──► pass every refresh_interval
//!        └─► per topic: ConsumptionWorker(child token) ── Message ──► output
//!
//! refresh():
//!   oneshot reply ──► reconciler request queue ──► pass ──► PassReport
//!
//! stop(delete_subscriptions):
//!   Bus.publish(StopRequested)
//!   runtime_token.cancel()        → reconciler exits after its current pass,
//!                                   every worker token is cancelled
//!   join reconciler (grace)
//!   registry.take_all() ─► teardown_all(grace, delete_subscriptions)
//!        ├─ all joined   → Bus.publish(AllStoppedWithin)
//!        └─ some aborted → Bus.publish(GraceExceeded), Err(GraceExceeded)
//!   listener drained, subscriber queues flushed
//! ```
//!
//! ## Rules
//! - `start` succeeds exactly once; the aggregator is not restartable.
//! - The message stream ends only after `stop` (every sender gone).
//! - Dropping the aggregator cancels every task it spawned.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::broker::{Connector, TopicName};
use crate::core::alive::AliveTracker;
use crate::core::builder::AggregatorBuilder;
use crate::core::config::AggregatorConfig;
use crate::core::output::MessageStream;
use crate::core::reconciler::{PassReport, Reconciler, RefreshReply, teardown_all};
use crate::core::registry::{Registry, RegistrySnapshot};
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::SubscriberSet;

/// Pending on-demand passes; callers beyond this wait for a free slot.
const REFRESH_QUEUE: usize = 8;

enum State {
    Idle {
        subs: SubscriberSet,
    },
    Running {
        reconciler: JoinHandle<()>,
        refresh: mpsc::Sender<RefreshReply>,
        listener: JoinHandle<()>,
    },
    Stopped,
}

/// Multiplexes every matching topic of a project into one message stream.
pub struct Aggregator {
    cfg: AggregatorConfig,
    connector: Arc<dyn Connector>,
    bus: Bus,
    registry: Arc<Registry>,
    alive: Arc<AliveTracker>,
    runtime_token: CancellationToken,
    listener_token: CancellationToken,
    state: Mutex<State>,
}

impl Aggregator {
    /// Returns a builder for an aggregator over the project in `cfg`.
    pub fn builder(cfg: AggregatorConfig, connector: Arc<dyn Connector>) -> AggregatorBuilder {
        AggregatorBuilder::new(cfg, connector)
    }

    pub(crate) fn new_internal(
        cfg: AggregatorConfig,
        connector: Arc<dyn Connector>,
        bus: Bus,
        subs: SubscriberSet,
    ) -> Self {
        Self {
            cfg,
            connector,
            bus,
            registry: Registry::new(),
            alive: Arc::new(AliveTracker::new()),
            runtime_token: CancellationToken::new(),
            listener_token: CancellationToken::new(),
            state: Mutex::new(State::Idle { subs }),
        }
    }

    /// Starts reconciliation and returns the merged message stream.
    ///
    /// The first pass runs immediately. Returns [`RuntimeError::AlreadyStarted`]
    /// on any call after the first.
    pub async fn start(&self) -> Result<MessageStream, RuntimeError> {
        let mut state = self.state.lock().await;
        let subs = match std::mem::replace(&mut *state, State::Stopped) {
            State::Idle { subs } => subs,
            other => {
                *state = other;
                return Err(RuntimeError::AlreadyStarted);
            }
        };

        let listener = self.spawn_listener(subs);
        let (tx, rx) = mpsc::channel(self.cfg.output_capacity_clamped());
        let (refresh, requests) = mpsc::channel(REFRESH_QUEUE);

        let reconciler = Reconciler::new(
            self.cfg.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.registry),
            self.bus.clone(),
            tx,
            self.runtime_token.clone(),
        );
        let reconciler = tokio::spawn(reconciler.run(requests));

        *state = State::Running {
            reconciler,
            refresh,
            listener,
        };
        Ok(MessageStream::new(rx))
    }

    /// Runs a reconciliation pass now and returns its report.
    ///
    /// The pass is queued behind the one in progress, if any.
    pub async fn refresh(&self) -> Result<PassReport, RuntimeError> {
        let requests = match &*self.state.lock().await {
            State::Running { refresh, .. } => refresh.clone(),
            _ => return Err(RuntimeError::NotRunning),
        };

        let (tx, rx) = oneshot::channel();
        requests
            .send(tx)
            .await
            .map_err(|_closed| RuntimeError::NotRunning)?;
        rx.await.map_err(|_dropped| RuntimeError::NotRunning)?
    }

    /// Stops reconciliation and every worker.
    ///
    /// With `delete_subscriptions`, every subscription this aggregator tracked is
    /// deleted (failures are reported as events, not errors). Returns
    /// [`RuntimeError::GraceExceeded`] if some workers had to be aborted.
    ///
    /// A pass still running after `grace` is aborted. Subscriptions it created
    /// had not reached the registry yet, so they are left on the broker even
    /// with `delete_subscriptions`; their workers stop with the runtime token.
    pub async fn stop(&self, delete_subscriptions: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        let (mut reconciler, listener) = match std::mem::replace(&mut *state, State::Stopped) {
            State::Running {
                reconciler,
                listener,
                ..
            } => (reconciler, listener),
            other => {
                *state = other;
                return Err(RuntimeError::NotRunning);
            }
        };

        self.bus.publish(
            Event::new(EventKind::StopRequested)
                .with_reason(format!("delete_subscriptions={delete_subscriptions}")),
        );
        self.runtime_token.cancel();

        let grace = self.cfg.grace;
        let mut stuck = Vec::new();
        if time::timeout(grace, &mut reconciler).await.is_err() {
            reconciler.abort();
            stuck.push("reconciler".to_string());
        }

        let leases = self.registry.take_all();
        stuck.extend(teardown_all(&leases, grace, delete_subscriptions, &self.bus, None).await);

        let result = if stuck.is_empty() {
            self.bus.publish(Event::new(EventKind::AllStoppedWithin));
            Ok(())
        } else {
            self.bus.publish(
                Event::new(EventKind::GraceExceeded).with_reason(format!("stuck={stuck:?}")),
            );
            Err(RuntimeError::GraceExceeded { grace, stuck })
        };

        self.listener_token.cancel();
        let _ = listener.await;
        result
    }

    /// Current registry snapshot: the complete result of the last published pass.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.registry.load()
    }

    /// Sorted list of topics currently being consumed.
    pub fn topics(&self) -> Vec<TopicName> {
        self.registry.load().topics()
    }

    /// Number of consumption workers currently alive for `topic` (eventually consistent).
    pub async fn live_workers(&self, topic: &str) -> usize {
        self.alive.live(topic).await
    }

    /// Highest number of workers ever alive at once for `topic`.
    pub async fn peak_workers(&self, topic: &str) -> usize {
        self.alive.peak(topic).await
    }

    /// Returns `true` between a successful `start` and `stop`.
    pub async fn is_running(&self) -> bool {
        matches!(&*self.state.lock().await, State::Running { .. })
    }

    /// Receiver of every runtime event published after this call.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Bus listener: updates the alive tracker, then fans out to subscribers.
    ///
    /// A lag reaches subscribers as `EventsLagged`; the tracker cannot recover
    /// the skipped worker transitions, so its counts may drift until then.
    fn spawn_listener(&self, subs: SubscriberSet) -> JoinHandle<()> {
        let mut listener = self.bus.listen();
        let alive = Arc::clone(&self.alive);
        let token = self.listener_token.clone();

        tokio::spawn(async move {
            loop {
                let ev = select! {
                    biased;
                    ev = listener.next() => ev,
                    _ = token.cancelled() => None,
                };
                let Some(ev) = ev else { break };
                alive.update(&ev).await;
                subs.emit(ev);
            }
            // Deliver whatever was published before the cancel.
            while let Some(ev) = listener.try_next() {
                alive.update(&ev).await;
                subs.emit(ev);
            }
            subs.shutdown().await;
        })
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.runtime_token.cancel();
        self.listener_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::core::discovery::TopicFilter;
    use std::time::Duration;

    fn aggregator(broker: &MemoryBroker) -> Arc<Aggregator> {
        let cfg = AggregatorConfig::new("shop").with_filter(TopicFilter::prefix("orders-"));
        Aggregator::builder(cfg, Arc::new(broker.clone())).build()
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let broker = MemoryBroker::new("shop");
        let agg = aggregator(&broker);

        let _stream = agg.start().await.unwrap();
        let err = agg.start().await.unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyStarted));
        agg.stop(true).await.unwrap();
        assert!(matches!(agg.start().await, Err(RuntimeError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn control_calls_require_a_running_aggregator() {
        let broker = MemoryBroker::new("shop");
        let agg = aggregator(&broker);

        assert!(matches!(agg.refresh().await, Err(RuntimeError::NotRunning)));
        assert!(matches!(agg.stop(false).await, Err(RuntimeError::NotRunning)));
        assert!(!agg.is_running().await);

        let _stream = agg.start().await.unwrap();
        assert!(agg.is_running().await);
        agg.stop(false).await.unwrap();
        assert!(matches!(agg.stop(false).await, Err(RuntimeError::NotRunning)));
    }

    #[tokio::test]
    async fn refresh_runs_a_pass_on_demand() {
        let broker = MemoryBroker::new("shop");
        broker.create_topic("orders-a");
        let agg = aggregator(&broker);
        let _stream = agg.start().await.unwrap();

        // The startup pass already onboarded orders-a.
        let report = agg.refresh().await.unwrap();
        assert_eq!(report.version.get(), 2);
        assert_eq!((report.added, report.retained), (0, 1));

        broker.create_topic("orders-b");
        let report = agg.refresh().await.unwrap();
        assert_eq!((report.added, report.retained), (1, 1));
        assert_eq!(agg.topics().len(), 2);
        agg.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn stop_reports_workers_and_flushes_events() {
        let broker = MemoryBroker::new("shop");
        broker.create_topic("orders-a");
        let agg = aggregator(&broker);
        let mut events = agg.events();
        let _stream = agg.start().await.unwrap();
        agg.refresh().await.unwrap();

        time::timeout(Duration::from_secs(1), async {
            while agg.live_workers("projects/shop/topics/orders-a").await != 1 {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        agg.stop(true).await.unwrap();
        assert_eq!(agg.live_workers("projects/shop/topics/orders-a").await, 0);
        assert!(agg.snapshot().is_empty());

        let mut kinds = Vec::new();
        while let Ok(ev) = events.try_recv() {
            kinds.push(ev.kind);
        }
        let stop_at = kinds.iter().position(|k| *k == EventKind::StopRequested).unwrap();
        assert_eq!(kinds.last(), Some(&EventKind::AllStoppedWithin));
        assert!(kinds[stop_at..].contains(&EventKind::TopicRemoved));
    }
}
