//! # Reconciler: keeps the active topic set equal to the discovered one.
//!
//! The reconciler is the **only writer** of the [`Registry`]. It runs one pass
//! immediately, then one per `refresh_interval`, plus any pass requested through
//! [`Aggregator::refresh`](crate::Aggregator::refresh).
//!
//! ## Pass
//! ```text
//! v = clock.advance()                                  PassStarted
//! broker  = connector.connect(project)   ── Err ──►    ConnectFailed   (skip)
//! D       = discover(broker, filter)     ── Err ──►    DiscoveryFailed (skip, keep S)
//! working = registry.working_copy()
//! for t in D:
//!   ├─ tracked   → working.refresh(t, v)               (retained)
//!   └─ untracked → ensure subscription ─► spawn idle worker ─► start
//!                    ├─ Ok  → working.insert(lease, v) TopicAdded
//!                    └─ Err →                          SubscriptionFailed (retry next pass)
//! for lease in working.sweep(v):
//!   cancel ─► join(grace, abort past it) ─► delete subscription?   TopicRemoved
//! registry.publish(working)                            PassCompleted
//! ```
//!
//! ## Rules
//! - A skipped pass never touches the registry.
//! - A retained topic keeps its lease: no new subscription handle, no new worker.
//! - Subscription creation conflicts (`AlreadyExists`) fall back to a lookup; any
//!   other creation error fails the topic for this pass only.
//! - Deletion failures are reported and never abort a teardown.
//! - A pass is not interrupted by shutdown; the loop checks the token between passes.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerRef, Connector, Message, Subscription, TopicName};
use crate::core::config::AggregatorConfig;
use crate::core::discovery::discover;
use crate::core::registry::{Registry, TopicLease, Version, VersionClock};
use crate::core::worker::{ConsumptionWorker, WorkerExit, WorkerParams};
use crate::error::{BrokerError, RuntimeError};
use crate::events::{Bus, Event, EventKind, PassSummary};

/// Reply slot of an on-demand pass.
pub(crate) type RefreshReply = oneshot::Sender<Result<PassReport, RuntimeError>>;

/// Outcome of one completed reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassReport {
    /// Version stamped on every entry of the published snapshot.
    pub version: Version,
    /// Topics onboarded by this pass.
    pub added: u32,
    /// Topics already tracked and kept as is.
    pub retained: u32,
    /// Topics torn down by this pass.
    pub removed: u32,
    /// Discovered topics that could not be onboarded (retried next pass).
    pub failed: u32,
}

impl PassReport {
    fn new(version: Version) -> Self {
        Self {
            version,
            added: 0,
            retained: 0,
            removed: 0,
            failed: 0,
        }
    }

    /// Counters in the form carried by [`EventKind::PassCompleted`].
    pub fn summary(&self) -> PassSummary {
        PassSummary {
            added: self.added,
            retained: self.retained,
            removed: self.removed,
            failed: self.failed,
        }
    }
}

pub(crate) struct Reconciler {
    cfg: AggregatorConfig,
    connector: Arc<dyn Connector>,
    registry: Arc<Registry>,
    bus: Bus,
    output: mpsc::Sender<Message>,
    runtime_token: CancellationToken,
    clock: VersionClock,
}

impl Reconciler {
    pub(crate) fn new(
        cfg: AggregatorConfig,
        connector: Arc<dyn Connector>,
        registry: Arc<Registry>,
        bus: Bus,
        output: mpsc::Sender<Message>,
        runtime_token: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            connector,
            registry,
            bus,
            output,
            runtime_token,
            clock: VersionClock::default(),
        }
    }

    /// Runs passes until the runtime token is cancelled.
    ///
    /// The initial pass completes before the loop starts, so a refresh request
    /// queued right after `start` is always served by a later pass.
    pub(crate) async fn run(mut self, mut requests: mpsc::Receiver<RefreshReply>) {
        if self.runtime_token.is_cancelled() {
            return;
        }
        let _ = self.pass().await;

        let period = self.cfg.refresh_interval_clamped();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;
                _ = self.runtime_token.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = self.pass().await;
                }
                Some(reply) = requests.recv() => {
                    let report = self.pass().await;
                    let _ = reply.send(report);
                }
            }
        }
        // Dropping the output sender here lets the stream end once every worker is gone.
    }

    /// Runs one reconciliation pass.
    pub(crate) async fn pass(&mut self) -> Result<PassReport, RuntimeError> {
        let version = self.clock.advance();
        self.bus
            .publish(Event::new(EventKind::PassStarted).with_version(version.get()));

        let broker = match self.connector.connect(&self.cfg.project).await {
            Ok(broker) => broker,
            Err(source) => {
                self.bus.publish(
                    Event::new(EventKind::ConnectFailed)
                        .with_version(version.get())
                        .with_reason(source.to_string()),
                );
                return Err(RuntimeError::Connect { source });
            }
        };

        let discovered = match discover(broker.as_ref(), &self.cfg.filter).await {
            Ok(topics) => topics,
            Err(source) => {
                self.bus.publish(
                    Event::new(EventKind::DiscoveryFailed)
                        .with_version(version.get())
                        .with_reason(source.to_string()),
                );
                return Err(RuntimeError::Discovery { source });
            }
        };

        let mut working = self.registry.working_copy();
        let mut report = PassReport::new(version);

        for topic in &discovered {
            if working.refresh(topic, version) {
                report.retained += 1;
                continue;
            }
            match self.onboard(&broker, topic).await {
                Ok(lease) => {
                    self.bus.publish(
                        lease_event(EventKind::TopicAdded, &lease).with_version(version.get()),
                    );
                    working.insert(lease, version);
                    report.added += 1;
                }
                Err(err) => {
                    self.bus.publish(
                        Event::new(EventKind::SubscriptionFailed)
                            .with_topic(topic)
                            .with_subscription(&self.cfg.subscription_name(topic))
                            .with_version(version.get())
                            .with_reason(err.to_string()),
                    );
                    report.failed += 1;
                }
            }
        }

        let condemned = working.sweep(version);
        report.removed = u32::try_from(condemned.len()).unwrap_or(u32::MAX);
        teardown_all(
            &condemned,
            self.cfg.grace,
            self.cfg.delete_on_teardown,
            &self.bus,
            Some(version),
        )
        .await;

        working.stamp(version);
        self.registry.publish(working);

        self.bus.publish(
            Event::new(EventKind::PassCompleted)
                .with_version(version.get())
                .with_pass(report.summary()),
        );
        Ok(report)
    }

    /// Ensures a subscription for `topic`, then spawns and starts its worker.
    async fn onboard(
        &self,
        broker: &BrokerRef,
        topic: &TopicName,
    ) -> Result<Arc<TopicLease>, BrokerError> {
        let subscription = self.ensure_subscription(broker, topic).await?;

        let worker = ConsumptionWorker::new(
            subscription.clone(),
            Arc::clone(broker),
            self.output.clone(),
            self.bus.clone(),
            WorkerParams {
                backoff: self.cfg.pull_backoff,
                drain_grace: self.cfg.drain_grace,
            },
        );
        let (handle, start) = worker.spawn(self.runtime_token.child_token());
        start.fire();

        Ok(Arc::new(TopicLease::new(
            topic.clone(),
            subscription,
            Arc::clone(broker),
            handle,
        )))
    }

    async fn ensure_subscription(
        &self,
        broker: &BrokerRef,
        topic: &TopicName,
    ) -> Result<Subscription, BrokerError> {
        let name = self.cfg.subscription_name(topic);
        match broker
            .create_subscription(topic, &name, self.cfg.ack_deadline)
            .await
        {
            Ok(subscription) => Ok(subscription),
            Err(conflict) if conflict.is_conflict() => {
                let subscription = broker.get_subscription(&name).await?;
                self.bus.publish(
                    Event::new(EventKind::SubscriptionReused)
                        .with_topic(topic)
                        .with_subscription(&name)
                        .with_reason(conflict.to_string()),
                );
                Ok(subscription)
            }
            Err(err) => Err(err),
        }
    }
}

/// Tears down `leases` concurrently: cancel, join within `grace`, optionally delete.
///
/// Returns the topics whose workers had to be aborted.
pub(crate) async fn teardown_all(
    leases: &[Arc<TopicLease>],
    grace: Duration,
    delete: bool,
    bus: &Bus,
    version: Option<Version>,
) -> Vec<String> {
    // Cancel everyone first so the joins below overlap.
    for lease in leases {
        lease.worker().cancel();
    }

    let exits = join_all(
        leases
            .iter()
            .map(|lease| teardown(lease, grace, delete, bus, version)),
    )
    .await;

    leases
        .iter()
        .zip(exits)
        .filter(|(_, exit)| *exit == WorkerExit::Aborted)
        .map(|(lease, _)| lease.topic().to_string())
        .collect()
}

async fn teardown(
    lease: &TopicLease,
    grace: Duration,
    delete: bool,
    bus: &Bus,
    version: Option<Version>,
) -> WorkerExit {
    let exit = lease.worker().shutdown(grace).await;

    if delete {
        if let Err(err) = lease.broker().delete_subscription(lease.subscription()).await {
            bus.publish(
                lease_event(EventKind::SubscriptionDeleteFailed, lease).with_reason(err.to_string()),
            );
        }
    }

    let mut ev = lease_event(EventKind::TopicRemoved, lease).with_reason(exit.as_label());
    if let Some(v) = version {
        ev = ev.with_version(v.get());
    }
    bus.publish(ev);
    exit
}

fn lease_event(kind: EventKind, lease: &TopicLease) -> Event {
    Event::new(kind)
        .with_topic(lease.topic())
        .with_subscription(lease.subscription().name())
        .with_worker(lease.worker_id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, MemoryBroker};
    use crate::core::discovery::TopicFilter;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::broadcast;

    struct Harness {
        broker: MemoryBroker,
        registry: Arc<Registry>,
        reconciler: Reconciler,
        output: mpsc::Receiver<Message>,
        events: broadcast::Receiver<Event>,
    }

    fn harness(cfg: AggregatorConfig, broker: &MemoryBroker) -> Harness {
        let registry = Registry::new();
        let bus = Bus::new(1024);
        let events = bus.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let reconciler = Reconciler::new(
            AggregatorConfig {
                grace: Duration::from_secs(1),
                ..cfg
            },
            Arc::new(broker.clone()),
            Arc::clone(&registry),
            bus,
            tx,
            CancellationToken::new(),
        );
        Harness {
            broker: broker.clone(),
            registry,
            reconciler,
            output: rx,
            events,
        }
    }

    fn orders() -> (MemoryBroker, AggregatorConfig) {
        let broker = MemoryBroker::new("shop");
        broker.create_topic("orders-a");
        broker.create_topic("orders-b");
        broker.create_topic("billing");
        let cfg = AggregatorConfig::new("shop").with_filter(TopicFilter::prefix("orders-"));
        (broker, cfg)
    }

    fn kinds(rx: &mut broadcast::Receiver<Event>) -> Vec<EventKind> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev.kind);
        }
        out
    }

    #[tokio::test]
    async fn first_pass_onboards_every_matching_topic() {
        let (broker, cfg) = orders();
        let mut h = harness(cfg, &broker);

        let report = h.reconciler.pass().await.unwrap();
        assert_eq!((report.added, report.retained, report.removed), (2, 0, 0));

        let snap = h.registry.load();
        assert_eq!(snap.version(), Some(report.version));
        let ids: Vec<_> = snap.topics().iter().map(|t| t.short_name().to_string()).collect();
        assert_eq!(ids, vec!["orders-a", "orders-b"]);
        assert_eq!(
            broker.subscriptions().iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            vec!["orders-a-aggregator", "orders-b-aggregator"]
        );
        assert_eq!(broker.ack_deadline("orders-a-aggregator"), Some(Duration::from_secs(600)));
    }

    #[tokio::test]
    async fn onboarded_worker_forwards_messages() {
        let (broker, cfg) = orders();
        let mut h = harness(cfg, &broker);
        h.reconciler.pass().await.unwrap();

        broker.publish("orders-b", "hello").unwrap();
        let msg = h.output.recv().await.unwrap();
        assert_eq!(msg.data(), &Bytes::from("hello"));
        assert_eq!(msg.topic().short_name(), "orders-b");
    }

    #[tokio::test]
    async fn unchanged_topics_keep_their_lease() {
        let (broker, cfg) = orders();
        let mut h = harness(cfg, &broker);
        h.reconciler.pass().await.unwrap();
        let before = h.registry.load();

        let report = h.reconciler.pass().await.unwrap();
        assert_eq!((report.added, report.retained, report.removed), (0, 2, 0));

        let after = h.registry.load();
        for (topic, entry) in before.iter() {
            let now = after.get(topic.as_str()).unwrap();
            assert!(Arc::ptr_eq(entry.lease(), now.lease()));
            assert_eq!(entry.lease().worker_id(), now.lease().worker_id());
            assert_eq!(now.version(), report.version);
        }
        assert_eq!(h.broker.created_subscriptions(), 2);
    }

    #[tokio::test]
    async fn vanished_topic_is_torn_down_and_its_subscription_deleted() {
        let (broker, cfg) = orders();
        let mut h = harness(cfg, &broker);
        h.reconciler.pass().await.unwrap();
        kinds(&mut h.events);

        broker.delete_topic("orders-b");
        let report = h.reconciler.pass().await.unwrap();
        assert_eq!((report.retained, report.removed), (1, 1));

        assert!(!h.registry.load().contains("projects/shop/topics/orders-b"));
        assert!(!broker.has_subscription("orders-b-aggregator"));
        assert!(broker.has_subscription("orders-a-aggregator"));

        let seen = kinds(&mut h.events);
        assert!(seen.contains(&EventKind::TopicRemoved));
        assert!(seen.contains(&EventKind::WorkerStopped));
    }

    #[tokio::test]
    async fn teardown_can_keep_subscriptions() {
        let (broker, cfg) = orders();
        let cfg = AggregatorConfig {
            delete_on_teardown: false,
            ..cfg
        };
        let mut h = harness(cfg, &broker);
        h.reconciler.pass().await.unwrap();

        broker.delete_topic("orders-a");
        let report = h.reconciler.pass().await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(broker.has_subscription("orders-a-aggregator"));
        assert!(broker.deleted_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn creation_conflict_reuses_the_existing_subscription() {
        let (broker, cfg) = orders();
        let topic = TopicName::qualified("shop", "orders-a");
        broker
            .create_subscription(&topic, &"orders-a-aggregator".into(), Duration::from_secs(10))
            .await
            .unwrap();

        let mut h = harness(cfg, &broker);
        let report = h.reconciler.pass().await.unwrap();
        assert_eq!((report.added, report.failed), (2, 0));
        // Only orders-b needed a fresh subscription.
        assert_eq!(broker.created_subscriptions(), 2);
        assert!(kinds(&mut h.events).contains(&EventKind::SubscriptionReused));

        broker.publish("orders-a", "pre-existing").unwrap();
        assert_eq!(h.output.recv().await.unwrap().data(), &Bytes::from("pre-existing"));
    }

    #[tokio::test]
    async fn failed_lookup_after_conflict_is_retried_next_pass() {
        let (broker, cfg) = orders();
        broker.delete_topic("orders-b");
        let topic = TopicName::qualified("shop", "orders-a");
        broker
            .create_subscription(&topic, &"orders-a-aggregator".into(), Duration::from_secs(10))
            .await
            .unwrap();
        broker.fail_next_get(BrokerError::unavailable("lookup"));
        let mut h = harness(cfg, &broker);

        let first = h.reconciler.pass().await.unwrap();
        assert_eq!((first.added, first.failed), (0, 1));
        assert!(h.registry.load().is_empty());
        let seen = kinds(&mut h.events);
        assert!(seen.contains(&EventKind::SubscriptionFailed));
        assert!(!seen.contains(&EventKind::SubscriptionReused));

        let second = h.reconciler.pass().await.unwrap();
        assert_eq!((second.added, second.failed), (1, 0));
        assert!(kinds(&mut h.events).contains(&EventKind::SubscriptionReused));
        assert_eq!(broker.created_subscriptions(), 1);
        assert!(broker.has_subscription("orders-a-aggregator"));
    }

    #[tokio::test]
    async fn other_creation_errors_are_retried_next_pass() {
        let (broker, cfg) = orders();
        broker.delete_topic("orders-b");
        broker.fail_next_create(BrokerError::unavailable("quota"));
        let mut h = harness(cfg, &broker);

        let first = h.reconciler.pass().await.unwrap();
        assert_eq!((first.added, first.failed), (0, 1));
        assert!(h.registry.load().is_empty());
        assert!(kinds(&mut h.events).contains(&EventKind::SubscriptionFailed));

        let second = h.reconciler.pass().await.unwrap();
        assert_eq!((second.added, second.failed), (1, 0));
    }

    #[tokio::test]
    async fn discovery_failure_keeps_the_previous_snapshot() {
        let (broker, cfg) = orders();
        let mut h = harness(cfg, &broker);
        h.reconciler.pass().await.unwrap();
        let before = h.registry.load();

        broker.delete_topic("orders-a");
        broker.fail_next_list_after(1, BrokerError::unavailable("listing"));
        let err = h.reconciler.pass().await.unwrap_err();
        assert_eq!(err.as_label(), "runtime_discovery_failed");
        assert!(Arc::ptr_eq(&before, &h.registry.load()));
        assert!(broker.has_subscription("orders-a-aggregator"));
    }

    #[tokio::test]
    async fn connect_failure_skips_the_pass() {
        let (broker, cfg) = orders();
        broker.fail_next_connect(BrokerError::unavailable("dns"));
        let mut h = harness(cfg, &broker);

        let err = h.reconciler.pass().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Connect { .. }));
        assert!(h.registry.load().version().is_none());
        assert_eq!(
            kinds(&mut h.events),
            vec![EventKind::PassStarted, EventKind::ConnectFailed]
        );

        let report = h.reconciler.pass().await.unwrap();
        assert_eq!(report.added, 2);
    }

    #[tokio::test]
    async fn delete_failure_does_not_block_teardown() {
        let (broker, cfg) = orders();
        let mut h = harness(cfg, &broker);
        h.reconciler.pass().await.unwrap();

        broker.delete_topic("orders-a");
        broker.fail_next_delete(BrokerError::unavailable("permission"));
        let report = h.reconciler.pass().await.unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(h.registry.load().len(), 1);
        assert!(broker.has_subscription("orders-a-aggregator"));
        assert!(kinds(&mut h.events).contains(&EventKind::SubscriptionDeleteFailed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn readers_only_ever_see_complete_snapshots() {
        let broker = MemoryBroker::new("shop");
        for i in 0..8 {
            broker.create_topic(&format!("t-{i}"));
        }
        let mut h = harness(AggregatorConfig::new("shop"), &broker);

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let registry = Arc::clone(&h.registry);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                let mut observed = 0u64;
                while !done.load(Ordering::Relaxed) {
                    let snap = registry.load();
                    assert!(snap.iter().all(|(_, e)| Some(e.version()) == snap.version()));
                    observed += 1;
                    tokio::task::yield_now().await;
                }
                observed
            })
        };

        for round in 0..6 {
            if round % 2 == 0 {
                for i in 0..4 {
                    broker.delete_topic(&format!("t-{i}"));
                }
            } else {
                for i in 0..4 {
                    broker.create_topic(&format!("t-{i}"));
                }
            }
            h.reconciler.pass().await.unwrap();
        }

        done.store(true, Ordering::Relaxed);
        assert!(reader.await.unwrap() > 0);
    }

    #[tokio::test]
    async fn queued_refresh_is_served_after_the_initial_pass() {
        let (broker, cfg) = orders();
        let mut h = harness(cfg.with_refresh_interval(Duration::from_secs(60)), &broker);
        let token = h.reconciler.runtime_token.clone();
        let (req_tx, req_rx) = mpsc::channel::<RefreshReply>(1);

        // Queued before the loop ever runs.
        let (reply_tx, reply_rx) = oneshot::channel();
        req_tx.send(reply_tx).await.unwrap();
        let task = tokio::spawn(h.reconciler.run(req_rx));

        let report = reply_rx.await.unwrap().unwrap();
        assert_eq!(report.version.get(), 2);
        assert_eq!((report.added, report.retained), (0, 2));

        let mut started = Vec::new();
        while let Ok(ev) = h.events.try_recv() {
            if ev.kind == EventKind::PassStarted {
                started.push(ev.version);
            }
        }
        assert_eq!(started, vec![Some(1), Some(2)]);

        token.cancel();
        time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run_stops_when_the_token_is_cancelled() {
        let (broker, cfg) = orders();
        let h = harness(cfg.with_refresh_interval(Duration::from_millis(10)), &broker);
        let token = h.reconciler.runtime_token.clone();
        let registry = Arc::clone(&h.registry);
        let (req_tx, req_rx) = mpsc::channel::<RefreshReply>(1);

        let task = tokio::spawn(h.reconciler.run(req_rx));
        let (reply_tx, reply_rx) = oneshot::channel();
        req_tx.send(reply_tx).await.unwrap();
        let report = reply_rx.await.unwrap().unwrap();
        assert_eq!(report.retained, 2, "the initial pass runs before the request");

        token.cancel();
        time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(registry.load().len(), 2);
    }
}
