//! # Subscription registry: atomically swapped snapshots of active topic leases.
//!
//! The registry holds exactly one current [`RegistrySnapshot`] behind an
//! [`ArcSwap`]. Readers load it without locking; the reconciler (the only writer)
//! clones a working copy, mutates it, and publishes it with a single store.
//!
//! ## Architecture
//! ```text
//! Reconciler (single writer)                Readers (any task)
//!   working = registry.working_copy()         snap = registry.load()
//!   working.refresh(topic, v)                   └─► complete pre- or post-pass map
//!   working.insert(lease, v)
//!   condemned = working.sweep(v)
//!   registry.publish(working) ── one ArcSwap::store ──►
//! ```
//!
//! ## Rules
//! - A published snapshot is never mutated again.
//! - After `sweep(v)` every remaining entry carries version `v` (mark-and-sweep).
//! - Leases are shared (`Arc`) between consecutive snapshots; refreshing a
//!   version never replaces the lease, so the subscription handle and worker of
//!   a retained topic keep their identity.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::broker::{BrokerRef, Subscription, TopicName};
use crate::core::worker::WorkerHandle;

/// Identifier of a reconciliation pass; strictly increasing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Source of pass versions.
#[derive(Debug, Default)]
pub(crate) struct VersionClock {
    last: u64,
}

impl VersionClock {
    /// Returns a version greater than every version returned before.
    pub(crate) fn advance(&mut self) -> Version {
        self.last += 1;
        Version(self.last)
    }
}

/// One active topic: its subscription, the client that owns it, and its worker.
pub struct TopicLease {
    topic: TopicName,
    subscription: Subscription,
    broker: BrokerRef,
    worker: WorkerHandle,
}

impl TopicLease {
    pub(crate) fn new(
        topic: TopicName,
        subscription: Subscription,
        broker: BrokerRef,
        worker: WorkerHandle,
    ) -> Self {
        Self {
            topic,
            subscription,
            broker,
            worker,
        }
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Id of the consumption worker bound to this lease.
    pub fn worker_id(&self) -> u64 {
        self.worker.id()
    }

    pub(crate) fn broker(&self) -> &BrokerRef {
        &self.broker
    }

    pub(crate) fn worker(&self) -> &WorkerHandle {
        &self.worker
    }
}

impl fmt::Debug for TopicLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicLease")
            .field("topic", &self.topic)
            .field("subscription", self.subscription.name())
            .field("worker", &self.worker.id())
            .finish()
    }
}

/// Snapshot entry: a shared lease plus the version of the last pass that saw its topic.
#[derive(Clone, Debug)]
pub struct Entry {
    lease: Arc<TopicLease>,
    version: Version,
}

impl Entry {
    pub fn lease(&self) -> &Arc<TopicLease> {
        &self.lease
    }

    pub fn version(&self) -> Version {
        self.version
    }
}

/// Immutable mapping from topic to its active lease.
#[derive(Clone, Debug, Default)]
pub struct RegistrySnapshot {
    entries: HashMap<TopicName, Entry>,
    version: Option<Version>,
}

impl RegistrySnapshot {
    /// Version of the pass that published this snapshot (`None` before the first pass).
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    pub fn get(&self, topic: &str) -> Option<&Entry> {
        self.entries.get(topic)
    }

    /// Sorted list of active topics.
    pub fn topics(&self) -> Vec<TopicName> {
        let mut topics: Vec<TopicName> = self.entries.keys().cloned().collect();
        topics.sort_unstable();
        topics
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TopicName, &Entry)> {
        self.entries.iter()
    }

    /// Marks `topic` as observed by pass `version`. Returns `false` if it is not tracked.
    pub(crate) fn refresh(&mut self, topic: &TopicName, version: Version) -> bool {
        match self.entries.get_mut(topic) {
            Some(entry) => {
                entry.version = version;
                true
            }
            None => false,
        }
    }

    /// Tracks a freshly onboarded lease.
    pub(crate) fn insert(&mut self, lease: Arc<TopicLease>, version: Version) {
        self.entries
            .insert(lease.topic().clone(), Entry { lease, version });
    }

    /// Removes and returns every lease not observed by pass `version`.
    pub(crate) fn sweep(&mut self, version: Version) -> Vec<Arc<TopicLease>> {
        let stale: Vec<TopicName> = self
            .entries
            .iter()
            .filter(|(_, e)| e.version != version)
            .map(|(t, _)| t.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|t| self.entries.remove(&t))
            .map(|e| e.lease)
            .collect()
    }

    /// Removes and returns every lease.
    pub(crate) fn drain(&mut self) -> Vec<Arc<TopicLease>> {
        self.entries.drain().map(|(_, e)| e.lease).collect()
    }

    pub(crate) fn stamp(&mut self, version: Version) {
        self.version = Some(version);
    }
}

/// Holder of the current snapshot.
pub struct Registry {
    current: ArcSwap<RegistrySnapshot>,
}

impl Registry {
    /// Creates a registry holding an empty snapshot.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::default()),
        })
    }

    /// Returns the current snapshot.
    pub fn load(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Returns a mutable copy of the current snapshot (leases are shared, not cloned).
    pub(crate) fn working_copy(&self) -> RegistrySnapshot {
        self.current.load().as_ref().clone()
    }

    /// Makes `snapshot` the current one in a single atomic store.
    pub(crate) fn publish(&self, snapshot: RegistrySnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Publishes an empty snapshot and returns every lease of the previous one.
    pub(crate) fn take_all(&self) -> Vec<Arc<TopicLease>> {
        let previous = self.current.swap(Arc::new(RegistrySnapshot::default()));
        let mut snapshot = previous.as_ref().clone();
        snapshot.drain()
    }
}
