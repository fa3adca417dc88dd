//! # In-memory broker.
//!
//! [`MemoryBroker`] implements [`Broker`] and [`Connector`] on top of tokio
//! channels. It is a complete local backend (topics, subscriptions, fan-out on
//! publish, ack/nack with redelivery) and the test double for the runtime.
//!
//! ## Model
//! ```text
//! publish(topic, data)
//!     └─► for every subscription attached to topic:
//!           unbounded queue ──► pull() ──► Message{ acker = MemoryAcker }
//!                                             ├─ ack  → recorded, forgotten
//!                                             └─ nack → recorded, re-queued (attempt + 1)
//! ```
//!
//! ## Rules
//! - Topic listing is paginated by `page_size`; each page is read from the
//!   current topic set only when the stream reaches it.
//! - Deleting a topic keeps its subscriptions (they are detached, not removed).
//! - Deleting a subscription closes its queue: pending pulls resolve with `NotFound`.
//! - Faults are queued per operation and consumed one call at a time.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::broker::client::{Broker, BrokerRef, Connector, TopicStream};
use crate::broker::message::{Acknowledge, Message};
use crate::broker::names::{Subscription, SubscriptionName, TopicName};
use crate::error::BrokerError;

const DEFAULT_PAGE_SIZE: usize = 100;

/// Cheaply cloneable handle to an in-memory pub/sub project.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    project: String,
    page_size: usize,
    next_id: AtomicU64,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    topics: BTreeSet<TopicName>,
    subscriptions: HashMap<SubscriptionName, Queue>,
    /// Delivered but not yet acknowledged, keyed by (subscription, message id).
    unacked: HashMap<(SubscriptionName, String), Pending>,
    acks: Vec<(String, bool)>,
    created: u64,
    deleted: Vec<SubscriptionName>,
    faults: Faults,
}

struct Queue {
    subscription: Subscription,
    ack_deadline: Duration,
    tx: mpsc::UnboundedSender<Message>,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Message>>>,
}

struct Pending {
    topic: TopicName,
    data: Bytes,
    attempt: u32,
}

/// Position of a topic listing between two pages.
struct ListCursor {
    after: Option<TopicName>,
    served: usize,
    fault: Option<(usize, BrokerError)>,
}

#[derive(Default)]
struct Faults {
    connect: VecDeque<BrokerError>,
    list: VecDeque<(usize, BrokerError)>,
    create: VecDeque<BrokerError>,
    get: VecDeque<BrokerError>,
    delete: VecDeque<BrokerError>,
    pull: HashMap<SubscriptionName, VecDeque<BrokerError>>,
}

impl MemoryBroker {
    /// Creates an empty project.
    pub fn new(project: impl Into<String>) -> Self {
        Self::with_page_size(project, DEFAULT_PAGE_SIZE)
    }

    /// Creates an empty project whose topic listing yields pages of `page_size` (min 1).
    pub fn with_page_size(project: impl Into<String>, page_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                project: project.into(),
                page_size: page_size.max(1),
                next_id: AtomicU64::new(1),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn project(&self) -> &str {
        &self.inner.project
    }

    /// Returns this broker as a shared client handle.
    pub fn client(&self) -> BrokerRef {
        Arc::new(self.clone())
    }

    /// Creates topic `id` and returns its fully qualified name. Idempotent.
    pub fn create_topic(&self, id: &str) -> TopicName {
        let topic = TopicName::qualified(&self.inner.project, id);
        self.inner.lock().topics.insert(topic.clone());
        topic
    }

    /// Deletes topic `id`; returns whether it existed.
    pub fn delete_topic(&self, id: &str) -> bool {
        let topic = TopicName::qualified(&self.inner.project, id);
        self.inner.lock().topics.remove(&topic)
    }

    /// Sorted list of topic names.
    pub fn topics(&self) -> Vec<TopicName> {
        self.inner.lock().topics.iter().cloned().collect()
    }

    /// Publishes `data` on topic `id`; returns the number of subscriptions it reached.
    pub fn publish(&self, id: &str, data: impl Into<Bytes>) -> Result<usize, BrokerError> {
        let topic = TopicName::qualified(&self.inner.project, id);
        let data = data.into();
        let msg_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed).to_string();

        let mut state = self.inner.lock();
        if !state.topics.contains(&topic) {
            return Err(BrokerError::NotFound {
                resource: topic.to_string(),
            });
        }

        let mut delivered = 0;
        let mut pending = Vec::new();
        for (name, queue) in &state.subscriptions {
            if queue.subscription.topic() != &topic {
                continue;
            }
            let msg = self.inner.message(name, &msg_id, &topic, data.clone(), 1);
            if queue.tx.send(msg).is_ok() {
                delivered += 1;
                pending.push(name.clone());
            }
        }
        for name in pending {
            state.unacked.insert(
                (name, msg_id.clone()),
                Pending {
                    topic: topic.clone(),
                    data: data.clone(),
                    attempt: 1,
                },
            );
        }
        Ok(delivered)
    }

    /// Sorted list of existing subscription names.
    pub fn subscriptions(&self) -> Vec<SubscriptionName> {
        let mut names: Vec<_> = self.inner.lock().subscriptions.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn has_subscription(&self, name: &str) -> bool {
        self.inner.lock().subscriptions.contains_key(name)
    }

    /// Ack deadline the subscription was created with.
    pub fn ack_deadline(&self, name: &str) -> Option<Duration> {
        self.inner
            .lock()
            .subscriptions
            .get(name)
            .map(|q| q.ack_deadline)
    }

    /// Number of successful `create_subscription` calls so far.
    pub fn created_subscriptions(&self) -> u64 {
        self.inner.lock().created
    }

    /// Subscriptions removed through `delete_subscription`, in call order.
    pub fn deleted_subscriptions(&self) -> Vec<SubscriptionName> {
        self.inner.lock().deleted.clone()
    }

    /// Acknowledgments received so far as `(message id, positive)`.
    pub fn acknowledgments(&self) -> Vec<(String, bool)> {
        self.inner.lock().acks.clone()
    }

    /// Fails the next `connect` call.
    pub fn fail_next_connect(&self, err: BrokerError) {
        self.inner.lock().faults.connect.push_back(err);
    }

    /// Fails the next topic listing before its first item.
    pub fn fail_next_list(&self, err: BrokerError) {
        self.fail_next_list_after(0, err);
    }

    /// Fails the next topic listing after `items` successful items.
    pub fn fail_next_list_after(&self, items: usize, err: BrokerError) {
        self.inner.lock().faults.list.push_back((items, err));
    }

    /// Fails the next `create_subscription` call.
    pub fn fail_next_create(&self, err: BrokerError) {
        self.inner.lock().faults.create.push_back(err);
    }

    /// Fails the next `get_subscription` call.
    pub fn fail_next_get(&self, err: BrokerError) {
        self.inner.lock().faults.get.push_back(err);
    }

    /// Fails the next `delete_subscription` call.
    pub fn fail_next_delete(&self, err: BrokerError) {
        self.inner.lock().faults.delete.push_back(err);
    }

    /// Fails the next `count` pulls on subscription `name`.
    pub fn fail_next_pulls(&self, name: &str, count: usize, err: BrokerError) {
        let mut state = self.inner.lock();
        let queue = state
            .faults
            .pull
            .entry(SubscriptionName::from(name))
            .or_default();
        queue.extend(std::iter::repeat_n(err, count));
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave `State` half-updated in a
        // way that matters for a test double; keep serving.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Up to `page_size` topic names sorted strictly after `after`.
    fn page_after(&self, after: Option<&TopicName>) -> Vec<TopicName> {
        let lower = match after {
            Some(topic) => Bound::Excluded(topic),
            None => Bound::Unbounded,
        };
        self.lock()
            .topics
            .range::<TopicName, _>((lower, Bound::Unbounded))
            .take(self.page_size)
            .cloned()
            .collect()
    }

    fn message(
        self: &Arc<Self>,
        sub: &SubscriptionName,
        id: &str,
        topic: &TopicName,
        data: Bytes,
        attempt: u32,
    ) -> Message {
        Message::new(id, topic.clone(), data)
            .with_publish_time(SystemTime::now())
            .with_delivery_attempt(attempt)
            .with_acker(Arc::new(MemoryAcker {
                broker: Arc::downgrade(self),
                subscription: sub.clone(),
            }))
    }

    fn settle(self: &Arc<Self>, sub: &SubscriptionName, id: &str, positive: bool) {
        let mut state = self.lock();
        state.acks.push((id.to_string(), positive));

        let Some(pending) = state.unacked.remove(&(sub.clone(), id.to_string())) else {
            return;
        };
        if positive {
            return;
        }
        let attempt = pending.attempt + 1;
        let msg = self.message(sub, id, &pending.topic, pending.data.clone(), attempt);
        let requeued = match state.subscriptions.get(sub) {
            Some(queue) => queue.tx.send(msg).is_ok(),
            None => false,
        };
        if requeued {
            state.unacked.insert(
                (sub.clone(), id.to_string()),
                Pending { attempt, ..pending },
            );
        }
    }
}

/// Routes acknowledgments back to the owning broker (if still alive).
struct MemoryAcker {
    broker: Weak<Inner>,
    subscription: SubscriptionName,
}

impl Acknowledge for MemoryAcker {
    fn acknowledge(&self, id: &str, positive: bool) {
        if let Some(inner) = self.broker.upgrade() {
            inner.settle(&self.subscription, id, positive);
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn list_topics(&self) -> TopicStream {
        let inner = Arc::clone(&self.inner);
        let cursor = ListCursor {
            after: None,
            served: 0,
            fault: inner.lock().faults.list.pop_front(),
        };

        stream::unfold(Some(cursor), move |cursor| {
            let inner = Arc::clone(&inner);
            async move {
                let mut cursor = cursor?;
                let topics = inner.page_after(cursor.after.as_ref());
                let last_page = topics.len() < inner.page_size;

                if let Some((at, err)) = cursor.fault.take() {
                    if last_page || cursor.served + topics.len() >= at {
                        let keep = at.saturating_sub(cursor.served).min(topics.len());
                        let mut page: Vec<_> = topics.into_iter().take(keep).map(Ok).collect();
                        page.push(Err(err));
                        return Some((page, None));
                    }
                    cursor.fault = Some((at, err));
                }

                if topics.is_empty() {
                    return None;
                }
                cursor.served += topics.len();
                cursor.after = topics.last().cloned();
                Some((topics.into_iter().map(Ok).collect::<Vec<_>>(), Some(cursor)))
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn create_subscription(
        &self,
        topic: &TopicName,
        name: &SubscriptionName,
        ack_deadline: Duration,
    ) -> Result<Subscription, BrokerError> {
        let mut state = self.inner.lock();
        if let Some(err) = state.faults.create.pop_front() {
            return Err(err);
        }
        if state.subscriptions.contains_key(name) {
            return Err(BrokerError::AlreadyExists {
                resource: name.to_string(),
            });
        }
        if !state.topics.contains(topic) {
            return Err(BrokerError::NotFound {
                resource: topic.to_string(),
            });
        }

        let subscription = Subscription::new(name.clone(), topic.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscriptions.insert(
            name.clone(),
            Queue {
                subscription: subscription.clone(),
                ack_deadline,
                tx,
                rx: Arc::new(AsyncMutex::new(rx)),
            },
        );
        state.created += 1;
        Ok(subscription)
    }

    async fn get_subscription(&self, name: &SubscriptionName) -> Result<Subscription, BrokerError> {
        let mut state = self.inner.lock();
        if let Some(err) = state.faults.get.pop_front() {
            return Err(err);
        }
        state
            .subscriptions
            .get(name)
            .map(|q| q.subscription.clone())
            .ok_or_else(|| BrokerError::NotFound {
                resource: name.to_string(),
            })
    }

    async fn delete_subscription(&self, subscription: &Subscription) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();
        if let Some(err) = state.faults.delete.pop_front() {
            return Err(err);
        }
        let name = subscription.name();
        if state.subscriptions.remove(name).is_none() {
            return Err(BrokerError::NotFound {
                resource: name.to_string(),
            });
        }
        state.unacked.retain(|(sub, _), _| sub != name);
        state.deleted.push(name.clone());
        Ok(())
    }

    async fn pull(&self, subscription: &Subscription) -> Result<Message, BrokerError> {
        let rx = {
            let mut state = self.inner.lock();
            if let Some(err) = state
                .faults
                .pull
                .get_mut(subscription.name())
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }
            match state.subscriptions.get(subscription.name()) {
                Some(queue) => Arc::clone(&queue.rx),
                None => {
                    return Err(BrokerError::NotFound {
                        resource: subscription.name().to_string(),
                    });
                }
            }
        };

        let mut rx = rx.lock().await;
        rx.recv().await.ok_or_else(|| BrokerError::NotFound {
            resource: subscription.name().to_string(),
        })
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, project: &str) -> Result<BrokerRef, BrokerError> {
        if let Some(err) = self.inner.lock().faults.connect.pop_front() {
            return Err(err);
        }
        if project != self.inner.project {
            return Err(BrokerError::NotFound {
                resource: format!("projects/{project}"),
            });
        }
        Ok(self.client())
    }
}
