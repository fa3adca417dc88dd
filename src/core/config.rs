//! # Aggregator configuration.
//!
//! Provides [`AggregatorConfig`], the settings for one aggregator instance.
//!
//! ## Sentinel values
//! - `refresh_interval = 0s` → clamped to 1ms (a ticker cannot have a zero period)
//! - `bus_capacity = 0`, `output_capacity = 0` → clamped to 1
//! - `drain_grace = 0s` → an already-pulled message is released immediately on teardown

use std::time::Duration;

use crate::broker::{SubscriptionName, TopicName};
use crate::core::discovery::TopicFilter;
use crate::policies::BackoffPolicy;

/// Configuration of an [`Aggregator`](crate::Aggregator).
///
/// Defines:
/// - **Target**: project, topic filter, subscription suffix
/// - **Reconciliation**: refresh interval, teardown behavior
/// - **Workers**: pull backoff, drain grace, ack deadline for new subscriptions
/// - **Runtime**: shutdown grace, bus and output capacities
///
/// All fields are public. Prefer the helper accessors over sprinkling sentinel
/// checks across the codebase.
#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    /// Project / namespace whose topics are aggregated.
    pub project: String,

    /// Period between reconciliation passes (the first pass runs immediately).
    pub refresh_interval: Duration,

    /// Appended to the topic's short name to form subscription names.
    ///
    /// Distinguishes subscriptions owned by this instance from anyone else's.
    pub subscription_suffix: String,

    /// Which topics to aggregate.
    pub filter: TopicFilter,

    /// Ack deadline requested when creating subscriptions.
    pub ack_deadline: Duration,

    /// Delete the broker-side subscription when a topic is torn down by a pass.
    ///
    /// [`Aggregator::stop`](crate::Aggregator::stop) takes its own flag.
    pub delete_on_teardown: bool,

    /// Delay policy between failed pulls.
    pub pull_backoff: BackoffPolicy,

    /// How long a cancelled worker may still wait for the consumer to take a
    /// message it already pulled. Past it the message is nacked.
    pub drain_grace: Duration,

    /// Maximum time to wait for workers to exit on teardown and stop before aborting them.
    pub grace: Duration,

    /// Capacity of the event bus ring buffer.
    pub bus_capacity: usize,

    /// Capacity of the fan-in output channel (1 = hand-off, the closest to unbuffered).
    pub output_capacity: usize,
}

impl AggregatorConfig {
    /// Creates a configuration for `project` with default settings.
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    /// Replaces the topic filter.
    pub fn with_filter(mut self, filter: TopicFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Replaces the subscription suffix.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.subscription_suffix = suffix.into();
        self
    }

    /// Replaces the refresh interval.
    pub fn with_refresh_interval(mut self, every: Duration) -> Self {
        self.refresh_interval = every;
        self
    }

    /// Returns the refresh interval, clamped to a minimum of 1ms.
    #[inline]
    pub fn refresh_interval_clamped(&self) -> Duration {
        self.refresh_interval.max(Duration::from_millis(1))
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns an output capacity clamped to a minimum of 1.
    #[inline]
    pub fn output_capacity_clamped(&self) -> usize {
        self.output_capacity.max(1)
    }

    /// Subscription name this aggregator owns for `topic`.
    #[inline]
    pub fn subscription_name(&self, topic: &TopicName) -> SubscriptionName {
        topic.subscription_name(&self.subscription_suffix)
    }
}

impl Default for AggregatorConfig {
    /// Default configuration:
    ///
    /// - `project = ""` (set it)
    /// - `refresh_interval = 60s`
    /// - `subscription_suffix = "-aggregator"`
    /// - `filter = TopicFilter::all()`
    /// - `ack_deadline = 600s`
    /// - `delete_on_teardown = true`
    /// - `pull_backoff = BackoffPolicy::default()`
    /// - `drain_grace = 5s`
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    /// - `output_capacity = 1`
    fn default() -> Self {
        Self {
            project: String::new(),
            refresh_interval: Duration::from_secs(60),
            subscription_suffix: "-aggregator".to_string(),
            filter: TopicFilter::all(),
            ack_deadline: Duration::from_secs(600),
            delete_on_teardown: true,
            pull_backoff: BackoffPolicy::default(),
            drain_grace: Duration::from_secs(5),
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            output_capacity: 1,
        }
    }
}
