use std::sync::Arc;

use super::aggregator::Aggregator;
use crate::{
    broker::Connector,
    core::AggregatorConfig,
    events::Bus,
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for constructing an [`Aggregator`].
pub struct AggregatorBuilder {
    cfg: AggregatorConfig,
    connector: Arc<dyn Connector>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl AggregatorBuilder {
    /// Creates a new builder with the given configuration and broker connector.
    pub fn new(cfg: AggregatorConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            cfg,
            connector,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (passes, topic churn, worker failures)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the aggregator.
    ///
    /// Spawns the subscriber workers, so it must be called inside a tokio runtime.
    /// With the `logging` feature a [`LogWriter`](crate::LogWriter) is added to the
    /// subscribers.
    pub fn build(self) -> Arc<Aggregator> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());

        #[allow(unused_mut)]
        let mut subscribers = self.subscribers;
        #[cfg(feature = "logging")]
        subscribers.push(Arc::new(crate::subscribers::LogWriter::new()));

        let subs = SubscriberSet::new(subscribers, bus.clone());
        Arc::new(Aggregator::new_internal(self.cfg, self.connector, bus, subs))
    }
}
