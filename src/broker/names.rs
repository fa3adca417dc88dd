//! # Topic and subscription identifiers.
//!
//! [`TopicName`] and [`SubscriptionName`] are cheap-to-clone string newtypes
//! (`Arc<str>` inside) so they can travel in events, snapshots and messages
//! without reallocating.
//!
//! Topic names are usually fully qualified (`projects/{project}/topics/{id}`).
//! [`TopicName::short_name`] strips the prefix; subscription names are built from
//! the short name plus the aggregator's suffix.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

const TOPICS_SEGMENT: &str = "/topics/";

/// Opaque topic identifier, unique within a project.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicName(Arc<str>);

impl TopicName {
    /// Wraps a topic name as reported by the broker.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Builds the fully qualified name `projects/{project}/topics/{id}`.
    pub fn qualified(project: &str, id: &str) -> Self {
        Self(format!("projects/{project}{TOPICS_SEGMENT}{id}").into())
    }

    /// Returns the name exactly as the broker reported it.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the topic id after `/topics/`, or the whole name when unqualified.
    ///
    /// ```
    /// use topicvisor::TopicName;
    ///
    /// assert_eq!(TopicName::new("projects/p/topics/orders-a").short_name(), "orders-a");
    /// assert_eq!(TopicName::new("orders-a").short_name(), "orders-a");
    /// ```
    pub fn short_name(&self) -> &str {
        match self.0.rfind(TOPICS_SEGMENT) {
            Some(pos) => &self.0[pos + TOPICS_SEGMENT.len()..],
            None => &self.0,
        }
    }

    /// Derives the subscription name this aggregator owns for the topic.
    pub fn subscription_name(&self, suffix: &str) -> SubscriptionName {
        SubscriptionName::new(format!("{}{suffix}", self.short_name()))
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl Borrow<str> for TopicName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TopicName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TopicName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<TopicName> for Arc<str> {
    fn from(value: TopicName) -> Self {
        value.0
    }
}

impl From<&TopicName> for Arc<str> {
    fn from(value: &TopicName) -> Self {
        Arc::clone(&value.0)
    }
}

/// Name of a broker-side subscription.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionName(Arc<str>);

impl SubscriptionName {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SubscriptionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl Borrow<str> for SubscriptionName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<&SubscriptionName> for Arc<str> {
    fn from(value: &SubscriptionName) -> Self {
        Arc::clone(&value.0)
    }
}

/// Handle to a broker-side subscription (a durable cursor on one topic).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    name: SubscriptionName,
    topic: TopicName,
}

impl Subscription {
    pub fn new(name: SubscriptionName, topic: TopicName) -> Self {
        Self { name, topic }
    }

    pub fn name(&self) -> &SubscriptionName {
        &self.name
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_name_uses_short_topic_and_suffix() {
        let topic = TopicName::qualified("infra-01", "adsmanager-eu");
        assert_eq!(topic.as_str(), "projects/infra-01/topics/adsmanager-eu");
        assert_eq!(
            topic.subscription_name("-monitor").as_str(),
            "adsmanager-eu-monitor"
        );
    }

    #[test]
    fn short_name_of_unqualified_topic_is_identity() {
        let topic = TopicName::from("plain");
        assert_eq!(topic.short_name(), "plain");
        assert_eq!(topic.subscription_name("").as_str(), "plain");
    }
}
