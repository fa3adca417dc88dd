//! # Messages delivered through the fan-in output.
//!
//! A [`Message`] is forwarded to the consumer exactly as the broker produced it.
//! It carries the topic it was pulled from so consumers can attribute it without
//! parsing attributes.
//!
//! Acknowledgment is the consumer's job: call [`Message::ack`] once the message is
//! processed, or [`Message::nack`] to ask the broker for redelivery. Dropping a
//! message without acknowledging leaves it to the broker's ack deadline.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::broker::names::TopicName;

/// Acknowledgment capability attached to a message by the broker client.
pub trait Acknowledge: Send + Sync + 'static {
    /// `true` acknowledges the message, `false` requests redelivery.
    fn acknowledge(&self, id: &str, positive: bool);
}

/// Payload plus delivery metadata, as obtained from the broker.
pub struct Message {
    id: Arc<str>,
    topic: TopicName,
    data: Bytes,
    attributes: HashMap<String, String>,
    publish_time: SystemTime,
    delivery_attempt: Option<u32>,
    acker: Option<Arc<dyn Acknowledge>>,
}

impl Message {
    /// Creates a message without an acknowledgment capability.
    pub fn new(id: impl Into<Arc<str>>, topic: TopicName, data: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            topic,
            data: data.into(),
            attributes: HashMap::new(),
            publish_time: SystemTime::now(),
            delivery_attempt: None,
            acker: None,
        }
    }

    /// Attaches broker attributes.
    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Sets the broker-side publish timestamp.
    pub fn with_publish_time(mut self, at: SystemTime) -> Self {
        self.publish_time = at;
        self
    }

    /// Sets the delivery attempt counter reported by the broker.
    pub fn with_delivery_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = Some(attempt);
        self
    }

    /// Attaches the acknowledgment capability.
    pub fn with_acker(mut self, acker: Arc<dyn Acknowledge>) -> Self {
        self.acker = Some(acker);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Topic the message was pulled from.
    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn publish_time(&self) -> SystemTime {
        self.publish_time
    }

    pub fn delivery_attempt(&self) -> Option<u32> {
        self.delivery_attempt
    }

    /// Positive or negative acknowledgment. Consumes the message.
    pub fn acknowledge(self, positive: bool) {
        if let Some(acker) = &self.acker {
            acker.acknowledge(&self.id, positive);
        }
    }

    pub fn ack(self) {
        self.acknowledge(true);
    }

    pub fn nack(self) {
        self.acknowledge(false);
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("len", &self.data.len())
            .field("attributes", &self.attributes)
            .field("delivery_attempt", &self.delivery_attempt)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, bool)>>);

    impl Acknowledge for Recorder {
        fn acknowledge(&self, id: &str, positive: bool) {
            self.0.lock().unwrap().push((id.to_string(), positive));
        }
    }

    #[test]
    fn ack_and_nack_reach_the_acker() {
        let rec = Arc::new(Recorder::default());
        let topic = TopicName::from("t");

        Message::new("1", topic.clone(), "a")
            .with_acker(rec.clone())
            .ack();
        Message::new("2", topic.clone(), "b")
            .with_acker(rec.clone())
            .nack();
        // no acker: silently ignored
        Message::new("3", topic, "c").ack();

        let log = rec.0.lock().unwrap().clone();
        assert_eq!(log, vec![("1".to_string(), true), ("2".to_string(), false)]);
    }
}
