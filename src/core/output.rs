//! # Fan-in output stream.
//!
//! Every consumption worker holds a clone of one bounded `mpsc::Sender`; the
//! consumer holds the single [`MessageStream`]. The stream ends (`None`) once
//! the reconciler and every worker have dropped their senders, which only
//! happens after [`Aggregator::stop`](crate::Aggregator::stop).

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::broker::Message;

/// Merged, unbounded sequence of messages from every active topic.
///
/// Delivery order is preserved per topic; there is no ordering across topics.
/// Messages must be acknowledged by the consumer.
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::Receiver<Message>,
}

impl MessageStream {
    pub(crate) fn new(rx: mpsc::Receiver<Message>) -> Self {
        Self { rx }
    }

    /// Waits for the next message; `None` once the aggregator has fully stopped.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Returns a message if one is ready, without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl Stream for MessageStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::TopicName;
    use futures::StreamExt;

    #[tokio::test]
    async fn ends_when_every_sender_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        let mut stream = MessageStream::new(rx);
        let worker_tx = tx.clone();

        tokio::spawn(async move {
            worker_tx
                .send(Message::new("1", TopicName::from("t"), "x"))
                .await
                .unwrap();
        });
        drop(tx);

        let first = stream.next().await.unwrap();
        assert_eq!(first.id(), "1");
        assert!(stream.next().await.is_none());
    }
}
