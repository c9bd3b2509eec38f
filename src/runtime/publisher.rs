//! Publish requests handed to the runtime from other tasks.
//!
//! The client is owned by the event loop. Tasks that only need to publish get
//! a [`PublisherHandle`] instead, which queues requests on an `embassy-sync`
//! channel the event loop drains.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};

/// A QoS 0 publish, sent via channel from a task to the runtime.
///
/// This struct holds references to the topic and payload, which must outlive
/// the request. For static topics/payloads (common in embedded), use `'static`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishRequest<'a> {
    /// The topic to publish to
    pub topic: &'a str,
    /// The payload bytes
    pub payload: &'a [u8],
}

pub type PublishRequestChannel<'a, const OUTBOX_DEPTH: usize> =
    Channel<CriticalSectionRawMutex, PublishRequest<'a>, OUTBOX_DEPTH>;

pub type PublishRequestSender<'a, const OUTBOX_DEPTH: usize> =
    Sender<'a, CriticalSectionRawMutex, PublishRequest<'a>, OUTBOX_DEPTH>;

pub type PublishRequestReceiver<'a, const OUTBOX_DEPTH: usize> =
    Receiver<'a, CriticalSectionRawMutex, PublishRequest<'a>, OUTBOX_DEPTH>;

/// A handle that allows tasks to publish MQTT messages without direct
/// access to the `MqttClient`.
///
/// Requests queued while the client is not connected are dropped by the
/// runtime; nothing is stored for later.
#[derive(Clone, Copy)]
pub struct PublisherHandle<'a, const OUTBOX_DEPTH: usize> {
    tx: PublishRequestSender<'a, OUTBOX_DEPTH>,
}

impl<'a, const OUTBOX_DEPTH: usize> PublisherHandle<'a, OUTBOX_DEPTH> {
    pub fn new(tx: PublishRequestSender<'a, OUTBOX_DEPTH>) -> Self {
        Self { tx }
    }

    /// Queues a publish, waiting while the channel is full.
    pub async fn publish(&self, topic: &'a str, payload: &'a [u8]) {
        self.tx.send(PublishRequest { topic, payload }).await;
    }

    /// Queues a publish without waiting.
    ///
    /// Returns `false` if the channel is full.
    pub fn try_publish(&self, topic: &'a str, payload: &'a [u8]) -> bool {
        self.tx.try_send(PublishRequest { topic, payload }).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn requests_arrive_in_order() {
        static CHANNEL: PublishRequestChannel<'static, 4> = Channel::new();
        let publisher = PublisherHandle::new(CHANNEL.sender());
        let rx = CHANNEL.receiver();

        block_on(async {
            publisher.publish("a", b"1").await;
            publisher.publish("b", b"2").await;
            assert_eq!(rx.receive().await.topic, "a");
            assert_eq!(
                rx.receive().await,
                PublishRequest {
                    topic: "b",
                    payload: b"2"
                }
            );
        });
    }

    #[test]
    fn try_publish_reports_a_full_channel() {
        static CHANNEL: PublishRequestChannel<'static, 1> = Channel::new();
        let publisher = PublisherHandle::new(CHANNEL.sender());

        assert!(publisher.try_publish("t", b"x"));
        assert!(!publisher.try_publish("t", b"y"));
        assert_eq!(CHANNEL.try_receive().map(|r| r.payload), Ok(&b"x"[..]));
        assert!(publisher.try_publish("t", b"z"));
    }
}
