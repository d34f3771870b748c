use bytes::Bytes;
use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::time::Duration;

use crate::core::error::TransportError;
use crate::core::message::{
    Delivery, Envelope, Headers, NormalizedMessage, DESTINATION_HEADER, MESSAGE_ID_HEADER,
};
use crate::core::properties::PropertiesFormat;
use crate::stomp::FrameListener;

/// Strip `/queue/<prefix>` from a destination, leaving the logical queue name.
pub fn logical_queue_name<'a>(destination: &'a str, prefix: &str) -> Result<&'a str, TransportError> {
    destination
        .strip_prefix("/queue/")
        .and_then(|rest| rest.strip_prefix(prefix))
        .ok_or_else(|| TransportError::MalformedDestination {
            destination: destination.to_owned(),
            expected_prefix: format!("/queue/{prefix}"),
        })
}

/// Listener fed by the client's I/O thread.
///
/// Each pushed frame is normalized and queued; the consumer side pulls
/// deliveries through [`MessageListener::iter`]. Sender and receiver live
/// in the same struct, so the channel is never disconnected while the
/// listener exists.
#[derive(Debug)]
pub struct MessageListener {
    prefix: String,
    format: PropertiesFormat,
    tx: Sender<Delivery>,
    rx: Receiver<Delivery>,
}

impl MessageListener {
    /// Listener with an unbounded delivery queue.
    pub fn new(prefix: impl Into<String>) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            prefix: prefix.into(),
            format: PropertiesFormat::default(),
            tx,
            rx,
        }
    }

    /// Listener whose queue holds at most `capacity` deliveries; a push into
    /// a full queue waits for the consumer.
    pub fn with_capacity(prefix: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self {
            prefix: prefix.into(),
            format: PropertiesFormat::default(),
            tx,
            rx,
        }
    }

    pub fn with_format(mut self, format: PropertiesFormat) -> Self {
        self.format = format;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn format(&self) -> PropertiesFormat {
        self.format
    }

    /// Number of deliveries waiting to be pulled.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Normalize a pushed frame and queue it.
    ///
    /// Frames that cannot be normalized are dropped with a warning; the push
    /// callback has nobody to report to.
    pub fn receive(&self, headers: &Headers, body: Bytes) {
        let Some(delivery) = self.normalize(headers, body) else {
            return;
        };
        trace_queued(&delivery);
        if self.tx.send(delivery).is_err() {
            tracing::warn!(target: "blipmq_stomp::listener", "Delivery queue closed");
        }
    }

    /// Like [`receive`](Self::receive) but never waits: returns `false`, and
    /// keeps nothing, when a bounded queue is full. Dropped frames count as
    /// taken.
    pub fn try_receive(&self, headers: &Headers, body: Bytes) -> bool {
        let Some(delivery) = self.normalize(headers, body) else {
            return true;
        };
        trace_queued(&delivery);
        match self.tx.try_send(delivery) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!(target: "blipmq_stomp::listener", "Delivery queue closed");
                true
            }
        }
    }

    fn normalize(&self, headers: &Headers, body: Bytes) -> Option<Delivery> {
        self.to_delivery(headers, body)
            .map_err(|error| {
                tracing::warn!(
                    target: "blipmq_stomp::listener",
                    message_id = headers.get(MESSAGE_ID_HEADER).map(String::as_str),
                    %error,
                    "Dropping frame that cannot be delivered"
                );
            })
            .ok()
    }

    /// Turn a frame into a delivery: normalized message, broker id and
    /// logical queue name.
    pub fn to_delivery(&self, headers: &Headers, body: Bytes) -> Result<Delivery, TransportError> {
        let envelope = Envelope::new(headers.clone(), body);
        let broker_message_id = envelope
            .broker_message_id()
            .ok_or(TransportError::MissingHeader(MESSAGE_ID_HEADER))?
            .to_owned();
        let destination = envelope
            .destination()
            .ok_or(TransportError::MissingHeader(DESTINATION_HEADER))?;
        let queue = logical_queue_name(destination, &self.prefix)?.to_owned();
        let message = NormalizedMessage::from_envelope(&envelope, self.format)?;

        Ok(Delivery {
            message,
            broker_message_id,
            queue,
        })
    }

    /// Pull deliveries from the queue.
    ///
    /// With a non-zero `timeout` each pull waits up to that long; with `None`
    /// or zero it fails straight away with [`TransportError::Empty`] when
    /// nothing is queued. The iterator holds no cursor, so dropping it and
    /// calling `iter` again continues where the queue stands.
    pub fn iter(&self, timeout: Option<Duration>) -> Deliveries<'_> {
        Deliveries {
            rx: &self.rx,
            timeout: timeout.filter(|t| !t.is_zero()),
        }
    }
}

impl FrameListener for MessageListener {
    fn on_message(&self, headers: &Headers, body: Bytes) {
        self.receive(headers, body);
    }

    fn try_on_message(&self, headers: &Headers, body: Bytes) -> bool {
        self.try_receive(headers, body)
    }
}

fn trace_queued(delivery: &Delivery) {
    tracing::trace!(
        target: "blipmq_stomp::listener",
        message_id = %delivery.broker_message_id,
        queue = %delivery.queue,
        "Frame queued"
    );
}

/// Endless sequence of pulls from a listener's queue.
pub struct Deliveries<'a> {
    rx: &'a Receiver<Delivery>,
    timeout: Option<Duration>,
}

impl Iterator for Deliveries<'_> {
    type Item = Result<Delivery, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        let pulled = match self.timeout {
            Some(timeout) => self.rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => TransportError::Empty,
                RecvTimeoutError::Disconnected => TransportError::Closed,
            }),
            None => self.rx.try_recv().map_err(|e| match e {
                TryRecvError::Empty => TransportError::Empty,
                TryRecvError::Disconnected => TransportError::Closed,
            }),
        };
        Some(pulled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn headers(id: &str, destination: &str) -> Headers {
        [
            ("content-type", "application/json"),
            ("content-encoding", "utf-8"),
            ("message-id", id),
            ("destination", destination),
            ("timestamp", "1412068081608"),
            ("expires", "0"),
            ("priority", "4"),
            ("properties", r#"{"delivery_mode": 2}"#),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
    }

    #[test]
    fn logical_queue_name_strips_prefix() {
        assert_eq!(logical_queue_name("/queue/work.orders", "work.").unwrap(), "orders");
        assert_eq!(logical_queue_name("/queue/simple_queue", "").unwrap(), "simple_queue");
    }

    #[test]
    fn logical_queue_name_rejects_foreign_destinations() {
        for destination in ["/topic/orders", "/queue/other.orders", "orders"] {
            let err = logical_queue_name(destination, "work.").unwrap_err();
            assert!(matches!(err, TransportError::MalformedDestination { .. }));
        }
    }

    #[test]
    fn to_delivery_pairs_message_id_and_queue() {
        let listener = MessageListener::new("");
        let delivery = listener
            .to_delivery(&headers("ID:1", "/queue/simple_queue"), Bytes::from_static(b"body"))
            .unwrap();

        assert_eq!(delivery.broker_message_id, "ID:1");
        assert_eq!(delivery.queue, "simple_queue");
        assert_eq!(delivery.message.properties, json!({"delivery_mode": 2}));
        assert_eq!(delivery.message.body.as_ref(), b"body");
    }

    #[test]
    fn frames_without_message_id_are_not_queued() {
        let listener = MessageListener::new("");
        let mut h = headers("", "/queue/q");
        listener.receive(&h, Bytes::new());
        h.remove(MESSAGE_ID_HEADER);
        listener.receive(&h, Bytes::new());

        assert_eq!(listener.pending(), 0);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let listener = MessageListener::new("work.");
        // wrong prefix
        listener.receive(&headers("ID:1", "/queue/orders"), Bytes::new());
        // unparsable properties
        let mut h = headers("ID:2", "/queue/work.orders");
        h.insert("properties".into(), "{'not': json}".into());
        listener.receive(&h, Bytes::new());

        assert_eq!(listener.pending(), 0);
    }

    #[test]
    fn empty_queue_fails_immediately_without_timeout() {
        let listener = MessageListener::new("");
        let started = Instant::now();
        let pulled = listener.iter(None).next().unwrap();
        assert!(matches!(pulled, Err(TransportError::Empty)));

        let pulled = listener.iter(Some(Duration::ZERO)).next().unwrap();
        assert!(matches!(pulled, Err(TransportError::Empty)));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn pulls_are_fifo_and_resume_across_iterators() {
        let listener = MessageListener::new("");
        for id in ["ID:1", "ID:2", "ID:3"] {
            listener.on_message(&headers(id, "/queue/q"), Bytes::new());
        }

        let mut it = listener.iter(None);
        assert_eq!(it.next().unwrap().unwrap().broker_message_id, "ID:1");
        assert_eq!(it.next().unwrap().unwrap().broker_message_id, "ID:2");
        drop(it);

        let mut again = listener.iter(Some(Duration::from_millis(10)));
        assert_eq!(again.next().unwrap().unwrap().broker_message_id, "ID:3");
        assert!(again.next().unwrap().unwrap_err().is_empty());
    }

    #[test]
    fn timed_pull_waits_for_io_thread() {
        let listener = Arc::new(MessageListener::new(""));
        let producer = Arc::clone(&listener);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.on_message(&headers("ID:late", "/queue/q"), Bytes::new());
        });

        let delivery = listener
            .iter(Some(Duration::from_secs(5)))
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.broker_message_id, "ID:late");
        handle.join().unwrap();
    }

    #[test]
    fn try_receive_refuses_when_full() {
        let listener = MessageListener::with_capacity("", 1);
        assert!(listener.try_receive(&headers("ID:1", "/queue/q"), Bytes::new()));
        assert!(!listener.try_receive(&headers("ID:2", "/queue/q"), Bytes::new()));
        // undeliverable frames are dropped, not refused
        assert!(listener.try_receive(&headers("ID:3", "/topic/q"), Bytes::new()));
        assert_eq!(listener.pending(), 1);

        listener.iter(None).next().unwrap().unwrap();
        assert!(listener.try_receive(&headers("ID:2", "/queue/q"), Bytes::new()));
    }

    #[test]
    fn literal_format_reads_legacy_properties() {
        let listener = MessageListener::with_capacity("", 4).with_format(PropertiesFormat::Literal);
        let mut h = headers("ID:1", "/queue/q");
        h.insert("properties".into(), "{'delivery_tag': u'abc', 'delivery_mode': 2}".into());
        listener.receive(&h, Bytes::new());

        let delivery = listener.iter(None).next().unwrap().unwrap();
        assert_eq!(
            delivery.message.properties,
            json!({"delivery_tag": "abc", "delivery_mode": 2})
        );
    }
}
