use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::TransportError;
use crate::core::message::{DeliveryTag, TransportMessage};
use crate::stomp::StompConnector;
use crate::transport::base::BaseQos;
use crate::transport::session::StompSession;
use crate::transport::Qos;

/// QoS that turns a local acknowledgment into a broker ACK.
///
/// Remembers, per delivery tag, the broker message id the message arrived
/// with. Messages that never came from the broker map to `None` and are
/// settled locally only.
pub struct StompQos<K: StompConnector> {
    base: BaseQos,
    ids: HashMap<DeliveryTag, Option<String>>,
    session: Arc<Mutex<StompSession<K>>>,
}

impl<K: StompConnector> StompQos<K> {
    pub fn new(session: Arc<Mutex<StompSession<K>>>) -> Self {
        Self {
            base: BaseQos::new(),
            ids: HashMap::new(),
            session,
        }
    }

    /// Broker id recorded for `delivery_tag`, if any.
    pub fn broker_id(&self, delivery_tag: &DeliveryTag) -> Option<&str> {
        self.ids.get(delivery_tag).and_then(|id| id.as_deref())
    }

    fn stomp_ack(&mut self, delivery_tag: &DeliveryTag) -> Result<(), TransportError> {
        let Some(message_id) = self
            .ids
            .remove(delivery_tag)
            .flatten()
            .filter(|id| !id.is_empty())
        else {
            return Ok(());
        };

        self.session
            .lock()
            .conn_or_acquire(false, |conn| Ok(conn.ack(&message_id)?))
    }
}

impl<K: StompConnector> Qos for StompQos<K> {
    fn append(&mut self, message: TransportMessage, delivery_tag: DeliveryTag) {
        let broker_id = message.broker_message_id().map(str::to_owned);
        self.base.append(message, delivery_tag.clone());
        self.ids.insert(delivery_tag, broker_id);
    }

    /// ACK on the broker first, then settle locally; a failed broker ACK
    /// leaves the message unacked. Nothing is settled once the channel is
    /// closed.
    fn ack(&mut self, delivery_tag: &DeliveryTag) -> Result<(), TransportError> {
        if self.session.lock().is_closed() {
            return Err(TransportError::Closed);
        }
        self.stomp_ack(delivery_tag)?;
        self.base.ack(delivery_tag);
        Ok(())
    }

    fn unacked_len(&self) -> usize {
        self.base.len()
    }
}
