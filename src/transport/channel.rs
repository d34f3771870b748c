use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConnectionConfig;
use crate::core::error::{StompError, TransportError};
use crate::core::message::{Delivery, Headers, TransportMessage};
use crate::core::properties::PropertiesFormat;
use crate::stomp::{AckMode, StompConnection, StompConnector};
use crate::transport::base::{BaseChannel, Binding};
use crate::transport::qos::StompQos;
use crate::transport::session::{SessionState, StompSession};
use crate::transport::{Channel, Qos};

/// Channel speaking STOMP.
///
/// Queues map onto `/queue/<prefix><queue>` destinations. Binding a queue
/// subscribes to its destination; deliveries from every subscription land in
/// one per-connection queue that [`Channel::get_many`] polls.
///
/// Operations on one channel are expected to come from one thread at a time.
pub struct StompChannel<K: StompConnector> {
    base: BaseChannel,
    session: Arc<Mutex<StompSession<K>>>,
    qos: StompQos<K>,
    prefix: String,
    format: PropertiesFormat,
}

impl<K: StompConnector> StompChannel<K> {
    pub fn new(connector: Arc<K>, config: &ConnectionConfig) -> Self {
        let session = Arc::new(Mutex::new(StompSession::new(connector, config)));
        Self {
            base: BaseChannel::new(),
            qos: StompQos::new(Arc::clone(&session)),
            session,
            prefix: config.transport_options.queue_name_prefix.clone(),
            format: config.transport_options.properties_format,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Broker destination for a logical queue name.
    pub fn queue_destination(&self, queue: &str) -> String {
        format!("/queue/{}{}", self.prefix, queue)
    }

    pub fn state(&self) -> SessionState {
        self.session.lock().state()
    }

    pub fn bindings(&self, queue: &str) -> Vec<Binding> {
        self.base.bindings(queue).to_vec()
    }

    /// Run `body` with the connected broker connection, see
    /// [`StompSession::conn_or_acquire`].
    pub fn conn_or_acquire<T>(
        &self,
        disconnect: bool,
        body: impl FnOnce(&mut StompConnection<K::Client>) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        self.session.lock().conn_or_acquire(disconnect, body)
    }
}

impl<K: StompConnector> Channel for StompChannel<K> {
    /// Pull the next delivery of the connection, whatever queue it came from.
    fn get_many(
        &mut self,
        _queues: &[&str],
        timeout: Option<Duration>,
    ) -> Result<Delivery, TransportError> {
        self.base.ensure_open()?;
        // the session lock is released before waiting on the queue
        let listener = self.session.lock().listener()?;
        listener
            .iter(timeout)
            .next()
            .unwrap_or(Err(TransportError::Empty))
    }

    fn put(&mut self, queue: &str, message: TransportMessage) -> Result<(), TransportError> {
        self.base.ensure_open()?;
        let destination = self.queue_destination(queue);
        let (body, headers) = message.into_inner().into_send_parts(self.format);
        self.conn_or_acquire(false, |conn| Ok(conn.send(&destination, body, &headers)?))
    }

    fn queue_bind(
        &mut self,
        queue: &str,
        exchange: Option<&str>,
        routing_key: &str,
        arguments: Option<&Headers>,
    ) -> Result<(), TransportError> {
        self.base.queue_bind(queue, exchange, routing_key, arguments)?;
        let destination = self.queue_destination(queue);
        self.conn_or_acquire(false, |conn| {
            Ok(conn.subscribe(&destination, AckMode::ClientIndividual)?)
        })
    }

    fn queue_unbind(
        &mut self,
        queue: &str,
        exchange: Option<&str>,
        routing_key: &str,
        _arguments: Option<&Headers>,
    ) -> Result<(), TransportError> {
        self.base.queue_unbind(queue, exchange, routing_key)?;
        let destination = self.queue_destination(queue);
        self.conn_or_acquire(false, |conn| Ok(conn.unsubscribe(&destination)?))
    }

    /// Close the channel and disconnect from the broker. Closing a channel
    /// whose connection is already gone succeeds.
    fn close(&mut self) -> Result<(), TransportError> {
        self.base.close();
        match self.session.lock().close() {
            Ok(()) | Err(StompError::NotConnected) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn qos(&mut self) -> &mut dyn Qos {
        &mut self.qos
    }
}
