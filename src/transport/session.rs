use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::core::error::{StompError, TransportError};
use crate::core::properties::PropertiesFormat;
use crate::stomp::{ConnectParams, MessageListener, StompConnection, StompConnector};

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connected,
}

/// Lazily created broker connection of one channel.
///
/// The connection is built on first use and kept for the lifetime of the
/// session; only [`StompSession::disconnect`] tears it down. A session that
/// was [closed](StompSession::close) never connects again.
pub struct StompSession<K: StompConnector> {
    connector: Arc<K>,
    params: ConnectParams,
    username: Option<String>,
    passcode: Option<String>,
    prefix: String,
    format: PropertiesFormat,
    capacity: Option<usize>,
    conn: Option<StompConnection<K::Client>>,
    closed: bool,
}

impl<K: StompConnector> StompSession<K> {
    pub fn new(connector: Arc<K>, config: &ConnectionConfig) -> Self {
        let options = &config.transport_options;
        Self {
            connector,
            params: config.connect_params(),
            username: config.userid.clone(),
            passcode: config.password.clone(),
            prefix: options.queue_name_prefix.clone(),
            format: options.properties_format,
            capacity: options.delivery_queue_capacity,
            conn: None,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn state(&self) -> SessionState {
        match &self.conn {
            Some(conn) if conn.is_connected() => SessionState::Connected,
            _ => SessionState::Unconnected,
        }
    }

    /// Run `body` against a connected connection.
    ///
    /// Builds the connection if needed and, when the broker reports it is
    /// not connected, starts it and performs a blocking CONNECT with the
    /// configured credentials. With `disconnect` set the connection is
    /// disconnected once `body` returns; the body's error wins over a
    /// disconnect error. Fails with [`TransportError::Closed`] once the
    /// session is closed.
    pub fn conn_or_acquire<T>(
        &mut self,
        disconnect: bool,
        body: impl FnOnce(&mut StompConnection<K::Client>) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let conn = self.conn.get_or_insert_with(|| {
            let listener = match self.capacity {
                Some(capacity) => MessageListener::with_capacity(self.prefix.clone(), capacity),
                None => MessageListener::new(self.prefix.clone()),
            };
            StompConnection::new(
                self.connector.build(&self.params),
                listener.with_format(self.format),
            )
        });

        if !conn.is_connected() {
            conn.start()?;
            conn.connect(self.username.as_deref(), self.passcode.as_deref(), true)?;
        }

        let result = body(conn);

        if disconnect {
            if let Err(error) = conn.disconnect() {
                if result.is_ok() {
                    return Err(error.into());
                }
                tracing::warn!(%error, "Disconnect after failed operation also failed");
            }
        }
        result
    }

    /// Listener of the (connected) connection.
    pub fn listener(&mut self) -> Result<Arc<MessageListener>, TransportError> {
        self.conn_or_acquire(false, |conn| Ok(Arc::clone(conn.listener())))
    }

    /// Disconnect and drop the connection. A connection that was never built
    /// has nothing to disconnect.
    pub fn disconnect(&mut self) -> Result<(), StompError> {
        match self.conn.as_mut() {
            Some(conn) => {
                let outcome = conn.disconnect();
                if outcome.is_ok() || matches!(outcome, Err(StompError::NotConnected)) {
                    self.conn = None;
                }
                outcome
            }
            None => Err(StompError::NotConnected),
        }
    }

    /// Mark the session closed, then disconnect.
    pub fn close(&mut self) -> Result<(), StompError> {
        self.closed = true;
        self.disconnect()
    }
}
