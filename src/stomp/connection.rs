use bytes::Bytes;
use std::sync::Arc;

use crate::core::error::StompError;
use crate::core::message::Headers;
use crate::stomp::{AckMode, MessageListener, StompClient};

/// Name the delivery listener is registered under on the client.
pub const LISTENER_NAME: &str = "message_listener";

/// A STOMP client that owns the listener for its pushed frames.
///
/// The listener is registered in [`StompConnection::new`], before the client
/// performs any I/O.
pub struct StompConnection<C> {
    client: C,
    listener: Arc<MessageListener>,
}

impl<C: StompClient> StompConnection<C> {
    pub fn new(mut client: C, listener: MessageListener) -> Self {
        let listener = Arc::new(listener);
        client.set_listener(LISTENER_NAME, listener.clone());
        Self { client, listener }
    }

    pub fn listener(&self) -> &Arc<MessageListener> {
        &self.listener
    }

    /// Destination prefix the listener strips from incoming frames.
    pub fn prefix(&self) -> &str {
        self.listener.prefix()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn start(&mut self) -> Result<(), StompError> {
        self.client.start()
    }

    pub fn connect(
        &mut self,
        username: Option<&str>,
        passcode: Option<&str>,
        wait: bool,
    ) -> Result<(), StompError> {
        tracing::info!(
            target: "blipmq_stomp::connection",
            username = username.unwrap_or(""),
            "Connecting to broker"
        );
        self.client.connect(username, passcode, wait)
    }

    pub fn disconnect(&mut self) -> Result<(), StompError> {
        tracing::info!(target: "blipmq_stomp::connection", "Disconnecting from broker");
        self.client.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn subscribe(&mut self, destination: &str, ack: AckMode) -> Result<(), StompError> {
        tracing::debug!(target: "blipmq_stomp::connection", %destination, %ack, "SUBSCRIBE");
        self.client.subscribe(destination, ack)
    }

    pub fn unsubscribe(&mut self, destination: &str) -> Result<(), StompError> {
        tracing::debug!(target: "blipmq_stomp::connection", %destination, "UNSUBSCRIBE");
        self.client.unsubscribe(destination)
    }

    pub fn send(&mut self, destination: &str, body: Bytes, headers: &Headers) -> Result<(), StompError> {
        tracing::debug!(
            target: "blipmq_stomp::connection",
            %destination,
            bytes = body.len(),
            "SEND"
        );
        self.client.send(destination, body, headers)
    }

    pub fn ack(&mut self, message_id: &str) -> Result<(), StompError> {
        tracing::debug!(target: "blipmq_stomp::connection", %message_id, "ACK");
        self.client.ack(message_id)
    }
}
