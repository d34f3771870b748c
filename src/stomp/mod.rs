//! STOMP side of the adapter.
//!
//! The wire protocol itself lives behind [`StompClient`]; this module only
//! defines that contract plus the pieces layered on top of it:
//!
//! * [`listener`] – turns pushed frames into queued deliveries
//! * [`connection`] – a client that owns exactly one listener
//! * [`memory`] – in-process broker implementing the contract

pub mod connection;
pub mod listener;
pub mod memory;

pub use connection::StompConnection;
pub use listener::{logical_queue_name, Deliveries, MessageListener};

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::core::error::StompError;
use crate::core::message::Headers;

/// Subscription acknowledgement modes defined by STOMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckMode {
    Auto,
    Client,
    /// Every message is acknowledged on its own.
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters used to build a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host_and_ports: Vec<(String, u16)>,
    /// Reconnect attempts the client may make on its own.
    pub reconnect_attempts_max: u32,
}

/// Receives frames pushed by the client's I/O thread.
pub trait FrameListener: Send + Sync {
    fn on_message(&self, headers: &Headers, body: Bytes);

    /// Hand over a frame only if that needs no waiting. `false` means the
    /// listener is full and did not take the frame.
    fn try_on_message(&self, headers: &Headers, body: Bytes) -> bool {
        self.on_message(headers, body);
        true
    }
}

/// A STOMP protocol connection.
///
/// Operations block until the broker round-trip completes. Implementations
/// report a missing connection as [`StompError::NotConnected`].
pub trait StompClient: Send {
    /// Start the client's background I/O.
    fn start(&mut self) -> Result<(), StompError>;

    /// Perform the CONNECT handshake; with `wait` set, return only once the
    /// broker has answered.
    fn connect(
        &mut self,
        username: Option<&str>,
        passcode: Option<&str>,
        wait: bool,
    ) -> Result<(), StompError>;

    fn disconnect(&mut self) -> Result<(), StompError>;

    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, destination: &str, ack: AckMode) -> Result<(), StompError>;

    fn unsubscribe(&mut self, destination: &str) -> Result<(), StompError>;

    fn send(&mut self, destination: &str, body: Bytes, headers: &Headers)
        -> Result<(), StompError>;

    fn ack(&mut self, message_id: &str) -> Result<(), StompError>;

    fn set_listener(&mut self, name: &str, listener: Arc<dyn FrameListener>);

    fn get_listener(&self, name: &str) -> Option<Arc<dyn FrameListener>>;
}

/// Builds clients for a channel.
pub trait StompConnector: Send + Sync {
    type Client: StompClient;

    fn build(&self, params: &ConnectParams) -> Self::Client;
}
