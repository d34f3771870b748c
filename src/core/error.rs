use thiserror::Error;

/// Failures reported by a [`StompClient`](crate::stomp::StompClient) implementation.
///
/// `NotConnected` is kept apart from the rest because channel close treats it
/// as "already closed" rather than as a failure.
#[derive(Debug, Error)]
pub enum StompError {
    #[error("not connected to broker")]
    NotConnected,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors surfaced by the STOMP channel, QoS and listener.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No delivery arrived within the requested wait window.
    #[error("no message available")]
    Empty,
    #[error("malformed properties header: {reason}")]
    MalformedProperties { reason: String },
    #[error("frame is missing required header '{0}'")]
    MissingHeader(&'static str),
    #[error("destination '{destination}' does not start with '{expected_prefix}'")]
    MalformedDestination {
        destination: String,
        expected_prefix: String,
    },
    #[error("not connected to broker")]
    NotConnected,
    #[error("broker error: {0}")]
    Broker(#[source] StompError),
    #[error("channel is closed")]
    Closed,
    #[error("no transport registered under alias '{0}'")]
    UnknownTransport(String),
}

impl TransportError {
    pub(crate) fn malformed_properties(reason: impl Into<String>) -> Self {
        TransportError::MalformedProperties {
            reason: reason.into(),
        }
    }

    /// `true` for the routine "nothing to deliver" outcome of a poll.
    pub fn is_empty(&self) -> bool {
        matches!(self, TransportError::Empty)
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, TransportError::NotConnected)
    }
}

impl From<StompError> for TransportError {
    fn from(err: StompError) -> Self {
        match err {
            StompError::NotConnected => TransportError::NotConnected,
            other => TransportError::Broker(other),
        }
    }
}
