//! Virtual-transport contracts and the STOMP implementation of them.
//!
//! * [`Channel`] / [`Qos`] – what a transport must provide
//! * [`base`] – routing and unacked bookkeeping every transport reuses
//! * [`StompChannel`] / [`StompQos`] – the STOMP adapter
//! * [`TransportRegistry`] – alias table the host application fills at startup

pub mod base;
pub mod channel;
pub mod qos;
pub mod session;

pub use channel::StompChannel;
pub use qos::StompQos;
pub use session::{SessionState, StompSession};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConnectionConfig;
use crate::core::error::TransportError;
use crate::core::message::{Delivery, DeliveryTag, Headers, TransportMessage};
use crate::stomp::StompConnector;

/// Alias the STOMP transport registers under.
pub const STOMP_ALIAS: &str = "stomp";

/// Per-channel operations a transport implements.
pub trait Channel: Send {
    /// Next delivery for any of `queues`, waiting up to `timeout`.
    /// Fails with [`TransportError::Empty`] when nothing arrived.
    fn get_many(
        &mut self,
        queues: &[&str],
        timeout: Option<Duration>,
    ) -> Result<Delivery, TransportError>;

    fn put(&mut self, queue: &str, message: TransportMessage) -> Result<(), TransportError>;

    fn queue_bind(
        &mut self,
        queue: &str,
        exchange: Option<&str>,
        routing_key: &str,
        arguments: Option<&Headers>,
    ) -> Result<(), TransportError>;

    fn queue_unbind(
        &mut self,
        queue: &str,
        exchange: Option<&str>,
        routing_key: &str,
        arguments: Option<&Headers>,
    ) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;

    fn qos(&mut self) -> &mut dyn Qos;

    /// Fetch one message and register it as unacked under its delivery tag,
    /// the producer's when present, a fresh one otherwise.
    fn basic_get(
        &mut self,
        queue: &str,
        timeout: Option<Duration>,
    ) -> Result<TransportMessage, TransportError> {
        let delivery = self.get_many(&[queue], timeout)?;
        let mut message = TransportMessage::from(delivery);
        let tag = message
            .delivery_tag()
            .cloned()
            .unwrap_or_else(DeliveryTag::generate);
        message.set_delivery_tag(tag.clone());
        self.qos().append(message.clone(), tag);
        Ok(message)
    }

    fn basic_ack(&mut self, delivery_tag: &DeliveryTag) -> Result<(), TransportError> {
        self.qos().ack(delivery_tag)
    }
}

/// Acknowledgment bookkeeping of a channel.
pub trait Qos: Send {
    /// Track a message handed to a consumer under `delivery_tag`.
    fn append(&mut self, message: TransportMessage, delivery_tag: DeliveryTag);

    /// Settle the message tracked under `delivery_tag`. Unknown tags are
    /// not an error.
    fn ack(&mut self, delivery_tag: &DeliveryTag) -> Result<(), TransportError>;

    fn unacked_len(&self) -> usize;
}

/// Builds a channel for a connection configuration.
pub type ChannelFactory =
    Arc<dyn Fn(&ConnectionConfig) -> Box<dyn Channel> + Send + Sync>;

/// Alias → channel factory table.
///
/// Owned by the host application and passed by reference to whatever
/// registers transports.
#[derive(Default)]
pub struct TransportRegistry {
    aliases: DashMap<String, ChannelFactory>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `alias`, replacing any previous entry.
    pub fn register<F>(&self, alias: impl Into<String>, factory: F)
    where
        F: Fn(&ConnectionConfig) -> Box<dyn Channel> + Send + Sync + 'static,
    {
        let alias = alias.into();
        tracing::debug!(%alias, "Registering transport");
        self.aliases.insert(alias, Arc::new(factory));
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    pub fn aliases(&self) -> Vec<String> {
        self.aliases.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Open a channel of the transport registered under `alias`.
    pub fn open(
        &self,
        alias: &str,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn Channel>, TransportError> {
        let factory = self
            .aliases
            .get(alias)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransportError::UnknownTransport(alias.to_owned()))?;
        Ok(factory(config))
    }
}

/// Register the STOMP transport under [`STOMP_ALIAS`]; channels it opens
/// build their clients through `connector`.
pub fn register_transport<K>(registry: &TransportRegistry, connector: K)
where
    K: StompConnector + 'static,
    K::Client: 'static,
{
    let connector = Arc::new(connector);
    registry.register(STOMP_ALIAS, move |config: &ConnectionConfig| -> Box<dyn Channel> {
        Box::new(StompChannel::new(Arc::clone(&connector), config))
    });
}
