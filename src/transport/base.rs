//! Framework-side bookkeeping shared by every transport.
//!
//! Adapters call into these explicitly before (or after) doing their own
//! broker work.

use std::collections::HashMap;

use crate::core::error::TransportError;
use crate::core::message::{DeliveryTag, Headers, TransportMessage};

/// One exchange → queue binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: Option<String>,
    pub routing_key: String,
    pub arguments: Headers,
}

/// Routing table and lifecycle state of a channel.
#[derive(Debug, Default)]
pub struct BaseChannel {
    bindings: HashMap<String, Vec<Binding>>,
    closed: bool,
}

impl BaseChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Record a binding; binding the same triple twice keeps a single entry.
    pub fn queue_bind(
        &mut self,
        queue: &str,
        exchange: Option<&str>,
        routing_key: &str,
        arguments: Option<&Headers>,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let binding = Binding {
            exchange: exchange.map(str::to_owned),
            routing_key: routing_key.to_owned(),
            arguments: arguments.cloned().unwrap_or_default(),
        };
        let entries = self.bindings.entry(queue.to_owned()).or_default();
        if !entries.contains(&binding) {
            entries.push(binding);
        }
        Ok(())
    }

    /// Drop the binding matching `exchange`/`routing_key`; a queue with no
    /// bindings left disappears from the table.
    pub fn queue_unbind(
        &mut self,
        queue: &str,
        exchange: Option<&str>,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        if let Some(entries) = self.bindings.get_mut(queue) {
            entries.retain(|b| !(b.exchange.as_deref() == exchange && b.routing_key == routing_key));
            if entries.is_empty() {
                self.bindings.remove(queue);
            }
        }
        Ok(())
    }

    pub fn bindings(&self, queue: &str) -> &[Binding] {
        self.bindings.get(queue).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bound_queues(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn close(&mut self) {
        self.bindings.clear();
        self.closed = true;
    }
}

/// Messages handed to consumers and not yet acknowledged.
#[derive(Debug, Default)]
pub struct BaseQos {
    unacked: HashMap<DeliveryTag, TransportMessage>,
}

impl BaseQos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: TransportMessage, delivery_tag: DeliveryTag) {
        self.unacked.insert(delivery_tag, message);
    }

    /// Settle a delivery; returns the message if it was outstanding.
    pub fn ack(&mut self, delivery_tag: &DeliveryTag) -> Option<TransportMessage> {
        self.unacked.remove(delivery_tag)
    }

    pub fn len(&self) -> usize {
        self.unacked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unacked.is_empty()
    }
}
