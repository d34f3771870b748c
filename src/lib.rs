//! blipmq-stomp – STOMP adapter for the blipmq virtual transport.
//!
//! This crate exports
//!  * `core`      – messages, properties codec, error types
//!  * `stomp`     – STOMP client contract, delivery listener, in-memory broker
//!  * `transport` – channel / QoS contracts and the STOMP channel adapter
//!  * `config`    – connection settings (TOML or `stomp://` URL)
//!
//! The STOMP transport is not registered implicitly: call
//! [`register_transport`] once at startup against the application's
//! [`TransportRegistry`].

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod config;
pub mod core;
pub mod logging;
pub mod stomp;
pub mod transport;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use crate::config::{load_config, Config, ConnectionConfig, TransportOptions};
pub use crate::core::error::{StompError, TransportError};
pub use crate::core::message::{DeliveryTag, NormalizedMessage, TransportMessage};
pub use crate::transport::{register_transport, Channel, Qos, StompChannel, TransportRegistry};
