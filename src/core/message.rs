use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use crate::core::error::TransportError;
use crate::core::properties::{self, PropertiesFormat};

/// STOMP header name → value, as delivered by the broker.
pub type Headers = BTreeMap<String, String>;

pub const MESSAGE_ID_HEADER: &str = "message-id";
pub const DESTINATION_HEADER: &str = "destination";
pub const PROPERTIES_HEADER: &str = "properties";
/// Property under which producers carry the message's delivery tag.
pub const DELIVERY_TAG_PROPERTY: &str = "delivery_tag";

/// Broker-owned headers that never reach the framework message.
pub const EXCLUDED_HEADERS: [&str; 5] = [
    DESTINATION_HEADER,
    "timestamp",
    MESSAGE_ID_HEADER,
    "expires",
    "priority",
];

/// A raw frame pushed by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub headers: Headers,
    pub body: Bytes,
}

impl Envelope {
    pub fn new(headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// The broker-assigned identifier, if the frame carries a non-empty one.
    pub fn broker_message_id(&self) -> Option<&str> {
        self.headers
            .get(MESSAGE_ID_HEADER)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn destination(&self) -> Option<&str> {
        self.headers.get(DESTINATION_HEADER).map(String::as_str)
    }
}

/// Framework-shaped message: pass-through headers, parsed properties, body.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub headers: Headers,
    pub properties: Value,
    pub body: Bytes,
}

impl NormalizedMessage {
    /// A message with no headers and an empty properties mapping.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            headers: Headers::new(),
            properties: Value::Object(Map::new()),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Build the framework message from a broker frame.
    ///
    /// Every header outside [`EXCLUDED_HEADERS`] is copied verbatim; the
    /// `properties` header is parsed with `format` and must be present.
    pub fn from_envelope(
        envelope: &Envelope,
        format: PropertiesFormat,
    ) -> Result<Self, TransportError> {
        let mut headers: Headers = envelope
            .headers
            .iter()
            .filter(|(name, _)| !EXCLUDED_HEADERS.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let raw = headers
            .remove(PROPERTIES_HEADER)
            .ok_or(TransportError::MissingHeader(PROPERTIES_HEADER))?;
        let properties = properties::decode(format, &raw)?;

        Ok(Self {
            headers,
            properties,
            body: envelope.body.clone(),
        })
    }

    /// Split into the body and the header set handed to `send`, with the
    /// properties serialized back into the `properties` header.
    pub fn into_send_parts(self, format: PropertiesFormat) -> (Bytes, Headers) {
        let mut headers = self.headers;
        headers.insert(
            PROPERTIES_HEADER.to_owned(),
            properties::encode(format, &self.properties),
        );
        (self.body, headers)
    }
}

/// One entry of the delivery queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: NormalizedMessage,
    pub broker_message_id: String,
    /// Logical queue name, destination prefix already stripped.
    pub queue: String,
}

/// Locally scoped handle the framework uses to acknowledge a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag(String);

impl DeliveryTag {
    /// A fresh random tag.
    pub fn generate() -> Self {
        DeliveryTag(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeliveryTag {
    fn from(s: &str) -> Self {
        DeliveryTag(s.to_owned())
    }
}

impl From<String> for DeliveryTag {
    fn from(s: String) -> Self {
        DeliveryTag(s)
    }
}

impl Deref for DeliveryTag {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Message handed to consumers: the normalized message plus the broker id it
/// arrived with. Locally built messages carry no broker id.
///
/// The delivery tag starts out as the `delivery_tag` property when the
/// producer set one.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMessage {
    message: NormalizedMessage,
    broker_message_id: Option<String>,
    delivery_tag: Option<DeliveryTag>,
}

impl TransportMessage {
    pub fn from_raw(message: NormalizedMessage) -> Self {
        Self {
            delivery_tag: tag_property(&message.properties),
            message,
            broker_message_id: None,
        }
    }

    pub fn from_delivery((message, broker_message_id): (NormalizedMessage, String)) -> Self {
        Self {
            delivery_tag: tag_property(&message.properties),
            message,
            broker_message_id: Some(broker_message_id),
        }
    }

    pub fn broker_message_id(&self) -> Option<&str> {
        self.broker_message_id.as_deref()
    }

    pub fn delivery_tag(&self) -> Option<&DeliveryTag> {
        self.delivery_tag.as_ref()
    }

    pub(crate) fn set_delivery_tag(&mut self, tag: DeliveryTag) {
        self.delivery_tag = Some(tag);
    }

    pub fn body(&self) -> &Bytes {
        &self.message.body
    }

    pub fn headers(&self) -> &Headers {
        &self.message.headers
    }

    pub fn properties(&self) -> &Value {
        &self.message.properties
    }

    pub fn into_inner(self) -> NormalizedMessage {
        self.message
    }
}

fn tag_property(properties: &Value) -> Option<DeliveryTag> {
    properties
        .get(DELIVERY_TAG_PROPERTY)
        .and_then(Value::as_str)
        .filter(|tag| !tag.is_empty())
        .map(DeliveryTag::from)
}

impl From<NormalizedMessage> for TransportMessage {
    fn from(message: NormalizedMessage) -> Self {
        TransportMessage::from_raw(message)
    }
}

impl From<(NormalizedMessage, String)> for TransportMessage {
    fn from(pair: (NormalizedMessage, String)) -> Self {
        TransportMessage::from_delivery(pair)
    }
}

impl From<Delivery> for TransportMessage {
    fn from(delivery: Delivery) -> Self {
        TransportMessage::from_delivery((delivery.message, delivery.broker_message_id))
    }
}
