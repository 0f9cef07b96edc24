//! The message envelope carried through the buffer, router and publisher.
//!
//! This mirrors what the AMQP wire actually carries (durable flag,
//! delivery-count, properties, application-properties, annotations, body)
//! rather than the original's class hierarchy of message subtypes —
//! `message_class` becomes a plain discriminator field instead of a
//! distinct Rust type per class, since the routing/spool/publish logic
//! never depends on it beyond reading the value back out.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Discriminates the kind of payload a [`Message`] carries. Carried as an
/// ordinary application property (`x-aorta-message-class`) on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageClass {
    Event,
    Command,
}

impl MessageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageClass::Event => "event",
            MessageClass::Command => "command",
        }
    }
}

pub const APPLICATION_PROPERTY_MESSAGE_CLASS: &str = "x-aorta-message-class";

/// A durable message as it moves between the normalizer, spool, router and
/// publisher. Properties and annotations use the tagged-union [`Value`]
/// rather than AMQP's own restricted property map so router rules and
/// normalization logic can hold lists/maps in memory; wire encoding
/// narrows them at the edge (see [`crate::value::Value::to_simple_value`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub correlation_id: Option<String>,
    pub address: Option<String>,
    pub message_class: MessageClass,
    pub durable: bool,
    pub creation_time: i64,
    pub delivery_count: u32,
    pub properties: BTreeMap<String, Value>,
    pub annotations: BTreeMap<String, Value>,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(message_class: MessageClass, body: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            correlation_id: None,
            address: None,
            message_class,
            durable: false,
            creation_time: 0,
            delivery_count: 0,
            properties: BTreeMap::new(),
            annotations: BTreeMap::new(),
            body,
        }
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.annotations.get(key)
    }

    /// Looks an attribute name up along the router's attribute path:
    /// a handful of well-known envelope fields first, then properties,
    /// then annotations. Returns `None` if the attribute is absent
    /// everywhere, which callers treat as "does not match" for every
    /// operator except `notexists`.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "address" => return self.address.clone().map(Value::String),
            "id" => return Some(Value::String(self.id.clone())),
            "correlation_id" => return self.correlation_id.clone().map(Value::String),
            "message_class" => return Some(Value::String(self.message_class.as_str().to_string())),
            "durable" => return Some(Value::Bool(self.durable)),
            "delivery_count" => return Some(Value::Int(self.delivery_count as i64)),
            _ => {}
        }
        self.property(name)
            .or_else(|| self.annotation(name))
            .cloned()
    }
}

/// An opaque handle identifying one in-flight delivery attempt: 16 random
/// bytes, hex-encoded. Minted fresh for every `pop_due`/`track`, so retries
/// of the same message never share a delivery tag with an earlier attempt.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeliveryTag(pub String);

impl DeliveryTag {
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(hex::encode(bytes))
    }
}

impl Default for DeliveryTag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
