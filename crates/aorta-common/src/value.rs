//! A small tagged-union value type for dynamic message properties and
//! annotations.
//!
//! AMQP's `ApplicationProperties` map is restricted to
//! [`fe2o3_amqp_types::primitives::SimpleValue`], which excludes nested
//! lists and maps. Rule attributes and normalized message properties need
//! the fuller shape, so we define our own closed union here and provide
//! explicit, documented conversions to the wire types instead of reusing
//! `SimpleValue` (too narrow) or `serde_amqp::Value` (too wide, carries
//! described/array variants we never produce) directly.

use fe2o3_amqp_types::primitives::SimpleValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A property or annotation value attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Renders the value as a comparable string, used by the router's
    /// string-oriented operators (`startswith`, `endswith`, `matches`).
    pub fn to_comparable_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Binary(b) => hex::encode(b),
            Value::List(_) | Value::Map(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Converts to the wire-restricted `SimpleValue` used by
    /// `ApplicationProperties`. `List` and `Map` have no representation
    /// there, so they are lossily flattened to their JSON encoding; this
    /// is documented, not silent: callers that round-trip through the
    /// wire should prefer keeping structured values out of application
    /// properties and in the message body instead.
    pub fn to_simple_value(&self) -> SimpleValue {
        match self {
            Value::Null => SimpleValue::Null,
            Value::Bool(b) => SimpleValue::Bool(*b),
            Value::Int(i) => SimpleValue::Long(*i),
            Value::Float(f) => SimpleValue::Double(ordered_float::OrderedFloat(*f as f64)),
            Value::String(s) => SimpleValue::String(s.clone()),
            Value::Binary(b) => SimpleValue::Binary(b.clone().into()),
            Value::List(_) | Value::Map(_) => {
                SimpleValue::String(serde_json::to_string(self).unwrap_or_default())
            }
        }
    }

    pub fn from_simple_value(v: &SimpleValue) -> Value {
        match v {
            SimpleValue::Null => Value::Null,
            SimpleValue::Bool(b) => Value::Bool(*b),
            SimpleValue::Byte(n) => Value::Int(*n as i64),
            SimpleValue::Short(n) => Value::Int(*n as i64),
            SimpleValue::Int(n) => Value::Int(*n as i64),
            SimpleValue::Long(n) => Value::Int(*n),
            SimpleValue::UByte(n) => Value::Int(*n as i64),
            SimpleValue::UShort(n) => Value::Int(*n as i64),
            SimpleValue::UInt(n) => Value::Int(*n as i64),
            SimpleValue::ULong(n) => Value::Int(*n as i64),
            SimpleValue::Float(f) => Value::Float(f.into_inner() as f64),
            SimpleValue::Double(f) => Value::Float(f.into_inner()),
            SimpleValue::String(s) => Value::String(s.clone()),
            SimpleValue::Symbol(s) => Value::String(s.as_str().to_string()),
            SimpleValue::Binary(b) => Value::Binary(b.to_vec()),
            _ => Value::String(format!("{:?}", v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_value_round_trips_scalars() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Int(42),
            Value::String("hello".into()),
        ] {
            let simple = v.to_simple_value();
            assert_eq!(Value::from_simple_value(&simple), v);
        }
    }

    #[test]
    fn list_and_map_flatten_to_json_string_for_wire() {
        let v = Value::List(vec![Value::Int(1), Value::Int(2)]);
        match v.to_simple_value() {
            SimpleValue::String(s) => assert_eq!(s, "[1,2]"),
            other => panic!("expected string fallback, got {other:?}"),
        }
    }
}
