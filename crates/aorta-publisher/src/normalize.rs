//! The message normalizer: fills in the fields every durable, trackable
//! message needs before it touches the buffer.

use aorta_common::clock::Clock;
use aorta_common::error::AortaError;
use aorta_common::message::{Message, MessageClass};
use aorta_common::value::Value;
use aorta_common::Result;

const PROPERTY_MESSAGE_CLASS: &str = "message_class";
const PROPERTY_EVENT_OBSERVED: &str = "event_observed";
const PROPERTY_EVENT_OCCURRED: &str = "event_occurred";

/// Hook for validating or rewriting a message's properties just before it
/// is persisted. The default implementation accepts everything unchanged;
/// binaries that need to strip properties or enforce a schema per
/// deployment implement this trait instead of forking the normalizer.
pub trait PropertyCleaner: Send + Sync {
    fn clean_properties(&self, message: &mut Message) -> Result<()> {
        let _ = message;
        Ok(())
    }
}

/// The default cleaner: leaves properties untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCleaner;

impl PropertyCleaner for IdentityCleaner {}

/// Normalizes `message` in place: marks it durable, zeroes its delivery
/// count, stamps a creation time if one wasn't already set, assigns a
/// random id/correlation id if either is missing, stamps its
/// `message_class` and (for events) its observed/occurred timestamps,
/// then runs `cleaner`.
pub fn normalize(message: &mut Message, clock: &dyn Clock, cleaner: &dyn PropertyCleaner) -> Result<()> {
    message.durable = true;
    message.delivery_count = 0;
    if message.creation_time == 0 {
        message.creation_time = clock.now_unix();
    }
    if message.id.is_empty() {
        message.id = uuid::Uuid::new_v4().to_string();
    }
    if message.correlation_id.is_none() {
        message.correlation_id = Some(uuid::Uuid::new_v4().to_string());
    }

    message
        .properties
        .insert(PROPERTY_MESSAGE_CLASS.to_string(), Value::String(message.message_class.as_str().to_string()));

    if message.message_class == MessageClass::Event {
        let now = clock.now_unix();
        message
            .properties
            .entry(PROPERTY_EVENT_OBSERVED.to_string())
            .or_insert(Value::Int(now));
        message
            .properties
            .entry(PROPERTY_EVENT_OCCURRED.to_string())
            .or_insert(Value::Int(now));
        if message.body.is_empty() {
            message.body = serde_json::to_vec(&serde_json::json!({})).map_err(|e| AortaError::Validation(e.to_string()))?;
        }
    }

    cleaner.clean_properties(message)
}
