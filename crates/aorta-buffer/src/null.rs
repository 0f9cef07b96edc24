//! An in-memory [`Buffer`] with no durability, for tests and local dev
//! runs that don't need a real spool directory on disk.

use crate::buffer::{Buffer, DeliveryRecord};
use crate::error::Result;
use aorta_common::message::{DeliveryTag, Message};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct NullBuffer {
    queued: Mutex<Vec<(i64, Message)>>,
    in_flight: Mutex<BTreeMap<DeliveryTag, Message>>,
}

impl NullBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Buffer for NullBuffer {
    async fn enqueue(&self, message: Message, not_before: i64) -> Result<()> {
        self.queued.lock().unwrap().push((not_before, message));
        Ok(())
    }

    async fn pop_due(&self, now: i64) -> Result<Option<(DeliveryTag, Message)>> {
        let mut queued = self.queued.lock().unwrap();
        let pos = queued.iter().position(|(nbf, _)| *nbf <= now);
        Ok(pos.map(|i| {
            let (_, message) = queued.remove(i);
            (DeliveryTag::new(), message)
        }))
    }

    async fn track(&self, record: DeliveryRecord) -> Result<()> {
        self.in_flight.lock().unwrap().insert(record.tag, record.message);
        Ok(())
    }

    async fn get(&self, tag: &DeliveryTag) -> Result<Option<Message>> {
        Ok(self.in_flight.lock().unwrap().get(tag).cloned())
    }

    async fn on_accepted(&self, tag: &DeliveryTag) -> Result<()> {
        self.in_flight.lock().unwrap().remove(tag);
        Ok(())
    }

    async fn on_rejected(&self, tag: &DeliveryTag) -> Result<()> {
        self.in_flight.lock().unwrap().remove(tag);
        Ok(())
    }

    async fn on_released(&self, tag: &DeliveryTag) -> Result<()> {
        if let Some(message) = self.in_flight.lock().unwrap().remove(tag) {
            self.queued.lock().unwrap().push((0, message));
        }
        Ok(())
    }

    async fn on_modified(&self, tag: &DeliveryTag, undeliverable: bool) -> Result<()> {
        if let Some(mut message) = self.in_flight.lock().unwrap().remove(tag) {
            if !undeliverable {
                message.delivery_count += 1;
                self.queued.lock().unwrap().push((0, message));
            }
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.queued.lock().unwrap().len())
    }
}
