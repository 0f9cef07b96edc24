//! The `Buffer` trait: the durable, crash-safe store-and-forward queue
//! shared by the publisher and router. A message only ever leaves the
//! queue once its disposition is known, never on a timer alone — redelivery
//! is the caller's responsibility, driven by [`on_released`]/[`on_modified`].

use crate::error::Result;
use aorta_common::message::{DeliveryTag, Message};
use async_trait::async_trait;

/// Metadata describing where an in-flight delivery was sent, kept around so
/// a crash mid-delivery can be diagnosed and (if necessary) replayed.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub host: String,
    pub port: u16,
    pub source: String,
    pub target: String,
    pub link: String,
    pub tag: DeliveryTag,
    pub message: Message,
}

#[async_trait]
pub trait Buffer: Send + Sync {
    /// Durably enqueues `message`, eligible for delivery once `not_before`
    /// (Unix seconds) has passed. The queue entry is keyed by
    /// `message.id`, not by any delivery tag — a tag only comes into
    /// existence once the message is popped for an actual delivery
    /// attempt, via [`Buffer::pop_due`].
    async fn enqueue(&self, message: Message, not_before: i64) -> Result<()>;

    /// Scans the queue for the first entry whose `not_before` has already
    /// elapsed and removes it, returning it to the caller. Entries that
    /// are not yet due are left in place and a later, already-due entry
    /// may be returned ahead of them — this queue trades strict FIFO for
    /// honoring redelivery backoff.
    async fn pop_due(&self, now: i64) -> Result<Option<(DeliveryTag, Message)>>;

    /// Durably records that `message` has been handed to the wire as
    /// delivery `record.tag`, before any network I/O happens. This is what
    /// makes redelivery after a crash safe: the record survives until a
    /// terminal disposition is observed.
    async fn track(&self, record: DeliveryRecord) -> Result<()>;

    /// Looks up the message for an in-flight delivery tag.
    async fn get(&self, tag: &DeliveryTag) -> Result<Option<Message>>;

    /// Terminal success: discards the delivery record.
    async fn on_accepted(&self, tag: &DeliveryTag) -> Result<()>;

    /// Terminal failure: the record moves to the `rejected` archive and is
    /// never retried automatically.
    async fn on_rejected(&self, tag: &DeliveryTag) -> Result<()>;

    /// Transient failure: the message is re-queued with an exponential
    /// backoff delay; `delivery_count` is left unchanged.
    async fn on_released(&self, tag: &DeliveryTag) -> Result<()>;

    /// MODIFIED outcome. When `undeliverable` is set the record moves to
    /// the `undeliverable` archive like a rejection; otherwise it is
    /// re-queued with backoff and `delivery_count` incremented.
    async fn on_modified(&self, tag: &DeliveryTag, undeliverable: bool) -> Result<()>;

    /// Pops the next due entry (if any) and immediately tracks it under
    /// `tag`/`link` metadata, as a single atomic step. Callers must call
    /// this at most once per unit of outbound credit — calling it in a
    /// tight loop until it returns `None` risks one unit of link credit
    /// being consumed by two transfers.
    async fn transfer(
        &self,
        host: &str,
        port: u16,
        source: &str,
        target: &str,
        link: &str,
        now: i64,
    ) -> Result<Option<(DeliveryTag, Message)>> {
        let Some((tag, message)) = self.pop_due(now).await? else {
            return Ok(None);
        };
        self.track(DeliveryRecord {
            host: host.to_string(),
            port,
            source: source.to_string(),
            target: target.to_string(),
            link: link.to_string(),
            tag: tag.clone(),
            message: message.clone(),
        })
        .await?;
        Ok(Some((tag, message)))
    }

    /// Number of entries still queued (not yet popped for delivery).
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
