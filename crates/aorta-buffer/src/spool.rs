//! The on-disk durable spool: a directory of queued `*.amqp` files (named
//! after the message id) plus `deliveries/`, `rejected/` and
//! `undeliverable/` subdirectories (the latter two also named after the
//! message id; `deliveries/` is named after the delivery tag of the
//! in-flight attempt).
//!
//! Every write that must survive a crash follows the same pattern: write
//! to a `.tmp` sibling in the same directory, `fsync` it, then `rename`
//! it into place. POSIX guarantees `rename` is atomic within a
//! filesystem, so a crash can only ever observe the old or the new state,
//! never a half-written file.

use crate::buffer::{Buffer, DeliveryRecord};
use crate::error::{Result, SpoolError};
use aorta_common::clock::{retransmission_delay, Clock};
use aorta_common::message::{DeliveryTag, Message};
use async_trait::async_trait;
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const NOT_BEFORE_LEN: usize = 8;
const QUEUED_EXT: &str = "amqp";
const DELIVERY_EXT: &str = "dstate";

#[derive(Serialize, Deserialize)]
struct StoredDeliveryRecord {
    host: String,
    port: u16,
    source: String,
    target: String,
    link: String,
    tag: String,
    message: Message,
}

/// A crash-safe, directory-backed [`Buffer`]. Holds an exclusive lock on
/// `root/.lock` for its entire lifetime: only one process may own a given
/// spool directory at a time.
pub struct SpooledBuffer {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    _lock: File,
}

impl SpooledBuffer {
    /// Opens (creating if necessary) the spool rooted at `root`, acquiring
    /// its exclusive lock. Fails if another process already holds it.
    pub fn open(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join("deliveries"))?;
        fs::create_dir_all(root.join("rejected"))?;
        fs::create_dir_all(root.join("undeliverable"))?;

        let lock_path = root.join(".lock");
        let lock_file = File::options()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| SpoolError::Locked(root.display().to_string()))?;

        Ok(Self {
            root,
            clock,
            _lock: lock_file,
        })
    }

    /// Queue entries are named after the message id, per spec: the queue
    /// has no notion of delivery tag, only the router/publisher does.
    fn queued_path(&self, message_id: &str) -> PathBuf {
        self.root.join(format!("{message_id}.{QUEUED_EXT}"))
    }

    fn delivery_path(&self, tag: &DeliveryTag) -> PathBuf {
        self.root.join("deliveries").join(format!("{}.{DELIVERY_EXT}", tag.0))
    }

    fn archive_path(&self, subdir: &str, message_id: &str) -> PathBuf {
        self.root.join(subdir).join(format!("{message_id}.{QUEUED_EXT}"))
    }

    /// Lists `*.amqp` files directly under the spool root, oldest
    /// modification time first.
    fn list_queued(&self) -> Result<Vec<PathBuf>> {
        let mut entries: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(QUEUED_EXT) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            entries.push((modified, path));
        }
        entries.sort_by_key(|(mtime, _)| *mtime);
        Ok(entries.into_iter().map(|(_, p)| p).collect())
    }

    fn write_atomic(&self, dest: &Path, contents: &[u8]) -> Result<()> {
        let mut tmp_name = dest.file_name().and_then(|n| n.to_str()).unwrap_or("entry").to_string();
        tmp_name.push_str(".tmp");
        let tmp = dest.with_file_name(tmp_name);
        {
            let mut f = File::create(&tmp)?;
            f.write_all(contents)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, dest)?;
        Ok(())
    }

    /// `not_before_secs` is Unix seconds (the unit every in-process API in
    /// this crate uses); the on-disk header stores milliseconds, per the
    /// persisted queue-entry format.
    fn encode_queued(not_before_secs: i64, message: &Message) -> Result<Vec<u8>> {
        let not_before_ms = not_before_secs.saturating_mul(1000);
        let mut out = Vec::with_capacity(NOT_BEFORE_LEN + 256);
        out.extend_from_slice(&not_before_ms.to_be_bytes());
        let body = serde_amqp::to_vec(message).map_err(|e| SpoolError::Encode(e.to_string()))?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode_queued(bytes: &[u8]) -> Result<(i64, Message)> {
        if bytes.len() < NOT_BEFORE_LEN {
            return Err(SpoolError::Decode("queued file shorter than not-before header".into()));
        }
        let mut header = [0u8; NOT_BEFORE_LEN];
        header.copy_from_slice(&bytes[..NOT_BEFORE_LEN]);
        let not_before_ms = i64::from_be_bytes(header);
        let not_before_secs = not_before_ms.div_euclid(1000);
        let message: Message =
            serde_amqp::from_slice(&bytes[NOT_BEFORE_LEN..]).map_err(|e| SpoolError::Decode(e.to_string()))?;
        Ok((not_before_secs, message))
    }

    fn enqueue_at(&self, not_before: i64, message: &Message) -> Result<()> {
        let contents = Self::encode_queued(not_before, message)?;
        self.write_atomic(&self.queued_path(&message.id), &contents)
    }

    fn archive(&self, subdir: &str, message: &Message) -> Result<()> {
        // Archived entries carry a zero not-before header: they are never
        // popped again, the header is kept only so the on-disk format
        // stays uniform with the queue.
        let contents = Self::encode_queued(0, message)?;
        self.write_atomic(&self.archive_path(subdir, &message.id), &contents)
    }

    fn take_delivery(&self, tag: &DeliveryTag) -> Result<StoredDeliveryRecord> {
        let path = self.delivery_path(tag);
        let mut bytes = Vec::new();
        File::open(&path)?.read_to_end(&mut bytes)?;
        let record: StoredDeliveryRecord =
            serde_json::from_slice(&bytes).map_err(|e| SpoolError::Decode(e.to_string()))?;
        fs::remove_file(&path)?;
        Ok(record)
    }
}

#[async_trait]
impl Buffer for SpooledBuffer {
    async fn enqueue(&self, message: Message, not_before: i64) -> Result<()> {
        self.enqueue_at(not_before, &message)
    }

    async fn pop_due(&self, now: i64) -> Result<Option<(DeliveryTag, Message)>> {
        for path in self.list_queued()? {
            let mut bytes = Vec::new();
            match File::open(&path) {
                Ok(mut f) => f.read_to_end(&mut bytes)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let (not_before, message) = Self::decode_queued(&bytes)?;
            if not_before > now {
                continue;
            }
            // Best-effort remove: if another process already claimed it,
            // move on rather than double-deliver.
            if fs::remove_file(&path).is_err() {
                continue;
            }
            // A fresh delivery tag per attempt: retries of the same
            // message never share a tag with an earlier, now-settled
            // attempt.
            return Ok(Some((DeliveryTag::new(), message)));
        }
        Ok(None)
    }

    async fn track(&self, record: DeliveryRecord) -> Result<()> {
        let stored = StoredDeliveryRecord {
            host: record.host,
            port: record.port,
            source: record.source,
            target: record.target,
            link: record.link,
            tag: record.tag.0.clone(),
            message: record.message,
        };
        let bytes = serde_json::to_vec(&stored).map_err(|e| SpoolError::Encode(e.to_string()))?;
        self.write_atomic(&self.delivery_path(&record.tag), &bytes)
    }

    async fn get(&self, tag: &DeliveryTag) -> Result<Option<Message>> {
        let path = self.delivery_path(tag);
        if !path.exists() {
            return Ok(None);
        }
        let mut bytes = Vec::new();
        File::open(&path)?.read_to_end(&mut bytes)?;
        let record: StoredDeliveryRecord =
            serde_json::from_slice(&bytes).map_err(|e| SpoolError::Decode(e.to_string()))?;
        Ok(Some(record.message))
    }

    async fn on_accepted(&self, tag: &DeliveryTag) -> Result<()> {
        let path = self.delivery_path(tag);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(%tag, "on_accepted for a delivery tag with no record; treating as idempotent no-op");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn on_rejected(&self, tag: &DeliveryTag) -> Result<()> {
        let record = self.take_delivery(tag)?;
        let mut message = record.message;
        message.delivery_count += 1;
        debug!(%tag, delivery_count = message.delivery_count, "message rejected, archiving");
        self.archive("rejected", &message)
    }

    async fn on_released(&self, tag: &DeliveryTag) -> Result<()> {
        let record = self.take_delivery(tag)?;
        let message = record.message;
        let delay = retransmission_delay(message.delivery_count);
        let not_before = self.clock.now_unix() + delay;
        debug!(%tag, delay, "message released, re-queuing");
        self.enqueue_at(not_before, &message)
    }

    async fn on_modified(&self, tag: &DeliveryTag, undeliverable: bool) -> Result<()> {
        let record = self.take_delivery(tag)?;
        let mut message = record.message;
        if undeliverable {
            message.delivery_count += 1;
            debug!(%tag, "message modified as undeliverable, archiving");
            return self.archive("undeliverable", &message);
        }
        message.delivery_count += 1;
        let delay = retransmission_delay(message.delivery_count);
        let not_before = self.clock.now_unix() + delay;
        debug!(%tag, delay, delivery_count = message.delivery_count, "message modified, re-queuing");
        self.enqueue_at(not_before, &message)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.list_queued()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aorta_common::clock::FrozenClock;
    use aorta_common::message::MessageClass;

    fn open(clock: Arc<dyn Clock>) -> (SpooledBuffer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let buffer = SpooledBuffer::open(dir.path(), clock).unwrap();
        (buffer, dir)
    }

    fn msg() -> Message {
        Message::new(MessageClass::Event, b"payload".to_vec())
    }

    #[tokio::test]
    async fn enqueue_then_pop_due_round_trips_the_message() {
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::at(100));
        let (buf, _dir) = open(clock.clone());
        let original = msg();
        let id = original.id.clone();
        buf.enqueue(original, 0).await.unwrap();
        assert_eq!(buf.len().await.unwrap(), 1);

        let (_, popped) = buf.pop_due(100).await.unwrap().unwrap();
        assert_eq!(popped.id, id);
        assert_eq!(buf.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn queued_file_is_named_after_the_message_id() {
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::at(0));
        let (buf, dir) = open(clock);
        let original = msg();
        let id = original.id.clone();
        buf.enqueue(original, 0).await.unwrap();

        assert!(dir.path().join(format!("{id}.amqp")).exists());
    }

    #[tokio::test]
    async fn pop_due_skips_entries_not_yet_due() {
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::at(100));
        let (buf, _dir) = open(clock.clone());
        buf.enqueue(msg(), 1_000).await.unwrap();
        assert!(buf.pop_due(100).await.unwrap().is_none());
        assert_eq!(buf.len().await.unwrap(), 1);
        assert!(buf.pop_due(1_000).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn accepted_discards_the_delivery_record() {
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::at(0));
        let (buf, _dir) = open(clock);
        buf.enqueue(msg(), 0).await.unwrap();
        let (tag, message) = buf.pop_due(0).await.unwrap().unwrap();
        buf.track(DeliveryRecord {
            host: "h".into(),
            port: 5672,
            source: "s".into(),
            target: "t".into(),
            link: "l".into(),
            tag: tag.clone(),
            message,
        })
        .await
        .unwrap();
        assert!(buf.get(&tag).await.unwrap().is_some());
        buf.on_accepted(&tag).await.unwrap();
        assert!(buf.get(&tag).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn released_requeues_with_backoff_and_unchanged_delivery_count() {
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::at(1_000));
        let (buf, _dir) = open(clock.clone());
        buf.enqueue(msg(), 0).await.unwrap();
        let (tag, message) = buf.pop_due(1_000).await.unwrap().unwrap();
        assert_eq!(message.delivery_count, 0);
        buf.track(DeliveryRecord {
            host: "h".into(),
            port: 5672,
            source: "s".into(),
            target: "t".into(),
            link: "l".into(),
            tag: tag.clone(),
            message,
        })
        .await
        .unwrap();

        buf.on_released(&tag).await.unwrap();
        assert!(buf.pop_due(1_000).await.unwrap().is_none(), "not due yet");
        let (_, requeued) = buf.pop_due(1_005).await.unwrap().unwrap();
        assert_eq!(requeued.delivery_count, 0);
    }

    #[tokio::test]
    async fn released_then_redelivered_gets_a_fresh_delivery_tag() {
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::at(1_000));
        let (buf, _dir) = open(clock.clone());
        buf.enqueue(msg(), 0).await.unwrap();
        let (first_tag, message) = buf.pop_due(1_000).await.unwrap().unwrap();
        buf.track(DeliveryRecord {
            host: "h".into(),
            port: 5672,
            source: "s".into(),
            target: "t".into(),
            link: "l".into(),
            tag: first_tag.clone(),
            message,
        })
        .await
        .unwrap();
        buf.on_released(&first_tag).await.unwrap();

        let (second_tag, _) = buf.pop_due(1_005).await.unwrap().unwrap();
        assert_ne!(first_tag, second_tag);
    }

    #[tokio::test]
    async fn rejected_increments_delivery_count_and_archives() {
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::at(0));
        let (buf, dir) = open(clock);
        let id = {
            let m = msg();
            let id = m.id.clone();
            buf.enqueue(m, 0).await.unwrap();
            id
        };
        let (tag, message) = buf.pop_due(0).await.unwrap().unwrap();
        buf.track(DeliveryRecord {
            host: "h".into(),
            port: 5672,
            source: "s".into(),
            target: "t".into(),
            link: "l".into(),
            tag: tag.clone(),
            message,
        })
        .await
        .unwrap();

        buf.on_rejected(&tag).await.unwrap();
        assert!(buf.get(&tag).await.unwrap().is_none());
        let archived = dir.path().join("rejected").join(format!("{id}.amqp"));
        assert!(archived.exists());
    }

    #[tokio::test]
    async fn modified_undeliverable_archives_without_requeue() {
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::at(0));
        let (buf, dir) = open(clock);
        let id = {
            let m = msg();
            let id = m.id.clone();
            buf.enqueue(m, 0).await.unwrap();
            id
        };
        let (tag, message) = buf.pop_due(0).await.unwrap().unwrap();
        buf.track(DeliveryRecord {
            host: "h".into(),
            port: 5672,
            source: "s".into(),
            target: "t".into(),
            link: "l".into(),
            tag: tag.clone(),
            message,
        })
        .await
        .unwrap();

        buf.on_modified(&tag, true).await.unwrap();
        assert_eq!(buf.len().await.unwrap(), 0);
        let archived = dir.path().join("undeliverable").join(format!("{id}.amqp"));
        assert!(archived.exists());
    }

    #[tokio::test]
    async fn opening_a_locked_spool_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::at(0));
        let _first = SpooledBuffer::open(dir.path(), clock.clone()).unwrap();
        let second = SpooledBuffer::open(dir.path(), clock);
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn transfer_pops_at_most_one_entry() {
        let clock: Arc<dyn Clock> = Arc::new(FrozenClock::at(0));
        let (buf, _dir) = open(clock);
        buf.enqueue(msg(), 0).await.unwrap();
        buf.enqueue(msg(), 0).await.unwrap();

        let first = buf.transfer("h", 5672, "s", "t", "l", 0).await.unwrap();
        assert!(first.is_some());
        assert_eq!(buf.len().await.unwrap(), 1, "only one entry should have been popped");
    }
}
