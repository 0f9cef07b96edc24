//! The publisher state machine (C5): turns an AMQP terminal delivery
//! outcome into the matching [`aorta_buffer::Buffer`] transition.
//!
//! | Outcome  | Buffer transition                                   |
//! |----------|------------------------------------------------------|
//! | Accepted | `on_accepted` — delivery record discarded             |
//! | Rejected | `on_rejected` — `delivery_count += 1`, archived       |
//! | Released | `on_released` — re-queued with backoff, count unchanged |
//! | Modified | `on_modified` — archived if undeliverable, else re-queued with `delivery_count += 1` |

use aorta_buffer::{Buffer, Result as BufferResult};
use aorta_common::message::DeliveryTag;
use fe2o3_amqp_types::messaging::Outcome;
use std::sync::Arc;
use tracing::warn;

pub struct PublisherStateMachine {
    buffer: Arc<dyn Buffer>,
}

impl PublisherStateMachine {
    pub fn new(buffer: Arc<dyn Buffer>) -> Self {
        Self { buffer }
    }

    /// Applies `outcome` for `tag`. A tag with no known in-flight record
    /// (e.g. a duplicate settlement delivered twice by a flaky peer) is
    /// logged and otherwise ignored rather than treated as an error —
    /// settlement is expected to be idempotent from the caller's view.
    pub async fn handle_outcome(&self, tag: &DeliveryTag, outcome: Outcome) -> BufferResult<()> {
        if self.buffer.get(tag).await?.is_none() {
            warn!(%tag, "settlement for unknown or already-settled delivery tag, ignoring");
            return Ok(());
        }

        match outcome {
            Outcome::Accepted(_) => self.buffer.on_accepted(tag).await,
            Outcome::Rejected(_) => self.buffer.on_rejected(tag).await,
            Outcome::Released(_) => self.buffer.on_released(tag).await,
            Outcome::Modified(modified) => {
                let undeliverable = modified.undeliverable_here.unwrap_or(false);
                self.buffer.on_modified(tag, undeliverable).await
            }
        }
    }
}
