//! The event-loop orchestrator (C6): a beat timer driving repeated flush
//! attempts, plus cooperative shutdown. A `tokio::time::interval` loop is
//! raced against a `tokio::sync::broadcast` shutdown signal inside
//! `tokio::select!`, firing a flush of one outbound link's due messages
//! on every tick.

use aorta_buffer::Buffer;
use aorta_common::clock::Clock;
use fe2o3_amqp_types::messaging::Outcome;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::state_machine::PublisherStateMachine;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How often the beat fires. Defaults to a fixed 20Hz frame rate.
    pub beat_interval: Duration,
    /// Upper bound on transfers attempted per beat.
    pub flush_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            beat_interval: Duration::from_millis(50), // 20Hz
            flush_limit: 100,
        }
    }
}

/// An outbound AMQP sender link, narrowed to the one operation the
/// orchestrator needs. Implemented over `fe2o3_amqp::Sender` by binaries;
/// kept as a trait here so the flush loop can be unit tested without a
/// real AMQP connection.
#[async_trait::async_trait]
pub trait OutboundLink: Send {
    async fn send(&mut self, body: Vec<u8>) -> Result<Outcome, String>;
}

/// Attempts up to `limit` transfers: pop a due message, hand it to
/// `link.send`, apply the resulting outcome to the buffer. Stops early
/// once the buffer has nothing left to send. This is the single place
/// that pops from the buffer, once per iteration — never looping an
/// unbounded number of times against one unit of credit, which would
/// risk sending the same message twice.
pub async fn flush(
    link: &mut dyn OutboundLink,
    buffer: &Arc<dyn Buffer>,
    state_machine: &PublisherStateMachine,
    clock: &dyn Clock,
    host: &str,
    port: u16,
    source: &str,
    target: &str,
    link_name: &str,
    limit: usize,
) -> aorta_buffer::Result<usize> {
    let mut sent = 0;
    for _ in 0..limit {
        let now = clock.now_unix();
        let Some((tag, message)) = buffer.transfer(host, port, source, target, link_name, now).await? else {
            break;
        };
        sent += 1;
        match link.send(message.body.clone()).await {
            Ok(outcome) => {
                state_machine.handle_outcome(&tag, outcome).await?;
            }
            Err(error) => {
                debug!(%tag, %error, "transport error sending message, treating as released");
                buffer.on_released(&tag).await?;
            }
        }
    }
    Ok(sent)
}

/// Picks one item uniformly at random, used by binaries to pick a single
/// sendable upstream link per beat rather than flushing every link on
/// every tick.
pub fn pick_random<T>(items: &[T]) -> Option<&T> {
    items.choose(&mut rand::thread_rng())
}

/// A handle used to request cooperative shutdown of every beat task
/// spawned from the same orchestrator.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, broadcast::Receiver<()>) {
        let (tx, rx) = broadcast::channel(1);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// Spawns a beat task that calls `on_beat` every `interval`, skipping
/// missed ticks rather than bursting to catch up, until shutdown is
/// signaled.
pub fn spawn_beat<F, Fut>(
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut on_beat: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    on_beat().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("beat task shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aorta_buffer::NullBuffer;
    use aorta_common::clock::FrozenClock;
    use aorta_common::message::{Message, MessageClass};
    use fe2o3_amqp_types::messaging::Accepted;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AcceptingLink {
        sent: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl OutboundLink for AcceptingLink {
        async fn send(&mut self, _body: Vec<u8>) -> Result<Outcome, String> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::Accepted(Accepted {}))
        }
    }

    #[tokio::test]
    async fn flush_drains_the_buffer_up_to_the_limit() {
        let buffer: Arc<dyn Buffer> = Arc::new(NullBuffer::new());
        for _ in 0..5 {
            buffer.enqueue(Message::new(MessageClass::Event, vec![]), 0).await.unwrap();
        }
        let sm = PublisherStateMachine::new(buffer.clone());
        let clock = FrozenClock::at(0);
        let sent_counter = Arc::new(AtomicUsize::new(0));
        let mut link = AcceptingLink { sent: sent_counter.clone() };

        let sent = flush(&mut link, &buffer, &sm, &clock, "h", 5672, "s", "t", "l", 3)
            .await
            .unwrap();

        assert_eq!(sent, 3, "limit should bound how many transfers happen per flush");
        assert_eq!(buffer.len().await.unwrap(), 2);
        assert_eq!(sent_counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn flush_stops_early_once_the_buffer_is_empty() {
        let buffer: Arc<dyn Buffer> = Arc::new(NullBuffer::new());
        buffer.enqueue(Message::new(MessageClass::Event, vec![]), 0).await.unwrap();
        let sm = PublisherStateMachine::new(buffer.clone());
        let clock = FrozenClock::at(0);
        let mut link = AcceptingLink { sent: Arc::new(AtomicUsize::new(0)) };

        let sent = flush(&mut link, &buffer, &sm, &clock, "h", 5672, "s", "t", "l", 100)
            .await
            .unwrap();
        assert_eq!(sent, 1);
    }

    #[tokio::test]
    async fn shutdown_handle_stops_the_beat_task() {
        let (handle, rx) = ShutdownHandle::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let task = spawn_beat(Duration::from_millis(5), rx, move || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown();
        task.await.unwrap();
        assert!(counter.load(Ordering::SeqCst) > 0);
    }
}
