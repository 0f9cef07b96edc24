//! The single source of truth for "now" used by the buffer, publisher and
//! router. Every component that needs wall-clock time takes a `Clock`
//! instead of calling `SystemTime::now()` directly, so tests can freeze or
//! fast-forward time deterministically.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current time, expressed as Unix seconds.
///
/// Implementations must be cheap to call and safe to share across tasks;
/// `Arc<dyn Clock>` is the expected way to thread one through a process.
pub trait Clock: Send + Sync {
    /// Current time as seconds since the Unix epoch.
    fn now_unix(&self) -> i64;
}

/// The real wall clock, backed by `SystemTime::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_secs() as i64
    }
}

/// A clock that can be frozen and advanced on demand, for deterministic
/// tests of backoff scheduling and `not_before` gating.
#[derive(Debug, Clone)]
pub struct FrozenClock {
    now: Arc<AtomicI64>,
}

impl FrozenClock {
    pub fn at(unix_seconds: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(unix_seconds)),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn set(&self, unix_seconds: i64) {
        self.now.store(unix_seconds, Ordering::SeqCst);
    }
}

impl Clock for FrozenClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Computes the exponential retransmission backoff, in seconds, for the
/// n-th redelivery attempt: `floor(5 * 1.25^n)`.
pub fn retransmission_delay(attempt: u32) -> i64 {
    (5.0_f64 * 1.25_f64.powi(attempt as i32)).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_clock_reads_back_what_it_was_set_to() {
        let clock = FrozenClock::at(1_000);
        assert_eq!(clock.now_unix(), 1_000);
        clock.advance(30);
        assert_eq!(clock.now_unix(), 1_030);
        clock.set(5);
        assert_eq!(clock.now_unix(), 5);
    }

    #[test]
    fn delay_follows_the_exponential_backoff_formula() {
        assert_eq!(retransmission_delay(0), 5);
        assert_eq!(retransmission_delay(1), 6);
        assert_eq!(retransmission_delay(2), 7);
        assert_eq!(retransmission_delay(3), 9);
        assert_eq!(retransmission_delay(4), 12);
    }
}
