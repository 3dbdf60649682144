//! Time sources and the inter-retry sleep seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

/// Wall-clock source, injectable for tests.
///
/// The executor derives deadlines, attempt timestamps, breaker windows,
/// and budget date buckets from this trait, never from `Utc::now()`
/// directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulations.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// The single suspension point between retries.
///
/// Backoff delays go through this seam so the executor works unchanged
/// under a cooperative scheduler or a thread-per-call model: swap the
/// implementation, not the retry loop.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Yields to the tokio scheduler for the duration of the delay.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Parks the calling thread instead of yielding.
///
/// For embeddings that run one execution per dedicated thread and have no
/// reactor to yield to. Never use this on a shared async runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockingSleeper;

#[async_trait]
impl Sleeper for BlockingSleeper {
    async fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
