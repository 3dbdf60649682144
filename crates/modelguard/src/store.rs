//! Shared counter storage for breaker and budget state.
//!
//! The counter store is the only mutable state shared across concurrent
//! executions. Increments are atomic per key; reads across keys are not
//! transactional. Two executions racing on the same counter may both
//! observe the pre-increment value, so a breaker can open one check later
//! than a single-threaded trace would suggest and a budget can briefly
//! over-admit. That window is an accepted trade-off against holding locks
//! or transactions on the hot path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};

/// Key/value counter store with atomic increment and TTL expiry.
///
/// Implement this over Redis or any other shared store for multi-node
/// deployments; [`MemoryCounterStore`] covers single-process use.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add `amount` to `key` and return the new value.
    ///
    /// `ttl` applies only when the key is created, so a windowed counter
    /// keeps its original window start across increments.
    async fn incr(&self, key: &str, amount: f64, ttl: Option<Duration>) -> f64;

    /// Current value, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Option<f64>;

    /// Overwrite `key`, resetting its TTL.
    async fn put(&self, key: &str, value: f64, ttl: Option<Duration>);

    /// Delete `key` if present.
    async fn remove(&self, key: &str);
}

struct Entry {
    value: f64,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process counter store.
///
/// Expiry is evaluated lazily against the injected [`Clock`] on every
/// access, so tests can drive TTL behavior with a [`ManualClock`]
/// (`crate::clock::ManualClock`).
pub struct MemoryCounterStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn expiry(&self, now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|t| now + t)
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, amount: f64, ttl: Option<Duration>) -> f64 {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if entry.live(now) => {
                entry.value += amount;
                entry.value
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: amount,
                        expires_at: self.expiry(now, ttl),
                    },
                );
                amount
            }
        }
    }

    async fn get(&self, key: &str) -> Option<f64> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| entry.live(now))
            .map(|entry| entry.value)
    }

    async fn put(&self, key: &str, value: f64, ttl: Option<Duration>) {
        let now = self.clock.now();
        let expires_at = self.expiry(now, ttl);
        self.entries
            .write()
            .insert(key.to_string(), Entry { value, expires_at });
    }

    async fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}
