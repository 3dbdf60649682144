//! Circuit breaker keyed per (caller, model, tenant).
//!
//! When one model keeps failing for one caller, the circuit opens and the
//! executor skips that model, falling through to the next candidate
//! instead of burning retries on a dead backend.
//!
//! State lives entirely in the [`CounterStore`]; the breaker itself is a
//! stateless accessor recomputed per check, so any number of executions
//! (and any number of processes sharing the store) observe the same
//! circuit. Because counters are best-effort rather than transactional,
//! two concurrent failures may both read the pre-increment count and the
//! circuit can open one check later than a single-threaded trace would —
//! circuit breaking here is a protective measure, not a linearizable gate.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::store::CounterStore;

/// Circuit breaker thresholds.
///
/// A policy without a breaker config disables breaking entirely: every
/// check reports closed and nothing is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures within `within` before the circuit opens.
    pub errors: u32,

    /// Rolling window for counting failures.
    #[serde(with = "crate::policy::duration_secs")]
    pub within: Duration,

    /// Time the circuit stays open before a probe call is allowed.
    #[serde(with = "crate::policy::duration_secs")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            errors: 5,
            within: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Observable circuit state, derived from the store at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

const STATE_OPEN: f64 = 1.0;
const STATE_HALF_OPEN: f64 = 2.0;

// Garbage-collects abandoned breaker keys in stores that honor TTLs. An
// active circuit is always revisited long before this.
const STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Stateless accessor over counter-store-backed breaker state.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(
        config: CircuitBreakerConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    fn prefix(caller: &str, model: &str, tenant: Option<&str>) -> String {
        match tenant {
            Some(tenant) => format!("cb:{caller}:{model}:{tenant}"),
            None => format!("cb:{caller}:{model}"),
        }
    }

    /// Admission check. Returns true when calls to `model` should be
    /// short-circuited.
    ///
    /// The Open to HalfOpen transition is lazy: it happens here, at read
    /// time, once the cooldown has elapsed — there is no background timer.
    pub async fn is_open(&self, caller: &str, model: &str, tenant: Option<&str>) -> bool {
        let prefix = Self::prefix(caller, model, tenant);
        match self.store.get(&format!("{prefix}:state")).await {
            Some(state) if state == STATE_OPEN => {
                let opened_at = self
                    .store
                    .get(&format!("{prefix}:opened_at"))
                    .await
                    .unwrap_or(0.0);
                let now = self.clock.now().timestamp() as f64;
                if now - opened_at >= self.config.cooldown.as_secs() as f64 {
                    self.store
                        .put(&format!("{prefix}:state"), STATE_HALF_OPEN, Some(STATE_TTL))
                        .await;
                    tracing::info!(
                        caller = %caller,
                        model = %model,
                        "circuit half-open, admitting probe call"
                    );
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    /// Record a successful call. Closes a half-open circuit and clears
    /// the failure count.
    pub async fn record_success(&self, caller: &str, model: &str, tenant: Option<&str>) {
        let prefix = Self::prefix(caller, model, tenant);
        let state = self.store.get(&format!("{prefix}:state")).await;

        self.store.remove(&format!("{prefix}:failures")).await;

        if state == Some(STATE_HALF_OPEN) || state == Some(STATE_OPEN) {
            self.store.remove(&format!("{prefix}:state")).await;
            self.store.remove(&format!("{prefix}:opened_at")).await;
            tracing::info!(
                caller = %caller,
                model = %model,
                "circuit closed after successful probe"
            );
        }
    }

    /// Record a failed call. Opens the circuit once the windowed failure
    /// count reaches the threshold; a half-open failure reopens it with a
    /// fresh cooldown.
    pub async fn record_failure(&self, caller: &str, model: &str, tenant: Option<&str>) {
        let prefix = Self::prefix(caller, model, tenant);
        let now = self.clock.now().timestamp() as f64;

        if self.store.get(&format!("{prefix}:state")).await == Some(STATE_HALF_OPEN) {
            self.store
                .put(&format!("{prefix}:state"), STATE_OPEN, Some(STATE_TTL))
                .await;
            self.store
                .put(&format!("{prefix}:opened_at"), now, Some(STATE_TTL))
                .await;
            tracing::warn!(
                caller = %caller,
                model = %model,
                "circuit reopened after failed probe"
            );
            return;
        }

        let failures = self
            .store
            .incr(&format!("{prefix}:failures"), 1.0, Some(self.config.within))
            .await;

        if failures >= self.config.errors as f64 {
            self.store
                .put(&format!("{prefix}:state"), STATE_OPEN, Some(STATE_TTL))
                .await;
            self.store
                .put(&format!("{prefix}:opened_at"), now, Some(STATE_TTL))
                .await;
            self.store.remove(&format!("{prefix}:failures")).await;
            tracing::warn!(
                caller = %caller,
                model = %model,
                failures = failures as u64,
                "circuit opened after repeated failures"
            );
        }
    }

    /// Current state, for metrics and debugging.
    pub async fn state(&self, caller: &str, model: &str, tenant: Option<&str>) -> CircuitState {
        let prefix = Self::prefix(caller, model, tenant);
        match self.store.get(&format!("{prefix}:state")).await {
            Some(state) if state == STATE_OPEN => CircuitState::Open,
            Some(state) if state == STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}
