//! Budget gating: pre-call admission and post-call spend recording.
//!
//! Counters are keyed by calendar date buckets (`YYYY-MM-DD` for daily,
//! `YYYY-MM` for monthly) so they rotate naturally at period boundaries
//! with no reset job; TTLs garbage-collect old buckets in stores that
//! honor them. Checks read `current >= limit`: the call that reaches a
//! ceiling completes, and the next call is the one that gets blocked.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::ExecuteError;
use crate::store::CounterStore;

/// How ceiling violations are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enforcement {
    /// Ceilings are ignored; usage is still recorded.
    #[default]
    None,
    /// Ceilings never block; reserved for alerting pipelines.
    Soft,
    /// Ceilings block calls before any attempt is made.
    Hard,
}

/// Budget ceilings for one execution, resolved and read-only.
///
/// Cost ceilings exist globally and per caller identity; token ceilings
/// are global-only, a coarser safety net behind the cost budgets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub enforcement: Enforcement,
    pub global_daily: Option<f64>,
    pub global_monthly: Option<f64>,
    pub per_caller_daily: Option<f64>,
    pub per_caller_monthly: Option<f64>,
    pub global_daily_tokens: Option<u64>,
    pub global_monthly_tokens: Option<u64>,
}

impl BudgetConfig {
    /// A config that only accumulates usage.
    pub fn recording_only() -> Self {
        Self::default()
    }
}

/// Which ceiling a [`ExecuteError::BudgetExceeded`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    GlobalDaily,
    GlobalMonthly,
    PerCallerDaily,
    PerCallerMonthly,
    GlobalDailyTokens,
    GlobalMonthlyTokens,
}

impl BudgetScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetScope::GlobalDaily => "global_daily",
            BudgetScope::GlobalMonthly => "global_monthly",
            BudgetScope::PerCallerDaily => "per_caller_daily",
            BudgetScope::PerCallerMonthly => "per_caller_monthly",
            BudgetScope::GlobalDailyTokens => "global_daily_tokens",
            BudgetScope::GlobalMonthlyTokens => "global_monthly_tokens",
        }
    }
}

impl fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Buckets expire comfortably after their period ends.
const DAILY_TTL: Duration = Duration::from_secs(2 * 24 * 60 * 60);
const MONTHLY_TTL: Duration = Duration::from_secs(40 * 24 * 60 * 60);

/// Admission check and usage recording against the counter store.
pub struct BudgetGate {
    config: BudgetConfig,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl BudgetGate {
    pub fn new(config: BudgetConfig, store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    fn day_bucket(&self) -> String {
        self.clock.now().format("%Y-%m-%d").to_string()
    }

    fn month_bucket(&self) -> String {
        self.clock.now().format("%Y-%m").to_string()
    }

    fn cost_key(tenant: Option<&str>, scope: &str, bucket: &str) -> String {
        match tenant {
            Some(tenant) => format!("budget:{tenant}:cost:{scope}:{bucket}"),
            None => format!("budget:cost:{scope}:{bucket}"),
        }
    }

    fn token_key(tenant: Option<&str>, bucket: &str) -> String {
        match tenant {
            Some(tenant) => format!("budget:{tenant}:tokens:global:{bucket}"),
            None => format!("budget:tokens:global:{bucket}"),
        }
    }

    /// Pre-call cost admission check. Only hard enforcement blocks.
    ///
    /// Ceilings are checked in a fixed order — global daily, global
    /// monthly, caller daily, caller monthly — and the first violated one
    /// is reported.
    pub async fn check_budget(
        &self,
        caller: &str,
        tenant: Option<&str>,
    ) -> Result<(), ExecuteError> {
        if self.config.enforcement != Enforcement::Hard {
            return Ok(());
        }

        let day = self.day_bucket();
        let month = self.month_bucket();
        let caller_scope = format!("caller:{caller}");
        let checks = [
            (
                BudgetScope::GlobalDaily,
                self.config.global_daily,
                Self::cost_key(tenant, "global", &day),
            ),
            (
                BudgetScope::GlobalMonthly,
                self.config.global_monthly,
                Self::cost_key(tenant, "global", &month),
            ),
            (
                BudgetScope::PerCallerDaily,
                self.config.per_caller_daily,
                Self::cost_key(tenant, &caller_scope, &day),
            ),
            (
                BudgetScope::PerCallerMonthly,
                self.config.per_caller_monthly,
                Self::cost_key(tenant, &caller_scope, &month),
            ),
        ];

        for (scope, limit, key) in checks {
            let Some(limit) = limit else { continue };
            let current = self.store.get(&key).await.unwrap_or(0.0);
            if current >= limit {
                tracing::warn!(
                    caller = %caller,
                    scope = %scope,
                    current,
                    limit,
                    "budget ceiling reached, blocking call"
                );
                return Err(ExecuteError::BudgetExceeded {
                    scope,
                    limit,
                    current,
                    caller: caller.to_string(),
                    tenant: tenant.map(str::to_string),
                });
            }
        }
        Ok(())
    }

    /// Pre-call token admission check, global-only. Only hard enforcement
    /// blocks.
    pub async fn check_token_budget(
        &self,
        caller: &str,
        tenant: Option<&str>,
    ) -> Result<(), ExecuteError> {
        if self.config.enforcement != Enforcement::Hard {
            return Ok(());
        }

        let checks = [
            (
                BudgetScope::GlobalDailyTokens,
                self.config.global_daily_tokens,
                Self::token_key(tenant, &self.day_bucket()),
            ),
            (
                BudgetScope::GlobalMonthlyTokens,
                self.config.global_monthly_tokens,
                Self::token_key(tenant, &self.month_bucket()),
            ),
        ];

        for (scope, limit, key) in checks {
            let Some(limit) = limit else { continue };
            let current = self.store.get(&key).await.unwrap_or(0.0);
            if current >= limit as f64 {
                tracing::warn!(
                    caller = %caller,
                    scope = %scope,
                    current,
                    limit,
                    "token ceiling reached, blocking call"
                );
                return Err(ExecuteError::BudgetExceeded {
                    scope,
                    limit: limit as f64,
                    current,
                    caller: caller.to_string(),
                    tenant: tenant.map(str::to_string),
                });
            }
        }
        Ok(())
    }

    /// Record spend after a successful attempt.
    ///
    /// Runs in every enforcement mode so soft/none deployments still see
    /// accumulated usage. No-op for non-positive amounts.
    pub async fn record_spend(&self, caller: &str, amount: f64, tenant: Option<&str>) {
        if amount <= 0.0 {
            return;
        }
        let day = self.day_bucket();
        let month = self.month_bucket();
        let caller_scope = format!("caller:{caller}");

        self.store
            .incr(&Self::cost_key(tenant, "global", &day), amount, Some(DAILY_TTL))
            .await;
        self.store
            .incr(
                &Self::cost_key(tenant, "global", &month),
                amount,
                Some(MONTHLY_TTL),
            )
            .await;
        self.store
            .incr(
                &Self::cost_key(tenant, &caller_scope, &day),
                amount,
                Some(DAILY_TTL),
            )
            .await;
        self.store
            .incr(
                &Self::cost_key(tenant, &caller_scope, &month),
                amount,
                Some(MONTHLY_TTL),
            )
            .await;
        tracing::debug!(caller = %caller, amount, "recorded spend");
    }

    /// Record token usage after a successful attempt. Global counters
    /// only, mirroring the token ceilings. No-op for zero tokens.
    pub async fn record_tokens(&self, caller: &str, tokens: u64, tenant: Option<&str>) {
        if tokens == 0 {
            return;
        }
        self.store
            .incr(
                &Self::token_key(tenant, &self.day_bucket()),
                tokens as f64,
                Some(DAILY_TTL),
            )
            .await;
        self.store
            .incr(
                &Self::token_key(tenant, &self.month_bucket()),
                tokens as f64,
                Some(MONTHLY_TTL),
            )
            .await;
        tracing::debug!(caller = %caller, tokens, "recorded token usage");
    }

    /// Accumulated cost for a scope in the current period, for dashboards
    /// and tests.
    pub async fn current_cost(
        &self,
        scope: BudgetScope,
        caller: &str,
        tenant: Option<&str>,
    ) -> f64 {
        let caller_scope = format!("caller:{caller}");
        let key = match scope {
            BudgetScope::GlobalDaily => Self::cost_key(tenant, "global", &self.day_bucket()),
            BudgetScope::GlobalMonthly => Self::cost_key(tenant, "global", &self.month_bucket()),
            BudgetScope::PerCallerDaily => {
                Self::cost_key(tenant, &caller_scope, &self.day_bucket())
            }
            BudgetScope::PerCallerMonthly => {
                Self::cost_key(tenant, &caller_scope, &self.month_bucket())
            }
            BudgetScope::GlobalDailyTokens => Self::token_key(tenant, &self.day_bucket()),
            BudgetScope::GlobalMonthlyTokens => Self::token_key(tenant, &self.month_bucket()),
        };
        self.store.get(&key).await.unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryCounterStore;
    use chrono::{TimeZone, Utc};

    fn gate(config: BudgetConfig) -> (BudgetGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 31, 23, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryCounterStore::with_clock(clock.clone()));
        (BudgetGate::new(config, store, clock.clone()), clock)
    }

    fn hard(global_daily: f64) -> BudgetConfig {
        BudgetConfig {
            enforcement: Enforcement::Hard,
            global_daily: Some(global_daily),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_hard_blocks_at_exact_ceiling() {
        let (gate, _clock) = gate(hard(10.0));
        gate.record_spend("svc", 10.0, None).await;

        let err = gate.check_budget("svc", None).await.unwrap_err();
        match err {
            ExecuteError::BudgetExceeded { scope, limit, current, .. } => {
                assert_eq!(scope, BudgetScope::GlobalDaily);
                assert_eq!(limit, 10.0);
                assert_eq!(current, 10.0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_below_ceiling_passes() {
        let (gate, _clock) = gate(hard(10.0));
        gate.record_spend("svc", 9.99, None).await;
        assert!(gate.check_budget("svc", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_soft_and_none_never_block() {
        for enforcement in [Enforcement::Soft, Enforcement::None] {
            let (gate, _clock) = gate(BudgetConfig {
                enforcement,
                global_daily: Some(1.0),
                ..Default::default()
            });
            gate.record_spend("svc", 100.0, None).await;
            assert!(gate.check_budget("svc", None).await.is_ok());
            assert_eq!(
                gate.current_cost(BudgetScope::GlobalDaily, "svc", None).await,
                100.0
            );
        }
    }

    #[tokio::test]
    async fn test_check_order_reports_global_before_caller() {
        let (gate, _clock) = gate(BudgetConfig {
            enforcement: Enforcement::Hard,
            global_daily: Some(5.0),
            per_caller_daily: Some(1.0),
            ..Default::default()
        });
        gate.record_spend("svc", 6.0, None).await;

        // Both ceilings are violated; the global one wins by check order.
        let err = gate.check_budget("svc", None).await.unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::BudgetExceeded { scope: BudgetScope::GlobalDaily, .. }
        ));
    }

    #[tokio::test]
    async fn test_per_caller_ceilings_are_isolated() {
        let (gate, _clock) = gate(BudgetConfig {
            enforcement: Enforcement::Hard,
            per_caller_daily: Some(5.0),
            ..Default::default()
        });
        gate.record_spend("noisy", 5.0, None).await;

        assert!(gate.check_budget("noisy", None).await.is_err());
        assert!(gate.check_budget("quiet", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_daily_bucket_rotates_at_midnight() {
        let (gate, clock) = gate(hard(10.0));
        gate.record_spend("svc", 10.0, None).await;
        assert!(gate.check_budget("svc", None).await.is_err());

        // 23:00 on Jan 31 + 2h lands in Feb 1's bucket.
        clock.advance(Duration::from_secs(2 * 60 * 60));
        assert!(gate.check_budget("svc", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_monthly_ceiling_spans_days() {
        let (gate, clock) = gate(BudgetConfig {
            enforcement: Enforcement::Hard,
            global_monthly: Some(10.0),
            ..Default::default()
        });
        gate.record_spend("svc", 10.0, None).await;

        // Next day, same month (Jan 31 23:00 -> Jan 31 23:30).
        clock.advance(Duration::from_secs(30 * 60));
        assert!(gate.check_budget("svc", None).await.is_err());

        // Crossing into February clears the monthly bucket.
        clock.advance(Duration::from_secs(60 * 60));
        assert!(gate.check_budget("svc", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_token_ceiling_blocks() {
        let (gate, _clock) = gate(BudgetConfig {
            enforcement: Enforcement::Hard,
            global_daily_tokens: Some(1_000),
            ..Default::default()
        });
        gate.record_tokens("svc", 1_000, None).await;

        let err = gate.check_token_budget("svc", None).await.unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::BudgetExceeded { scope: BudgetScope::GlobalDailyTokens, .. }
        ));
    }

    #[tokio::test]
    async fn test_zero_and_negative_amounts_are_ignored() {
        let (gate, _clock) = gate(hard(10.0));
        gate.record_spend("svc", 0.0, None).await;
        gate.record_spend("svc", -3.0, None).await;
        gate.record_tokens("svc", 0, None).await;
        assert_eq!(
            gate.current_cost(BudgetScope::GlobalDaily, "svc", None).await,
            0.0
        );
    }

    #[tokio::test]
    async fn test_tenant_counters_are_separate() {
        let (gate, _clock) = gate(hard(10.0));
        gate.record_spend("svc", 10.0, Some("acme")).await;

        assert!(gate.check_budget("svc", Some("acme")).await.is_err());
        assert!(gate.check_budget("svc", None).await.is_ok());
        assert!(gate.check_budget("svc", Some("globex")).await.is_ok());
    }
}
