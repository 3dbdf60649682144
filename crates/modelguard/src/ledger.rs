//! Per-execution attempt history.
//!
//! The ledger is owned by exactly one execution and is never shared, so
//! it needs no locking. Callers that want history beyond the execution's
//! lifetime serialize it; all numeric fields are integers (millisecond
//! durations, token counts) and round-trip exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvokeError;
use crate::invoker::TokenUsage;

/// One try of one model within one execution.
///
/// Immutable once appended to the ledger. A short-circuited attempt
/// records a breaker rejection: no network call happened and its timing
/// fields are zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub model_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cached_tokens: Option<u64>,
    pub cache_creation_tokens: Option<u64>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub short_circuited: bool,
}

impl Attempt {
    /// Attempt skipped because the circuit was open.
    pub fn short_circuited(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            started_at: None,
            completed_at: None,
            duration_ms: 0,
            input_tokens: None,
            output_tokens: None,
            cached_tokens: None,
            cache_creation_tokens: None,
            error_kind: None,
            error_message: None,
            short_circuited: true,
        }
    }

    /// The attempt completed without error and was actually invoked.
    pub fn succeeded(&self) -> bool {
        !self.short_circuited && self.error_kind.is_none()
    }

    /// The attempt was invoked and failed.
    pub fn failed(&self) -> bool {
        self.error_kind.is_some()
    }

    /// Billable tokens for this attempt, zero when unknown.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0)
    }
}

/// An attempt that has started but not yet completed.
///
/// Finalize with [`succeed`](Self::succeed) or [`fail`](Self::fail)
/// immediately after the invoker returns; the finished [`Attempt`] is
/// what goes into the ledger.
#[derive(Debug)]
pub struct AttemptStart {
    model_id: String,
    started_at: DateTime<Utc>,
}

impl AttemptStart {
    pub fn new(model_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            model_id: model_id.into(),
            started_at,
        }
    }

    fn elapsed_ms(&self, completed_at: DateTime<Utc>) -> u64 {
        (completed_at - self.started_at).num_milliseconds().max(0) as u64
    }

    pub fn succeed(self, completed_at: DateTime<Utc>, usage: &TokenUsage) -> Attempt {
        let duration_ms = self.elapsed_ms(completed_at);
        Attempt {
            model_id: self.model_id,
            started_at: Some(self.started_at),
            completed_at: Some(completed_at),
            duration_ms,
            input_tokens: Some(usage.input_tokens),
            output_tokens: Some(usage.output_tokens),
            cached_tokens: Some(usage.cached_tokens),
            cache_creation_tokens: Some(usage.cache_creation_tokens),
            error_kind: None,
            error_message: None,
            short_circuited: false,
        }
    }

    pub fn fail(self, completed_at: DateTime<Utc>, error: &InvokeError) -> Attempt {
        let duration_ms = self.elapsed_ms(completed_at);
        Attempt {
            model_id: self.model_id,
            started_at: Some(self.started_at),
            completed_at: Some(completed_at),
            duration_ms,
            input_tokens: None,
            output_tokens: None,
            cached_tokens: None,
            cache_creation_tokens: None,
            error_kind: Some(error.kind.as_str().to_string()),
            error_message: Some(error.message.clone()),
            short_circuited: false,
        }
    }
}

/// Append-only record of every attempt in one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptLedger {
    attempts: Vec<Attempt>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// The attempt that produced the execution's result, if any.
    pub fn success(&self) -> Option<&Attempt> {
        self.attempts.iter().find(|a| a.succeeded())
    }

    /// The most recent failed attempt.
    pub fn last_failure(&self) -> Option<&Attempt> {
        self.attempts.iter().rev().find(|a| a.failed())
    }

    pub fn failure_count(&self) -> usize {
        self.attempts.iter().filter(|a| a.failed()).count()
    }

    pub fn short_circuit_count(&self) -> usize {
        self.attempts.iter().filter(|a| a.short_circuited).count()
    }

    /// Billable tokens across all attempts.
    pub fn total_tokens(&self) -> u64 {
        self.attempts.iter().map(Attempt::total_tokens).sum()
    }

    /// Wall time spent inside invoker calls, in milliseconds.
    pub fn total_duration_ms(&self) -> u64 {
        self.attempts.iter().map(|a| a.duration_ms).sum()
    }

    /// Model IDs in the order they were tried, including short-circuits.
    pub fn models_tried(&self) -> Vec<&str> {
        self.attempts.iter().map(|a| a.model_id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap() + chrono::Duration::seconds(secs as i64)
    }

    fn usage() -> TokenUsage {
        TokenUsage {
            input_tokens: 120,
            output_tokens: 30,
            cached_tokens: 0,
            cache_creation_tokens: 0,
        }
    }

    #[test]
    fn test_attempt_duration_from_timestamps() {
        let start = AttemptStart::new("m", at(0));
        let attempt = start.succeed(at(2), &usage());
        assert_eq!(attempt.duration_ms, 2000);
        assert!(attempt.succeeded());
        assert_eq!(attempt.total_tokens(), 150);
    }

    #[test]
    fn test_failed_attempt_records_error() {
        let start = AttemptStart::new("m", at(0));
        let err = InvokeError::new(ErrorKind::RateLimited, "429 from upstream");
        let attempt = start.fail(at(1), &err);
        assert!(attempt.failed());
        assert_eq!(attempt.error_kind.as_deref(), Some("rate_limited"));
        assert_eq!(attempt.error_message.as_deref(), Some("429 from upstream"));
        assert_eq!(attempt.input_tokens, None);
    }

    #[test]
    fn test_short_circuited_attempt_has_zero_timing() {
        let attempt = Attempt::short_circuited("m");
        assert!(attempt.short_circuited);
        assert!(!attempt.succeeded());
        assert!(!attempt.failed());
        assert_eq!(attempt.duration_ms, 0);
        assert_eq!(attempt.started_at, None);
    }

    #[test]
    fn test_ledger_views() {
        let mut ledger = AttemptLedger::new();
        ledger.push(Attempt::short_circuited("a"));
        ledger.push(AttemptStart::new("b", at(0)).fail(at(1), &InvokeError::timeout("slow")));
        ledger.push(AttemptStart::new("c", at(1)).succeed(at(2), &usage()));

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.success().unwrap().model_id, "c");
        assert_eq!(ledger.last_failure().unwrap().model_id, "b");
        assert_eq!(ledger.failure_count(), 1);
        assert_eq!(ledger.short_circuit_count(), 1);
        assert_eq!(ledger.total_tokens(), 150);
        assert_eq!(ledger.total_duration_ms(), 2000);
        assert_eq!(ledger.models_tried(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ledger_serialization_round_trips_exactly() {
        let mut ledger = AttemptLedger::new();
        let start = AttemptStart::new("primary", at(0));
        ledger.push(start.fail(
            at(0) + chrono::Duration::milliseconds(137),
            &InvokeError::timeout("read timed out"),
        ));
        let start = AttemptStart::new("fallback", at(1));
        ledger.push(start.succeed(at(1) + chrono::Duration::milliseconds(842), &usage()));
        ledger.push(Attempt::short_circuited("never-called"));

        let json = serde_json::to_string(&ledger).unwrap();
        let back: AttemptLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ledger);
        assert_eq!(back.attempts()[0].duration_ms, 137);
        assert_eq!(back.attempts()[1].duration_ms, 842);
        assert_eq!(back.total_tokens(), 150);

        // Serializing the deserialized copy is byte-stable.
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
