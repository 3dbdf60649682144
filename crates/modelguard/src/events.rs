//! Attempt lifecycle notifications.

use crate::ledger::Attempt;

/// Hook for external observability pipelines.
///
/// The executor calls `attempt_started` just before each invoker call and
/// `attempt_finished` for every finalized attempt, including breaker
/// short-circuits (which never start). Callbacks run synchronously on the
/// execution path; implementations should hand work off to their own
/// channel rather than block.
pub trait AttemptObserver: Send + Sync {
    fn attempt_started(&self, model_id: &str);
    fn attempt_finished(&self, attempt: &Attempt);
}

/// Observer that discards all notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AttemptObserver for NoopObserver {
    fn attempt_started(&self, _model_id: &str) {}
    fn attempt_finished(&self, _attempt: &Attempt) {}
}
