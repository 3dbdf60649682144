//! The fallback × retry orchestration loop.
//!
//! One [`ReliabilityExecutor::execute`] call drives: budget pre-check,
//! then each candidate model in fallback order, with a breaker check
//! before the model and a bounded retry loop inside it. The first
//! success wins outright; exhaustion, a reached budget ceiling, or the
//! total deadline produce the only errors a caller ever sees.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::error::{ExecuteError, InvokeError};
use crate::events::AttemptObserver;
use crate::invoker::{InvokeResponse, ModelInvoker};
use crate::ledger::{Attempt, AttemptLedger, AttemptStart};
use crate::policy::ExecutionPolicy;
use crate::resilience::{BackoffCalculator, BudgetGate, CircuitBreaker, ErrorClassifier};
use crate::store::CounterStore;

/// Result of a successful execution.
#[derive(Debug)]
pub struct ExecutionSuccess {
    /// The winning response.
    pub response: InvokeResponse,
    /// Model that produced it; differs from the primary when a fallback
    /// succeeded.
    pub chosen_model: String,
    /// Full attempt history.
    pub ledger: AttemptLedger,
}

/// A failed execution, carrying the full attempt history so callers can
/// see every model tried, every retry taken, and every short-circuit.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct ExecutionFailure {
    pub error: ExecuteError,
    pub ledger: AttemptLedger,
}

impl ExecutionFailure {
    fn new(error: ExecuteError, ledger: AttemptLedger) -> Self {
        Self { error, ledger }
    }
}

/// Drives the model-fallback and retry loop around an invoker.
///
/// The executor holds no per-execution state; one instance serves any
/// number of concurrent executions. The counter store behind it is the
/// only state shared between them.
pub struct ReliabilityExecutor {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    observer: Option<Arc<dyn AttemptObserver>>,
    rng: Mutex<StdRng>,
}

impl ReliabilityExecutor {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            observer: None,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Replace the wall clock (tests, simulations).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the inter-retry sleep implementation. Use
    /// [`BlockingSleeper`](crate::clock::BlockingSleeper) for
    /// thread-per-call embeddings.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Attach an attempt lifecycle observer.
    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Seed the jitter RNG for deterministic delays in tests.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Execute one logical call under the given policy.
    ///
    /// Models are tried strictly in `policy.models` order; within one
    /// model retries are strictly sequential. The first success returns
    /// immediately. The ledger comes back on both paths.
    pub async fn execute(
        &self,
        invoker: &dyn ModelInvoker,
        policy: &ExecutionPolicy,
        caller: &str,
        tenant: Option<&str>,
    ) -> Result<ExecutionSuccess, ExecutionFailure> {
        let mut ledger = AttemptLedger::new();

        let budget = policy
            .budget
            .as_ref()
            .map(|cfg| BudgetGate::new(cfg.clone(), self.store.clone(), self.clock.clone()));
        let breaker = policy
            .circuit_breaker
            .as_ref()
            .map(|cfg| CircuitBreaker::new(cfg.clone(), self.store.clone(), self.clock.clone()));

        // Budget violations surface before any attempt: retrying cannot
        // improve budget state.
        if let Some(gate) = &budget {
            if let Err(error) = gate.check_budget(caller, tenant).await {
                return Err(ExecutionFailure::new(error, ledger));
            }
            if let Err(error) = gate.check_token_budget(caller, tenant).await {
                return Err(ExecutionFailure::new(error, ledger));
            }
        }

        let started = self.clock.now();
        let deadline = policy
            .total_timeout
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|t| started + t);

        let mut last_error: Option<InvokeError> = None;

        'models: for model in &policy.models {
            if let Some(breaker) = &breaker {
                if breaker.is_open(caller, model, tenant).await {
                    warn!(caller = %caller, model = %model, "circuit open, skipping model");
                    let attempt = Attempt::short_circuited(model.clone());
                    self.notify_finished(&attempt);
                    ledger.push(attempt);
                    continue 'models;
                }
            }

            let mut retries_remaining = policy.retry.max_retries;
            let mut attempt_index: u32 = 0;

            loop {
                // The deadline is cooperative: checked before every
                // attempt, never preempting a call in flight.
                if let Some(deadline) = deadline {
                    let now = self.clock.now();
                    if now > deadline {
                        let elapsed = (now - started).to_std().unwrap_or_default();
                        let error = ExecuteError::TotalTimeout {
                            configured: policy.total_timeout.unwrap_or_default(),
                            elapsed,
                        };
                        warn!(caller = %caller, model = %model, "total timeout exceeded");
                        return Err(ExecutionFailure::new(error, ledger));
                    }
                }

                let start = AttemptStart::new(model.clone(), self.clock.now());
                if let Some(observer) = &self.observer {
                    observer.attempt_started(model);
                }
                debug!(caller = %caller, model = %model, attempt = attempt_index, "invoking model");

                match invoker.invoke(model).await {
                    Ok(response) => {
                        let attempt = start.succeed(self.clock.now(), &response.usage);
                        self.notify_finished(&attempt);
                        ledger.push(attempt);

                        if let Some(breaker) = &breaker {
                            breaker.record_success(caller, model, tenant).await;
                        }
                        if let Some(gate) = &budget {
                            gate.record_spend(caller, response.cost, tenant).await;
                            gate.record_tokens(caller, response.usage.total(), tenant)
                                .await;
                        }

                        return Ok(ExecutionSuccess {
                            chosen_model: model.clone(),
                            response,
                            ledger,
                        });
                    }
                    Err(error) => {
                        warn!(
                            caller = %caller,
                            model = %model,
                            attempt = attempt_index,
                            error = %error,
                            "model call failed"
                        );
                        let attempt = start.fail(self.clock.now(), &error);
                        self.notify_finished(&attempt);
                        ledger.push(attempt);

                        if let Some(breaker) = &breaker {
                            breaker.record_failure(caller, model, tenant).await;
                        }

                        let retryable = ErrorClassifier::is_retryable(
                            &error,
                            &policy.retry.extra_retryable_kinds,
                            &policy.retry.extra_retryable_patterns,
                        );
                        let before_deadline = deadline.map_or(true, |d| self.clock.now() <= d);
                        last_error = Some(error);

                        if retryable && retries_remaining > 0 && before_deadline {
                            retries_remaining -= 1;
                            let delay = {
                                let mut rng = self.rng.lock();
                                BackoffCalculator::delay_with_jitter(
                                    &mut *rng,
                                    policy.retry.strategy,
                                    policy.retry.base,
                                    policy.retry.max_delay,
                                    attempt_index,
                                )
                            };
                            attempt_index += 1;
                            debug!(
                                caller = %caller,
                                model = %model,
                                delay_ms = delay.as_millis() as u64,
                                "retrying after backoff"
                            );
                            self.sleeper.sleep(delay).await;
                        } else {
                            debug!(caller = %caller, model = %model, "advancing to next candidate");
                            continue 'models;
                        }
                    }
                }
            }
        }

        let error = ExecuteError::AllModelsExhausted {
            models: policy.models.clone(),
            last_error,
        };
        warn!(caller = %caller, "all candidate models exhausted");
        Err(ExecutionFailure::new(error, ledger))
    }

    fn notify_finished(&self, attempt: &Attempt) {
        if let Some(observer) = &self.observer {
            observer.attempt_finished(attempt);
        }
    }
}
