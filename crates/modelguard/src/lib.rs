//! # modelguard
//!
//! Reliability execution layer for calls to metered, unreliable LLM
//! providers: retries with jittered backoff, ordered multi-model
//! fallback, per-(caller, model, tenant) circuit breaking, budget
//! gating, and a cooperative total deadline.
//!
//! ## Key guarantees
//!
//! 1. **First success wins**: models are tried strictly in fallback
//!    order; the first successful attempt returns immediately.
//! 2. **Full visibility**: every attempt — including retries and
//!    breaker short-circuits — lands in an [`AttemptLedger`] that is
//!    returned on success and failure alike.
//! 3. **Four failure modes**: callers see a budget violation, a total
//!    timeout, exhaustion of every candidate model, or a success value.
//!    Nothing else escapes.
//! 4. **Best-effort shared state**: breaker and budget counters live in
//!    a pluggable [`CounterStore`]; brief over-admission under races is
//!    an accepted trade-off, not a defect.
//!
//! ## Example
//!
//! ```rust,ignore
//! use modelguard::{ExecutionPolicy, MemoryCounterStore, ReliabilityExecutor};
//! use std::sync::Arc;
//!
//! let executor = ReliabilityExecutor::new(Arc::new(MemoryCounterStore::new()));
//! let policy = ExecutionPolicy::new("claude-sonnet-4-5", vec!["claude-haiku-4-5".into()]);
//!
//! match executor.execute(&invoker, &policy, "summarizer", None).await {
//!     Ok(success) => println!("{} answered: {}", success.chosen_model, success.response.content),
//!     Err(failure) => eprintln!("{} after {} attempts", failure.error, failure.ledger.len()),
//! }
//! ```

pub mod clock;
pub mod error;
pub mod events;
pub mod executor;
pub mod invoker;
pub mod ledger;
pub mod policy;
pub mod resilience;
pub mod store;

// Re-export main types at crate root
pub use clock::{BlockingSleeper, Clock, ManualClock, Sleeper, SystemClock, TokioSleeper};
pub use error::{ErrorKind, ExecuteError, InvokeError};
pub use events::{AttemptObserver, NoopObserver};
pub use executor::{ExecutionFailure, ExecutionSuccess, ReliabilityExecutor};
pub use invoker::{InvokeResponse, ModelInvoker, TokenUsage};
pub use ledger::{Attempt, AttemptLedger, AttemptStart};
pub use policy::{resolve_policy, ExecutionPolicy, PolicyOverrides, RetryConfig};
pub use resilience::{
    BackoffCalculator, BackoffStrategy, BudgetConfig, BudgetGate, BudgetScope, CircuitBreaker,
    CircuitBreakerConfig, CircuitState, Enforcement, ErrorClassifier,
};
pub use store::{CounterStore, MemoryCounterStore};
