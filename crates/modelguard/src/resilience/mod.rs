//! Resilience building blocks used by the executor.
//!
//! This module provides:
//! - Backoff delay computation with additive jitter
//! - Retryability classification for invoker failures
//! - Circuit breaker keyed per (caller, model, tenant)
//! - Budget gating and spend recording

mod backoff;
mod budget;
mod circuit_breaker;
mod classify;

pub use backoff::{BackoffCalculator, BackoffStrategy};
pub use budget::{BudgetConfig, BudgetGate, BudgetScope, Enforcement};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classify::ErrorClassifier;
