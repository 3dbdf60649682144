//! Execution policy: what to try, how hard, and under which limits.
//!
//! A policy is resolved once per execution from an ordered chain of
//! override layers (tenant first, then global, then built-in defaults)
//! and passed through the call chain as an immutable value. There is no
//! ambient global configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ErrorKind;
use crate::resilience::{BackoffStrategy, BudgetConfig, CircuitBreakerConfig};

/// Serde helpers for durations stored as integer seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helpers for durations stored as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde helpers for optional durations stored as integer seconds.
pub(crate) mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

/// Retry behavior for a single model's attempt loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt, per model.
    pub max_retries: u32,

    /// Delay growth strategy.
    pub strategy: BackoffStrategy,

    /// Base delay before the first retry.
    #[serde(with = "duration_ms")]
    pub base: Duration,

    /// Cap on the exponential delay.
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,

    /// Error kinds retried in addition to the built-in transient set.
    pub extra_retryable_kinds: Vec<ErrorKind>,

    /// Message substrings retried in addition to the built-in signatures.
    pub extra_retryable_patterns: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            strategy: BackoffStrategy::Exponential,
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            extra_retryable_kinds: Vec::new(),
            extra_retryable_patterns: Vec::new(),
        }
    }
}

/// Fully resolved policy for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Candidate models in fallback order, primary first, deduplicated.
    pub models: Vec<String>,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Absent means circuit breaking is disabled.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Absent means no budget checks and no spend recording.
    #[serde(default)]
    pub budget: Option<BudgetConfig>,

    /// Deadline for the whole execution: all retries and fallbacks, not
    /// any individual call.
    #[serde(default, with = "duration_secs_opt")]
    pub total_timeout: Option<Duration>,
}

impl ExecutionPolicy {
    /// Build a policy for a primary model and its fallbacks. Duplicates
    /// are dropped, keeping the first occurrence's position.
    pub fn new(primary: impl Into<String>, fallbacks: impl IntoIterator<Item = String>) -> Self {
        let mut models = vec![primary.into()];
        for model in fallbacks {
            if !models.contains(&model) {
                models.push(model);
            }
        }
        Self {
            models,
            retry: RetryConfig::default(),
            circuit_breaker: None,
            budget: None,
            total_timeout: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn with_budget(mut self, config: BudgetConfig) -> Self {
        self.budget = Some(config);
        self
    }

    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }
}

/// One layer of policy overrides.
///
/// Every field is optional; a layer only speaks for the fields it sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverrides {
    /// Fallback models to try after the primary.
    pub fallback_models: Option<Vec<String>>,
    pub retry: Option<RetryConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub budget: Option<BudgetConfig>,
    #[serde(with = "duration_secs_opt")]
    pub total_timeout: Option<Duration>,
}

impl PolicyOverrides {
    /// Load a layer from YAML, e.g. a tenant's policy file.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

/// Fold override layers into a concrete policy.
///
/// Layers are consulted in the order given (highest priority first); the
/// first layer with a value for a field wins, and `RetryConfig::default`
/// style built-ins are the floor. A pure function: same layers in, same
/// policy out.
pub fn resolve_policy(primary: &str, layers: &[&PolicyOverrides]) -> ExecutionPolicy {
    fn first<'a, T, F>(layers: &[&'a PolicyOverrides], pick: F) -> Option<&'a T>
    where
        F: Fn(&'a PolicyOverrides) -> Option<&'a T>,
    {
        layers.iter().copied().find_map(pick)
    }

    let fallbacks = first(layers, |l| l.fallback_models.as_ref())
        .cloned()
        .unwrap_or_default();

    let mut policy = ExecutionPolicy::new(primary, fallbacks);
    if let Some(retry) = first(layers, |l| l.retry.as_ref()) {
        policy.retry = retry.clone();
    }
    policy.circuit_breaker = first(layers, |l| l.circuit_breaker.as_ref()).cloned();
    policy.budget = first(layers, |l| l.budget.as_ref()).cloned();
    policy.total_timeout = layers.iter().find_map(|l| l.total_timeout);
    policy
}
