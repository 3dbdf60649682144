//! The invoker boundary: one network call to one model.
//!
//! Providers implement [`ModelInvoker`]; the executor owns everything
//! around the call (retries, fallback, breaking, budgets) but never the
//! call itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InvokeError;

/// Token accounting reported by a provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Tokens read from the provider's prompt cache.
    pub cached_tokens: u64,
    /// Tokens written to the provider's prompt cache.
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    /// Billable total: input plus output.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Successful response from one model call.
#[derive(Debug, Clone)]
pub struct InvokeResponse {
    /// Generated content.
    pub content: String,
    /// Model that actually served the call.
    pub model: String,
    /// Token usage.
    pub usage: TokenUsage,
    /// Metered cost of the call, in the account's currency unit.
    pub cost: f64,
}

/// One network call to one model.
///
/// Implementations own their per-call timeout; the executor's total
/// deadline bounds the sum of attempts and never interrupts a call
/// mid-flight.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, model_id: &str) -> Result<InvokeResponse, InvokeError>;
}
