//! Error taxonomy for the reliability layer.
//!
//! Invoker failures ([`InvokeError`]) are recoverable inside an execution:
//! they are retried or absorbed by falling through to the next candidate
//! model. Only the four [`ExecuteError`] kinds ever reach the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::resilience::BudgetScope;

/// Coarse classification of an invoker failure.
///
/// Providers map their transport/API errors onto these kinds; the
/// classifier uses them for the type-based retry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request timed out at the transport or provider.
    Timeout,
    /// TCP connection refused.
    ConnectionRefused,
    /// Connection dropped mid-request.
    ConnectionReset,
    /// Name resolution failed.
    Dns,
    /// TLS handshake failed.
    Tls,
    /// Other network-transport failure.
    Transport,
    /// Provider signalled rate limiting.
    RateLimited,
    /// Provider returned a non-success API response.
    Api,
    /// Credentials rejected.
    Auth,
    /// Request was malformed or rejected by validation.
    Validation,
    /// Response could not be parsed.
    Parse,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// Stable snake_case name, used for ledger records and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::ConnectionReset => "connection_reset",
            ErrorKind::Dns => "dns",
            ErrorKind::Tls => "tls",
            ErrorKind::Transport => "transport",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Api => "api",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::Parse => "parse",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure returned by the model invoker for one attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct InvokeError {
    /// Structured classification of the failure.
    pub kind: ErrorKind,
    /// Provider/transport message. Some transports surface transient
    /// conditions only here, so the classifier also inspects it.
    pub message: String,
}

impl InvokeError {
    /// Create an error with an explicit kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a request timeout.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Shorthand for an unclassified failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }
}

fn fmt_last_error(last_error: &Option<InvokeError>) -> String {
    match last_error {
        Some(e) => e.to_string(),
        None => "no attempt was made (all circuits open)".to_string(),
    }
}

fn fmt_duration(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}

/// Terminal failures surfaced by the executor.
///
/// Circuit-breaker rejections are deliberately absent: an open breaker is
/// recorded in the ledger and the executor moves to the next candidate
/// model instead of failing the execution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecuteError {
    /// A configured budget ceiling was already reached before the call.
    #[error("budget exceeded for {scope}: current {current} >= limit {limit} (caller {caller})")]
    BudgetExceeded {
        scope: BudgetScope,
        limit: f64,
        current: f64,
        caller: String,
        tenant: Option<String>,
    },

    /// The total deadline elapsed before any model succeeded.
    #[error(
        "total timeout of {} exceeded after {}",
        fmt_duration(.configured),
        fmt_duration(.elapsed)
    )]
    TotalTimeout {
        configured: Duration,
        elapsed: Duration,
    },

    /// Every candidate model was tried (or short-circuited) without success.
    #[error(
        "all candidate models exhausted [{}]: {}",
        .models.join(", "),
        fmt_last_error(.last_error)
    )]
    AllModelsExhausted {
        models: Vec<String>,
        last_error: Option<InvokeError>,
    },
}
