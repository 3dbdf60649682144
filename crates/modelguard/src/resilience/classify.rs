//! Retryability classification for invoker failures.

use lazy_static::lazy_static;

use crate::error::{ErrorKind, InvokeError};

/// Error kinds retried by default: network-level failures that tend to
/// clear on their own.
const DEFAULT_RETRYABLE_KINDS: &[ErrorKind] = &[
    ErrorKind::Timeout,
    ErrorKind::ConnectionRefused,
    ErrorKind::ConnectionReset,
    ErrorKind::Dns,
    ErrorKind::Tls,
    ErrorKind::Transport,
];

lazy_static! {
    /// Message signatures that mark an otherwise opaque error as transient.
    /// Matched as lowercase substrings.
    static ref DEFAULT_RETRYABLE_PATTERNS: Vec<&'static str> = vec![
        "rate limit",
        "rate_limit",
        "429",
        "500",
        "502",
        "503",
        "504",
        "timeout",
        "timed out",
        "overloaded",
        "capacity",
        "connection reset",
        "connection refused",
    ];
}

/// Decides whether a failure is worth retrying on the same model.
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// An error is retryable when either its kind is in the transient set
    /// or its lowercased message carries a known transient signature.
    ///
    /// The message check exists because some transports surface rate
    /// limits and 5xx responses as generic errors whose only useful
    /// signal is the text. Anything matching neither rule ends the
    /// current model's retry loop; the executor then moves to the next
    /// fallback model.
    pub fn is_retryable(
        error: &InvokeError,
        extra_kinds: &[ErrorKind],
        extra_patterns: &[String],
    ) -> bool {
        if DEFAULT_RETRYABLE_KINDS.contains(&error.kind) || extra_kinds.contains(&error.kind) {
            return true;
        }

        let message = error.message.to_lowercase();
        DEFAULT_RETRYABLE_PATTERNS
            .iter()
            .any(|pattern| message.contains(pattern))
            || extra_patterns
                .iter()
                .any(|pattern| message.contains(&pattern.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retryable(error: &InvokeError) -> bool {
        ErrorClassifier::is_retryable(error, &[], &[])
    }

    #[test]
    fn test_network_kinds_are_retryable() {
        for kind in [
            ErrorKind::Timeout,
            ErrorKind::ConnectionRefused,
            ErrorKind::ConnectionReset,
            ErrorKind::Dns,
            ErrorKind::Tls,
            ErrorKind::Transport,
        ] {
            assert!(retryable(&InvokeError::new(kind, "boom")), "{kind} should retry");
        }
    }

    #[test]
    fn test_validation_and_auth_are_terminal() {
        assert!(!retryable(&InvokeError::new(
            ErrorKind::Validation,
            "max_tokens must be positive"
        )));
        assert!(!retryable(&InvokeError::new(ErrorKind::Auth, "invalid api key")));
    }

    #[test]
    fn test_message_signatures_rescue_opaque_errors() {
        assert!(retryable(&InvokeError::other("HTTP 503 from upstream")));
        assert!(retryable(&InvokeError::other("Rate Limit reached, slow down")));
        assert!(retryable(&InvokeError::other("model is OVERLOADED")));
        assert!(retryable(&InvokeError::new(
            ErrorKind::Api,
            "status 429: too many requests"
        )));
        assert!(!retryable(&InvokeError::other("unknown model identifier")));
    }

    #[test]
    fn test_extra_kinds_extend_the_default_set() {
        let err = InvokeError::new(ErrorKind::RateLimited, "slow down");
        assert!(!retryable(&err));
        assert!(ErrorClassifier::is_retryable(
            &err,
            &[ErrorKind::RateLimited],
            &[]
        ));
    }

    #[test]
    fn test_extra_patterns_match_case_insensitively() {
        let err = InvokeError::other("Please Try Again Later");
        assert!(!retryable(&err));
        assert!(ErrorClassifier::is_retryable(
            &err,
            &[],
            &["try again".to_string()]
        ));
    }
}
