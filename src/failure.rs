//! Classified failures and the fixed exit-code taxonomy.
//!
//! Every error that reaches the user is a [`Failure`]: a message plus one of
//! five [`ErrorCode`]s, a retryable flag, and an optional remediation hint.
//! Transport and provider errors are classified into failures at the adapter
//! boundary, so nothing above it ever sees a raw `reqwest` error.

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Fixed failure taxonomy. The numeric value doubles as the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Invalid arguments; the caller must fix the input.
    BadArgs,
    /// Missing or rejected credentials.
    Auth,
    /// The deadline expired or the transport timed out.
    Timeout,
    /// The upstream asked us to slow down.
    RateLimited,
    /// Anything else the upstream got wrong, including malformed payloads.
    RemoteError,
}

impl ErrorCode {
    /// Numeric code, also used as the process exit code.
    pub fn code(self) -> u8 {
        match self {
            ErrorCode::BadArgs => 2,
            ErrorCode::Auth => 4,
            ErrorCode::Timeout => 7,
            ErrorCode::RateLimited => 8,
            ErrorCode::RemoteError => 9,
        }
    }

    /// Whether failures with this code are retryable unless stated otherwise.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout | ErrorCode::RateLimited | ErrorCode::RemoteError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadArgs => "BAD_ARGS",
            ErrorCode::Auth => "AUTH",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::RemoteError => "REMOTE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// A classified failure, ready to be rendered as an error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct Failure {
    pub message: String,
    pub code: ErrorCode,
    pub retryable: bool,
    pub remediation: Option<String>,
    /// Server-provided wait before the next attempt (from `Retry-After`).
    pub retry_after: Option<Duration>,
    /// Number of upstream attempts made before giving up. Diagnostic only.
    pub attempts: u32,
}

impl Failure {
    /// Creates a failure with the code's default retryability.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            retryable: code.default_retryable(),
            remediation: None,
            retry_after: None,
            attempts: 0,
        }
    }

    pub fn bad_args(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadArgs, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Auth, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimited, message)
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RemoteError, message)
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.code.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_exit_code_table() {
        assert_eq!(ErrorCode::BadArgs.code(), 2);
        assert_eq!(ErrorCode::Auth.code(), 4);
        assert_eq!(ErrorCode::Timeout.code(), 7);
        assert_eq!(ErrorCode::RateLimited.code(), 8);
        assert_eq!(ErrorCode::RemoteError.code(), 9);
    }

    #[test]
    fn test_default_retryability() {
        assert!(!Failure::bad_args("x").retryable);
        assert!(!Failure::auth("x").retryable);
        assert!(Failure::timeout("x").retryable);
        assert!(Failure::rate_limited("x").retryable);
        assert!(Failure::remote("x").retryable);
    }

    #[test]
    fn test_builder_sets_metadata() {
        let failure = Failure::rate_limited("slow down")
            .with_remediation("Retry after 3s")
            .with_retry_after(Duration::from_secs(3))
            .with_attempts(2);

        assert_eq!(failure.remediation.as_deref(), Some("Retry after 3s"));
        assert_eq!(failure.retry_after, Some(Duration::from_secs(3)));
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.exit_code(), 8);
    }

    #[test]
    fn test_code_serializes_as_integer() {
        let json = serde_json::to_string(&ErrorCode::Timeout).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn test_display_includes_code_name() {
        let failure = Failure::auth("PERPLEXITY_API_KEY not set");
        assert_eq!(failure.to_string(), "AUTH: PERPLEXITY_API_KEY not set");
    }
}
