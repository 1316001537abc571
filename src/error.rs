//! Error taxonomy and classification.
//!
//! Every failure surfaced by this crate is a [`ResilienceError`] carrying a
//! classified [`ErrorKind`] and a retryability flag. Raw errors from tasks are
//! never leaked to callers; they ride along as the wrapped error's cause.

use serde::Serialize;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Type alias for boxed errors produced by wrapped tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for resilience operations.
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Classified failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The caller's wait expired before the task completed.
    Timeout,
    /// The circuit breaker rejected the call without running the task.
    CircuitOpen,
    /// A downstream service or network failure.
    ExternalService,
    /// Input or schema validation failure.
    Validation,
    /// A failure inside this process (panics, poisoned invariants).
    Internal,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorKind {
    /// Default retryability for this kind.
    ///
    /// Timeouts and external-service failures are transient by default;
    /// everything else needs an explicit override to be retried.
    pub fn default_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::ExternalService)
    }

    /// Stable string form used in snapshots and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::ExternalService => "EXTERNAL_SERVICE",
            Self::Validation => "VALIDATION",
            Self::Internal => "INTERNAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error shape surfaced to callers.
#[derive(Debug, Error)]
#[error("[{operation}] {kind}: {message}")]
pub struct ResilienceError {
    /// Classified kind.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Operation name the failure belongs to.
    pub operation: String,
    /// Whether a retry policy may re-attempt this failure.
    pub retryable: bool,
    /// Wall-clock time the failure was observed.
    pub occurred_at: SystemTime,
    /// Remaining cool-down for [`ErrorKind::CircuitOpen`] rejections, so the
    /// caller can schedule its own backoff.
    pub retry_after: Option<Duration>,
    /// The underlying cause, when the failure originated in a task.
    #[source]
    pub cause: Option<BoxError>,
}

impl ResilienceError {
    /// Create an error with the kind's default retryability.
    pub fn new(kind: ErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            operation: operation.into(),
            retryable: kind.default_retryable(),
            occurred_at: SystemTime::now(),
            retry_after: None,
            cause: None,
        }
    }

    /// A timeout failure for the given operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            operation,
            format!("operation timed out after {after:?}"),
        )
    }

    /// A circuit-open rejection, carrying the remaining cool-down.
    pub fn circuit_open(operation: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let mut err = Self::new(
            ErrorKind::CircuitOpen,
            operation,
            "circuit breaker is open, request rejected",
        );
        err.retry_after = retry_after;
        err
    }

    /// Override the retryability flag.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: BoxError) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Normalize an arbitrary task error into a `ResilienceError`.
    ///
    /// Idempotent: an error that is already a `ResilienceError` passes
    /// through unchanged. Anything else is classified by shape first
    /// (`std::io::Error` kinds, join errors, JSON errors) and by message
    /// markers second, then tagged with the kind's default retryability.
    pub fn wrap(raw: BoxError, operation: &str) -> Self {
        match raw.downcast::<ResilienceError>() {
            Ok(already_wrapped) => *already_wrapped,
            Err(raw) => {
                let kind = classify(raw.as_ref());
                Self {
                    kind,
                    message: raw.to_string(),
                    operation: operation.to_string(),
                    retryable: kind.default_retryable(),
                    occurred_at: SystemTime::now(),
                    retry_after: None,
                    cause: Some(raw),
                }
            }
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    /// Check if this is a circuit-open rejection.
    pub fn is_circuit_open(&self) -> bool {
        self.kind == ErrorKind::CircuitOpen
    }
}

/// Assign an [`ErrorKind`] to a raw error.
fn classify(err: &(dyn std::error::Error + 'static)) -> ErrorKind {
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        use std::io::ErrorKind as Io;
        return match io.kind() {
            Io::TimedOut | Io::WouldBlock => ErrorKind::Timeout,
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::BrokenPipe
            | Io::UnexpectedEof
            | Io::AddrNotAvailable
            | Io::HostUnreachable
            | Io::NetworkUnreachable => ErrorKind::ExternalService,
            Io::InvalidInput | Io::InvalidData => ErrorKind::Validation,
            _ => ErrorKind::Internal,
        };
    }

    if err.downcast_ref::<tokio::task::JoinError>().is_some() {
        return ErrorKind::Internal;
    }

    if err.downcast_ref::<serde_json::Error>().is_some() {
        return ErrorKind::Validation;
    }

    classify_by_message(&err.to_string())
}

fn classify_by_message(message: &str) -> ErrorKind {
    let message = message.to_lowercase();

    const TIMEOUT_MARKERS: [&str; 3] = ["timeout", "timed out", "deadline"];
    const EXTERNAL_MARKERS: [&str; 9] = [
        "connection",
        "connect",
        "network",
        "unreachable",
        "dns",
        "bad gateway",
        "service unavailable",
        "502",
        "503",
    ];
    const VALIDATION_MARKERS: [&str; 5] =
        ["validation", "invalid", "schema", "missing field", "parse"];

    if TIMEOUT_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorKind::Timeout
    } else if EXTERNAL_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorKind::ExternalService
    } else if VALIDATION_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorKind::Validation
    } else {
        ErrorKind::Unknown
    }
}
