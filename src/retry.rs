//! Retry policy with exponential backoff.
//!
//! The policy only holds the schedule and the retryable-kind set; the retry
//! loop itself lives in the executor, which re-checks breaker admissibility
//! before every attempt.
//!
//! ## Example
//!
//! ```rust,ignore
//! use armature_resilience::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(5)
//!     .initial_delay(Duration::from_millis(250))
//!     .max_delay(Duration::from_secs(5));
//! ```

use crate::error::ErrorKind;
use std::time::Duration;

/// Retry policy: attempt limit, backoff schedule, and retryable kinds.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the initial one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Cap applied to every computed delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt (typically 2.0).
    pub backoff_multiplier: f64,
    /// Error kinds eligible for retry. Timeouts are always eligible.
    pub retryable_kinds: Vec<ErrorKind>,
    /// Add 0-50% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            retryable_kinds: vec![ErrorKind::Timeout, ErrorKind::ExternalService],
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt limit.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the initial delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the retryable kinds.
    pub fn retryable_kinds(mut self, kinds: impl Into<Vec<ErrorKind>>) -> Self {
        self.retryable_kinds = kinds.into();
        self
    }

    /// Enable random jitter on delays.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Whether this policy retries the given error kind.
    ///
    /// Timeouts are always retryable under a retry policy, on top of the
    /// configured kind set.
    pub fn allows(&self, kind: ErrorKind) -> bool {
        kind == ErrorKind::Timeout || self.retryable_kinds.contains(&kind)
    }

    /// Delay before re-running the given attempt (1-indexed):
    /// `min(initial_delay * multiplier^(attempt-1), max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let millis = (self.initial_delay.as_millis() as f64 * factor) as u64;
        let mut delay = Duration::from_millis(millis).min(self.max_delay);

        if self.jitter {
            let jitter_millis = (delay.as_millis() as f64 * rand_factor() * 0.5) as u64;
            delay = (delay + Duration::from_millis(jitter_millis)).min(self.max_delay);
        }

        delay
    }
}

/// Generate a random factor between 0.0 and 1.0.
fn rand_factor() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
