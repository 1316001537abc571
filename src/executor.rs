//! Resilient execution orchestrator.
//!
//! [`ResilienceExecutor`] composes circuit breaking, timeout racing,
//! retry-with-backoff, and fallback substitution around a single named
//! operation. It owns the breaker registry and the per-operation failure
//! and latency counters; construct one at process start and pass it by
//! reference to every consumer.
//!
//! ## Example
//!
//! ```rust,ignore
//! use armature_resilience::{ExecuteOptions, ResilienceExecutor, RetryPolicy};
//! use std::time::Duration;
//!
//! let executor = ResilienceExecutor::new();
//!
//! let profile = executor
//!     .execute_with(
//!         "user-service",
//!         || async { user_client.fetch_profile(id).await },
//!         ExecuteOptions::new()
//!             .timeout(Duration::from_secs(5))
//!             .retry(RetryPolicy::new(3)),
//!     )
//!     .await?;
//! ```

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use crate::clock::{Clock, SystemClock};
use crate::error::{BoxError, ErrorKind, ResilienceError, Result};
use crate::registry::BreakerRegistry;
use crate::retry::RetryPolicy;
use crate::stats::{LatencyWindow, StatsReporter};
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Type alias for an async fallback function.
pub type FallbackFn<T> = Arc<
    dyn Fn() -> Pin<Box<dyn Future<Output = std::result::Result<T, BoxError>> + Send>>
        + Send
        + Sync,
>;

/// Per-call execution options.
pub struct ExecuteOptions<T> {
    /// Caller-side wait limit. The timed-out task is abandoned, not
    /// cancelled: it keeps running in the background and any side effects
    /// still occur. Only the caller stops waiting.
    pub timeout: Option<Duration>,
    /// Retry policy, consulted only when no fallback is set.
    pub retry: Option<RetryPolicy>,
    /// Breaker configuration applied if this call is the first reference to
    /// the operation.
    pub circuit: Option<CircuitBreakerConfig>,
    fallback: Option<FallbackFn<T>>,
}

impl<T> ExecuteOptions<T> {
    /// Create empty options.
    pub fn new() -> Self {
        Self {
            timeout: None,
            retry: None,
            circuit: None,
            fallback: None,
        }
    }

    /// Set the caller-side wait limit.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Set the breaker configuration for first-reference creation.
    pub fn circuit(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit = Some(config);
        self
    }

    /// Set a fallback invoked when the primary task fails.
    ///
    /// A fallback short-circuits retry; its result, success or failure, is
    /// surfaced as-is. Circuit-open rejections are thrown directly and do
    /// not reach the fallback.
    pub fn fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move || Box::pin(fallback())));
        self
    }
}

impl<T> Default for ExecuteOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ExecuteOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("circuit", &self.circuit)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Orchestrator wrapping fallible async operations with circuit breaking,
/// timeouts, retries, and fallbacks.
pub struct ResilienceExecutor {
    registry: BreakerRegistry,
    error_counts: Arc<DashMap<String, u64>>,
    latencies: Arc<DashMap<String, LatencyWindow>>,
    clock: Arc<dyn Clock>,
}

impl ResilienceExecutor {
    /// Create an executor with default breaker configuration.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create an executor with custom default breaker configuration.
    pub fn with_config(defaults: CircuitBreakerConfig) -> Self {
        Self::with_clock(defaults, Arc::new(SystemClock))
    }

    /// Create an executor with an injected clock shared by all breakers.
    pub fn with_clock(defaults: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: BreakerRegistry::with_clock(defaults, clock.clone()),
            error_counts: Arc::new(DashMap::new()),
            latencies: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Execute a task under the named operation's circuit breaker.
    pub async fn execute<T, F, Fut>(&self, operation: &str, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
    {
        self.execute_with(operation, task, ExecuteOptions::new())
            .await
    }

    /// Execute a task with per-call timeout, retry, fallback, and breaker
    /// configuration.
    ///
    /// Failures surface as [`ResilienceError`]; a rejected call (circuit
    /// open) carries the remaining cool-down in
    /// [`retry_after`](ResilienceError::retry_after) and is never retried.
    pub async fn execute_with<T, F, Fut>(
        &self,
        operation: &str,
        mut task: F,
        opts: ExecuteOptions<T>,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
    {
        let breaker = self.registry.get_or_create(operation, opts.circuit.as_ref());
        let max_attempts = opts
            .retry
            .as_ref()
            .map(|policy| policy.max_attempts.max(1))
            .unwrap_or(1);
        let mut attempt: u32 = 1;

        loop {
            let err = match self
                .attempt_once(operation, &breaker, &mut task, opts.timeout)
                .await
            {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            // Rejections signal the caller to back off until the cool-down
            // expires; neither fallback nor retry applies.
            if err.kind == ErrorKind::CircuitOpen {
                return Err(err);
            }

            if let Some(fallback) = &opts.fallback {
                debug!(operation, error = %err, "Primary task failed, using fallback");
                return match fallback().await {
                    Ok(value) => Ok(value),
                    Err(raw) => Err(ResilienceError::wrap(raw, operation)),
                };
            }

            let Some(policy) = &opts.retry else {
                return Err(err);
            };
            if !err.retryable || !policy.allows(err.kind) {
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(
                    operation,
                    attempts = attempt,
                    error = %err,
                    "Final retry attempt failed"
                );
                return Err(err);
            }

            let delay = policy.delay_for_attempt(attempt);
            debug!(
                operation,
                attempt,
                delay = ?delay,
                error = %err,
                "Attempt failed, waiting before retry"
            );
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    /// Run one admit -> execute -> record cycle.
    async fn attempt_once<T, F, Fut>(
        &self,
        operation: &str,
        breaker: &Arc<CircuitBreaker>,
        task: &mut F,
        timeout: Option<Duration>,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
    {
        if !breaker.can_execute() {
            let retry_after = breaker.time_until_retry();
            self.count_error(operation);
            debug!(
                operation,
                retry_after = ?retry_after,
                "Circuit breaker rejected request"
            );
            return Err(ResilienceError::circuit_open(operation, retry_after));
        }

        let started = self.clock.now();
        let outcome = match timeout {
            None => task().await,
            Some(limit) => {
                // The task is detached so an expired wait leaves it running
                // to completion in the background; its side effects are not
                // reflected back to the caller.
                let mut handle = tokio::spawn(task());
                tokio::select! {
                    joined = &mut handle => match joined {
                        Ok(outcome) => outcome,
                        Err(join_err) => Err(Box::new(join_err) as BoxError),
                    },
                    _ = tokio::time::sleep(limit) => {
                        drop(handle);
                        breaker.record_failure();
                        self.count_error(operation);
                        warn!(operation, limit = ?limit, "Operation timed out");
                        return Err(ResilienceError::timeout(operation, limit));
                    }
                }
            }
        };

        match outcome {
            Ok(value) => {
                breaker.record_success();
                self.record_latency(operation, self.clock.now() - started);
                Ok(value)
            }
            Err(raw) => {
                breaker.record_failure();
                self.count_error(operation);
                Err(ResilienceError::wrap(raw, operation))
            }
        }
    }

    fn count_error(&self, operation: &str) {
        *self.error_counts.entry(operation.to_string()).or_insert(0) += 1;
    }

    fn record_latency(&self, operation: &str, latency: Duration) {
        self.latencies
            .entry(operation.to_string())
            .or_default()
            .record(latency);
    }

    /// Read-only stats view sharing this executor's registry and counters.
    pub fn stats(&self) -> StatsReporter {
        StatsReporter::new(
            self.registry.clone(),
            self.error_counts.clone(),
            self.latencies.clone(),
        )
    }

    /// Snapshot one operation's breaker.
    pub fn circuit_stats(&self, operation: &str) -> Option<CircuitBreakerSnapshot> {
        self.registry.get(operation).map(|breaker| breaker.stats())
    }

    /// Snapshot every registered breaker.
    pub fn all_circuit_stats(&self) -> HashMap<String, CircuitBreakerSnapshot> {
        self.registry.snapshots()
    }

    /// Failure counts per operation.
    pub fn error_counts(&self) -> HashMap<String, u64> {
        self.stats().error_counts()
    }

    /// Reset one breaker and drop the operation's failure/latency counters.
    pub fn reset_circuit(&self, operation: &str) -> bool {
        self.error_counts.remove(operation);
        self.latencies.remove(operation);
        self.registry.reset(operation)
    }

    /// Reset every breaker and clear all counters.
    pub fn reset_all(&self) {
        self.error_counts.clear();
        self.latencies.clear();
        self.registry.reset_all();
    }

    /// Operator override: force an operation's circuit open.
    pub fn force_open(&self, operation: &str) -> bool {
        self.registry.force_open(operation)
    }

    /// Operator override: force an operation's circuit closed.
    pub fn force_close(&self, operation: &str) -> bool {
        self.registry.force_close(operation)
    }

    /// Access the underlying registry.
    pub fn registry(&self) -> &BreakerRegistry {
        &self.registry
    }
}

impl Default for ResilienceExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResilienceExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceExecutor")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
