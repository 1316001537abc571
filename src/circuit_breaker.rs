//! Circuit Breaker pattern implementation.
//!
//! The circuit breaker prevents cascade failures by monitoring failures per
//! named operation and "opening" the circuit to reject requests when a
//! threshold is reached.
//!
//! ## States
//!
//! - **Closed**: Normal operation, requests pass through
//! - **Open**: Circuit is tripped, requests are rejected immediately
//! - **Half-Open**: Testing if the downstream dependency has recovered
//!
//! Opening is triggered either by an absolute failure count or by an error
//! percentage once enough requests have been observed. The only way out of
//! `Open` is the cool-down expiring on an admissibility check; any failure
//! during `HalfOpen` probing reopens the circuit immediately.
//!
//! ## Example
//!
//! ```rust,ignore
//! use armature_resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new("payments", CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     open_duration: Duration::from_secs(60),
//!     ..Default::default()
//! });
//!
//! if breaker.can_execute() {
//!     match payment_gateway.charge().await {
//!         Ok(receipt) => breaker.record_success(),
//!         Err(_) => breaker.record_failure(),
//!     }
//! }
//! ```

use crate::clock::{Clock, SystemClock};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, a bounded number of probes are allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Absolute failure count that forces the circuit open.
    pub failure_threshold: u32,
    /// Error percentage (0-100) that opens the circuit once enough requests
    /// have been observed.
    pub error_threshold_percentage: u32,
    /// Minimum recorded requests before the percentage threshold applies.
    pub volume_threshold: u64,
    /// Successes required in half-open state to close the circuit.
    pub success_threshold: u32,
    /// Time the circuit stays open before a half-open probe is allowed.
    pub open_duration: Duration,
    /// Number of probes admitted while half-open.
    pub max_half_open_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            error_threshold_percentage: 50,
            volume_threshold: 10,
            success_threshold: 2,
            open_duration: Duration::from_secs(60),
            max_half_open_attempts: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the absolute failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the error percentage threshold.
    pub fn error_threshold_percentage(mut self, percentage: u32) -> Self {
        self.error_threshold_percentage = percentage;
        self
    }

    /// Set the request volume required before the percentage threshold applies.
    pub fn volume_threshold(mut self, volume: u64) -> Self {
        self.volume_threshold = volume;
        self
    }

    /// Set the success threshold for recovery.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the open cool-down duration.
    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }

    /// Set the number of half-open probes allowed.
    pub fn max_half_open_attempts(mut self, attempts: u32) -> Self {
        self.max_half_open_attempts = attempts;
        self
    }
}

/// Mutable breaker record. Owned exclusively by the breaker and only ever
/// touched under its mutex, so threshold checks see consistent counters.
#[derive(Debug)]
struct BreakerRecord {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    total_requests: u64,
    half_open_attempts: u32,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    state_changed_at: Instant,
    state_change_count: u64,
    next_attempt_at: Option<Instant>,
}

impl BreakerRecord {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            half_open_attempts: 0,
            last_failure_at: None,
            last_success_at: None,
            state_changed_at: now,
            state_change_count: 0,
            next_attempt_at: None,
        }
    }
}

/// Callback invoked on every state transition: `(name, from, to)`.
pub type StateChangeListener = Box<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Circuit breaker for a single named operation.
///
/// All counter and state mutations are serialized behind one mutex; a failure
/// recorded by one caller is immediately visible to every concurrent caller
/// of the same operation.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    record: Mutex<BreakerRecord>,
    listeners: RwLock<Vec<StateChangeListener>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a circuit breaker with an injected clock.
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        let now = clock.now();
        info!(
            name = %name,
            failure_threshold = config.failure_threshold,
            error_threshold_percentage = config.error_threshold_percentage,
            open_duration = ?config.open_duration,
            "Circuit breaker initialized"
        );
        Self {
            name,
            config,
            clock,
            record: Mutex::new(BreakerRecord::new(now)),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Get the breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the breaker configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state without side effects.
    ///
    /// An expired cool-down still reports `Open` here; only [`can_execute`]
    /// transitions the circuit to half-open.
    ///
    /// [`can_execute`]: Self::can_execute
    pub fn state(&self) -> CircuitState {
        self.record.lock().state
    }

    /// Check whether a call may run, transitioning `Open` to `HalfOpen` once
    /// the cool-down has elapsed.
    pub fn can_execute(&self) -> bool {
        let now = self.clock.now();
        let (allowed, transition) = {
            let mut record = self.record.lock();
            match record.state {
                CircuitState::Closed => (true, None),
                CircuitState::Open => {
                    let expired = record
                        .next_attempt_at
                        .is_some_and(|next_attempt| now >= next_attempt);
                    if expired {
                        let transition = apply_transition(&mut record, CircuitState::HalfOpen, now);
                        (true, transition)
                    } else {
                        (false, None)
                    }
                }
                CircuitState::HalfOpen => (
                    record.half_open_attempts < self.config.max_half_open_attempts,
                    None,
                ),
            }
        };
        self.notify(transition);
        allowed
    }

    /// Remaining cool-down while the circuit is open.
    pub fn time_until_retry(&self) -> Option<Duration> {
        let record = self.record.lock();
        match record.state {
            CircuitState::Open => record
                .next_attempt_at
                .map(|next_attempt| next_attempt.saturating_duration_since(self.clock.now())),
            _ => None,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let now = self.clock.now();
        let transition = {
            let mut record = self.record.lock();
            record.success_count += 1;
            record.total_requests += 1;
            record.last_success_at = Some(now);

            match record.state {
                CircuitState::Closed => {
                    record.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    record.half_open_attempts += 1;
                    if record.half_open_attempts >= self.config.success_threshold {
                        apply_transition(&mut record, CircuitState::Closed, now)
                    } else {
                        None
                    }
                }
                CircuitState::Open => {
                    // A call admitted before the circuit opened can complete
                    // afterwards. Counted in the lifetime totals only.
                    debug!(name = %self.name, "Success recorded while circuit open");
                    None
                }
            }
        };
        self.notify(transition);
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let transition = {
            let mut record = self.record.lock();
            record.failure_count += 1;
            record.total_requests += 1;
            record.last_failure_at = Some(now);

            match record.state {
                CircuitState::HalfOpen => {
                    // A single failure during probing reopens the circuit.
                    self.open_locked(&mut record, now)
                }
                CircuitState::Closed if self.should_open(&record) => {
                    self.open_locked(&mut record, now)
                }
                _ => None,
            }
        };
        self.notify(transition);
    }

    fn should_open(&self, record: &BreakerRecord) -> bool {
        if record.failure_count >= self.config.failure_threshold {
            return true;
        }
        if record.total_requests < self.config.volume_threshold {
            return false;
        }
        let error_percentage =
            (record.failure_count as f64 / record.total_requests as f64) * 100.0;
        error_percentage >= self.config.error_threshold_percentage as f64
    }

    fn open_locked(
        &self,
        record: &mut BreakerRecord,
        now: Instant,
    ) -> Option<(CircuitState, CircuitState)> {
        let change = apply_transition(record, CircuitState::Open, now);
        if change.is_some() {
            record.next_attempt_at = Some(now + self.config.open_duration);
            warn!(
                name = %self.name,
                failures = record.failure_count,
                total_requests = record.total_requests,
                "Circuit breaker OPENED"
            );
        }
        change
    }

    /// Reset to closed with all counters zeroed.
    pub fn reset(&self) {
        let now = self.clock.now();
        let transition = {
            let mut record = self.record.lock();
            let previous = record.state;
            *record = BreakerRecord::new(now);
            (previous != CircuitState::Closed).then(|| {
                info!(name = %self.name, "Circuit breaker reset");
                (previous, CircuitState::Closed)
            })
        };
        self.notify(transition);
    }

    /// Operator override: force the circuit open.
    pub fn force_open(&self) {
        let now = self.clock.now();
        let transition = {
            let mut record = self.record.lock();
            let change = apply_transition(&mut record, CircuitState::Open, now);
            if change.is_some() {
                record.next_attempt_at = Some(now + self.config.open_duration);
                warn!(name = %self.name, "Circuit breaker forced OPEN");
            }
            change
        };
        self.notify(transition);
    }

    /// Operator override: force the circuit closed.
    pub fn force_close(&self) {
        let now = self.clock.now();
        let transition = {
            let mut record = self.record.lock();
            let change = apply_transition(&mut record, CircuitState::Closed, now);
            if change.is_some() {
                info!(name = %self.name, "Circuit breaker forced CLOSED");
            }
            change
        };
        self.notify(transition);
    }

    /// Subscribe to state transitions.
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.listeners.write().push(Box::new(listener));
    }

    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = transition else {
            return;
        };
        debug!(name = %self.name, from = %from, to = %to, "Circuit breaker state changed");
        for listener in self.listeners.read().iter() {
            listener(&self.name, from, to);
        }
    }

    /// Get an immutable snapshot of the breaker record.
    pub fn stats(&self) -> CircuitBreakerSnapshot {
        let now = self.clock.now();
        let record = self.record.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: record.state,
            failure_count: record.failure_count,
            success_count: record.success_count,
            total_requests: record.total_requests,
            total_failures: record.total_requests - record.success_count,
            half_open_attempts: record.half_open_attempts,
            state_change_count: record.state_change_count,
            state_changed_ms_ago: now
                .saturating_duration_since(record.state_changed_at)
                .as_millis() as u64,
            last_failure_ms_ago: record
                .last_failure_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            last_success_ms_ago: record
                .last_success_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            open_remaining_ms: record
                .next_attempt_at
                .map(|at| at.saturating_duration_since(now).as_millis() as u64),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("record", &*self.record.lock())
            .finish_non_exhaustive()
    }
}

/// Apply a state transition and stamp the bookkeeping fields.
///
/// Returns `(from, to)` when the state actually changed. `next_attempt_at`
/// for `Open` entries is stamped by the caller, which knows the cool-down.
fn apply_transition(
    record: &mut BreakerRecord,
    to: CircuitState,
    now: Instant,
) -> Option<(CircuitState, CircuitState)> {
    if record.state == to {
        return None;
    }
    let from = record.state;
    record.state = to;
    record.state_changed_at = now;
    record.state_change_count += 1;
    record.next_attempt_at = None;
    match to {
        CircuitState::HalfOpen => {
            record.half_open_attempts = 0;
        }
        CircuitState::Closed => {
            record.failure_count = 0;
            record.half_open_attempts = 0;
        }
        CircuitState::Open => {}
    }
    Some((from, to))
}

/// Immutable, serializable circuit breaker snapshot.
///
/// `Instant`-based fields are exported as relative milliseconds so the
/// snapshot can be returned verbatim from an admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    /// Operation name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures since the last success or close (absolute threshold input).
    pub failure_count: u32,
    /// Lifetime successes.
    pub success_count: u64,
    /// Lifetime recorded requests (rejections excluded).
    pub total_requests: u64,
    /// Lifetime failures.
    pub total_failures: u64,
    /// Probes used in the current half-open phase.
    pub half_open_attempts: u32,
    /// Number of state transitions.
    pub state_change_count: u64,
    /// Milliseconds since the last state change.
    pub state_changed_ms_ago: u64,
    /// Milliseconds since the last failure.
    pub last_failure_ms_ago: Option<u64>,
    /// Milliseconds since the last success.
    pub last_success_ms_ago: Option<u64>,
    /// Milliseconds until a half-open probe is admitted; `Some` iff open.
    pub open_remaining_ms: Option<u64>,
}

impl CircuitBreakerSnapshot {
    /// Lifetime success rate (0.0 - 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.success_count as f64 / self.total_requests as f64
        }
    }

    /// Lifetime failure rate (0.0 - 1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker_with_clock(config: CircuitBreakerConfig) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::with_clock("test", config, Arc::new(clock.clone()));
        (breaker, clock)
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let (cb, _clock) = breaker_with_clock(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        assert!(cb.time_until_retry().unwrap() > Duration::ZERO);
    }

    #[test]
    fn test_success_resets_failure_count_while_closed() {
        let (cb, _clock) = breaker_with_clock(CircuitBreakerConfig {
            failure_threshold: 5,
            ..Default::default()
        });

        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.stats().failure_count, 4);

        cb.record_success();
        assert_eq!(cb.stats().failure_count, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_cooldown_admits_probe_and_transitions_to_half_open() {
        let (cb, clock) = breaker_with_clock(CircuitBreakerConfig {
            failure_threshold: 1,
            open_duration: Duration::from_secs(30),
            ..Default::default()
        });

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        // state() never leaves Open on its own, even past the cool-down.
        clock.advance(Duration::from_secs(31));
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.stats().half_open_attempts, 0);
    }

    #[test]
    fn test_half_open_failure_reopens_immediately() {
        let (cb, clock) = breaker_with_clock(CircuitBreakerConfig {
            failure_threshold: 1,
            open_duration: Duration::from_secs(30),
            ..Default::default()
        });

        cb.record_failure();
        clock.advance(Duration::from_secs(31));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        assert!(cb.time_until_retry().is_some());
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let (cb, clock) = breaker_with_clock(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
            ..Default::default()
        });

        cb.record_failure();
        clock.advance(Duration::from_secs(31));
        assert!(cb.can_execute());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
        assert!(cb.stats().open_remaining_ms.is_none());
    }

    #[test]
    fn test_half_open_attempt_cap() {
        let (cb, clock) = breaker_with_clock(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 10,
            max_half_open_attempts: 2,
            open_duration: Duration::from_secs(30),
            ..Default::default()
        });

        cb.record_failure();
        clock.advance(Duration::from_secs(31));
        assert!(cb.can_execute());

        cb.record_success();
        assert!(cb.can_execute());
        cb.record_success();
        // Both probes used without reaching the success threshold.
        assert!(!cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_percentage_opening_waits_for_volume() {
        let (cb, _clock) = breaker_with_clock(CircuitBreakerConfig {
            failure_threshold: 100,
            error_threshold_percentage: 50,
            volume_threshold: 10,
            ..Default::default()
        });

        // 4 failures out of 4: 100% errors, but below the volume threshold.
        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        // The success resets the consecutive failure count.
        cb.record_success();
        assert_eq!(cb.stats().failure_count, 0);

        // 4 more failures: 4/9 is under 50%, still closed.
        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.stats().total_requests, 9);
        assert_eq!(cb.state(), CircuitState::Closed);

        // The 10th request reaches the volume threshold at 5/10 = 50%.
        cb.record_failure();
        assert_eq!(cb.stats().total_requests, 10);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_force_open_and_force_close() {
        let (cb, _clock) = breaker_with_clock(CircuitBreakerConfig::default());

        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        assert!(cb.stats().open_remaining_ms.is_some());

        cb.force_close();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_reset_zeroes_counters() {
        let (cb, _clock) = breaker_with_clock(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.success_count, 0);
        assert!(stats.open_remaining_ms.is_none());
    }

    #[test]
    fn test_rejected_calls_do_not_count_as_requests() {
        let (cb, _clock) = breaker_with_clock(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        cb.record_failure();
        assert_eq!(cb.stats().total_requests, 1);

        for _ in 0..5 {
            assert!(!cb.can_execute());
        }
        assert_eq!(cb.stats().total_requests, 1);
    }

    #[test]
    fn test_state_change_listener() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let (cb, clock) = breaker_with_clock(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            open_duration: Duration::from_secs(30),
            ..Default::default()
        });

        let transitions = Arc::new(AtomicU32::new(0));
        let seen = transitions.clone();
        cb.on_state_change(move |name, _from, _to| {
            assert_eq!(name, "test");
            seen.fetch_add(1, Ordering::SeqCst);
        });

        cb.record_failure(); // Closed -> Open
        clock.advance(Duration::from_secs(31));
        assert!(cb.can_execute()); // Open -> HalfOpen
        cb.record_success(); // HalfOpen -> Closed

        assert_eq!(transitions.load(Ordering::SeqCst), 3);
        assert_eq!(cb.stats().state_change_count, 3);
    }

    #[test]
    fn test_snapshot_serializes() {
        let (cb, _clock) = breaker_with_clock(CircuitBreakerConfig::default());
        cb.record_success();

        let json = serde_json::to_value(cb.stats()).unwrap();
        assert_eq!(json["state"], "CLOSED");
        assert_eq!(json["total_requests"], 1);
    }
}
