//! Registry of named circuit breakers.
//!
//! Breakers are created lazily on first reference and live for the lifetime
//! of the process; only [`BreakerRegistry::reset`] and
//! [`BreakerRegistry::reset_all`] clear them. The registry is cheap to clone
//! and reachable from any call site without request context.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use crate::clock::{Clock, SystemClock};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Concurrent map from operation name to its circuit breaker.
#[derive(Clone)]
pub struct BreakerRegistry {
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    defaults: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    /// Create a registry with the given default breaker configuration.
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self::with_clock(defaults, Arc::new(SystemClock))
    }

    /// Create a registry with an injected clock shared by all breakers.
    pub fn with_clock(defaults: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            defaults,
            clock,
        }
    }

    /// Get the breaker for an operation, creating it on first reference.
    ///
    /// `config` only applies at creation; an existing breaker keeps the
    /// configuration it was first created with.
    pub fn get_or_create(
        &self,
        operation: &str,
        config: Option<&CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(operation) {
            return existing.value().clone();
        }
        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| {
                let config = config.cloned().unwrap_or_else(|| self.defaults.clone());
                Arc::new(CircuitBreaker::with_clock(
                    operation,
                    config,
                    self.clock.clone(),
                ))
            })
            .value()
            .clone()
    }

    /// Look up an existing breaker.
    pub fn get(&self, operation: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(operation).map(|b| b.value().clone())
    }

    /// Names of all registered operations.
    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|b| b.key().clone()).collect()
    }

    /// Snapshot every registered breaker.
    pub fn snapshots(&self) -> HashMap<String, CircuitBreakerSnapshot> {
        self.breakers
            .iter()
            .map(|b| (b.key().clone(), b.value().stats()))
            .collect()
    }

    /// Reset one breaker to closed with zeroed counters.
    ///
    /// Returns `false` when the operation has never been referenced.
    pub fn reset(&self, operation: &str) -> bool {
        match self.breakers.get(operation) {
            Some(breaker) => {
                breaker.value().reset();
                true
            }
            None => false,
        }
    }

    /// Reset every registered breaker.
    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.value().reset();
        }
    }

    /// Force a breaker open. Returns `false` for unknown operations.
    pub fn force_open(&self, operation: &str) -> bool {
        match self.breakers.get(operation) {
            Some(breaker) => {
                breaker.value().force_open();
                true
            }
            None => false,
        }
    }

    /// Force a breaker closed. Returns `false` for unknown operations.
    pub fn force_close(&self, operation: &str) -> bool {
        match self.breakers.get(operation) {
            Some(breaker) => {
                breaker.value().force_close();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("operations", &self.breakers.len())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;

    #[test]
    fn test_lazy_creation_returns_same_instance() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());

        let first = registry.get_or_create("svc-a", None);
        let second = registry.get_or_create("svc-a", None);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.names(), vec!["svc-a".to_string()]);
    }

    #[test]
    fn test_config_only_applies_on_first_reference() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());

        let custom = CircuitBreakerConfig::default().failure_threshold(1);
        let breaker = registry.get_or_create("svc-a", Some(&custom));
        assert_eq!(breaker.config().failure_threshold, 1);

        // A later call with a different config does not reconfigure.
        let other = CircuitBreakerConfig::default().failure_threshold(42);
        let same = registry.get_or_create("svc-a", Some(&other));
        assert_eq!(same.config().failure_threshold, 1);
    }

    #[test]
    fn test_reset_and_admin_overrides() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());

        assert!(!registry.reset("missing"));
        assert!(!registry.force_open("missing"));

        let breaker = registry.get_or_create("svc-a", None);
        assert!(registry.force_open("svc-a"));
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(registry.force_close("svc-a"));
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert!(registry.reset("svc-a"));
        assert_eq!(breaker.stats().total_requests, 0);
    }

    #[test]
    fn test_reset_all_covers_every_breaker() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());
        for name in ["a", "b", "c"] {
            registry.get_or_create(name, None).record_failure();
        }

        registry.reset_all();
        for (_, snapshot) in registry.snapshots() {
            assert_eq!(snapshot.total_requests, 0);
            assert_eq!(snapshot.state, CircuitState::Closed);
        }
    }
}
