//! # Armature Resilience
//!
//! A resilient execution core for async Rust: wrap arbitrary fallible
//! operations with circuit breaking, timeout enforcement, retry with
//! exponential backoff, and fallback substitution, with uniform statistics
//! and a typed error taxonomy.
//!
//! ## Features
//!
//! - **Circuit Breaker**: Per-operation state machine with absolute and
//!   percentage-based opening, bounded half-open probing, and automatic
//!   recovery
//! - **Retry with Backoff**: Exponential backoff with cap and optional
//!   jitter, keyed off the error taxonomy
//! - **Timeouts**: Caller-side wait limits; the timed-out task is abandoned,
//!   never cooperatively cancelled
//! - **Fallbacks**: Alternate code path invoked in place of retrying
//! - **Error Taxonomy**: Every failure surfaces as a classified
//!   [`ResilienceError`] with a retryability flag
//! - **Statistics**: Serializable snapshots of breaker state, failure
//!   counts, and rolling latency windows
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use armature_resilience::{ExecuteOptions, ResilienceExecutor, RetryPolicy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = ResilienceExecutor::new();
//!
//!     let answer = executor
//!         .execute_with(
//!             "inference",
//!             || async { Ok::<_, _>("model output".to_string()) },
//!             ExecuteOptions::new()
//!                 .timeout(Duration::from_secs(30))
//!                 .retry(RetryPolicy::new(3)),
//!         )
//!         .await?;
//!
//!     println!("{answer}");
//!     Ok(())
//! }
//! ```
//!
//! ## With Fallback and Custom Circuit
//!
//! ```rust,no_run
//! use armature_resilience::{CircuitBreakerConfig, ExecuteOptions, ResilienceExecutor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = ResilienceExecutor::new();
//!
//!     let config = CircuitBreakerConfig::default()
//!         .failure_threshold(3)
//!         .open_duration(Duration::from_secs(30));
//!
//!     let report = executor
//!         .execute_with(
//!             "weather-api",
//!             || async { Err("connection refused".into()) },
//!             ExecuteOptions::new()
//!                 .circuit(config)
//!                 .fallback(|| async { Ok("cached forecast".to_string()) }),
//!         )
//!         .await?;
//!
//!     assert_eq!(report, "cached forecast");
//!     Ok(())
//! }
//! ```

mod circuit_breaker;
mod clock;
mod error;
mod executor;
mod registry;
mod retry;
mod stats;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
    StateChangeListener,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BoxError, ErrorKind, ResilienceError, Result};
pub use executor::{ExecuteOptions, FallbackFn, ResilienceExecutor};
pub use registry::BreakerRegistry;
pub use retry::RetryPolicy;
pub use stats::{LatencySnapshot, ResilienceReport, StatsReporter};
