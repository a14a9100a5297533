//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → retries.rs (retry transient failures with backoff.rs delays)
//!     → circuit_breaker.rs (fail fast while the resource is marked down)
//!     → recovery.rs (substitute a fallback or stale value for recognized errors)
//!     → compose.rs (wrappers and Pipeline that stack the layers above)
//! ```
//!
//! # Design Decisions
//! - Wrappers are plain higher-order functions; their order is explicit
//! - `CircuitOpen` is never retried and never trips another breaker
//! - Breakers are shared per resource name through `BreakerRegistry`
//! - Recovered values are tagged with their source and never cached

pub mod backoff;
pub mod circuit_breaker;
pub mod compose;
pub mod recovery;
pub mod retries;

pub use circuit_breaker::{
    BreakerRegistry, BreakerSettings, BreakerSnapshot, CallPermit, CircuitBreaker, CircuitStatus,
};
pub use compose::{
    cached, cached_recovered, circuit_breaker, operation, recovery, retry, retry_if, Operation,
    Pipeline,
};
pub use recovery::{FallbackRecovery, Recovered, RecoveryStrategy, Source, StaleCacheRecovery};
pub use retries::RetryPolicy;
