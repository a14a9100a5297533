//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (ranges, rate strings)
//!     → ResilienceConfig (validated, immutable)
//!     → used once at startup to build the shared primitives
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → changed [rate_limit] section sent to the main task
//!     → tier policy swapped atomically (arc-swap)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Only the rate-limit tier policy is hot-swappable; breakers and the cache keep
//!   their startup settings

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BreakerOverride, CacheConfig, CircuitBreakerConfig, HealthConfig, ObservabilityConfig,
    RateLimitConfig, ResilienceConfig, RetryConfig, ServerConfig,
};
