//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     validated config → Services (cache, breakers, limiter, health) → AppState
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → resolve the server's graceful-shutdown future
//!
//! Shutdown (shutdown.rs):
//!     trigger() → every tracked task (cache sweeper, rate-window
//!     purger, config reload consumer) leaves its loop
//!     drain(5s) → joins them; stragglers are aborted and logged
//! ```
//!
//! # Design Decisions
//! - Ordered startup in main: config, observability, primitives, then listener
//! - Background tasks subscribe before they are spawned, so none misses the signal

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::Services;
