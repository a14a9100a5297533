//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     → register_check(name, probe) for each dependency (probes.rs has built-ins)
//!
//! Readiness request:
//!     → registry.rs runs every probe concurrently, each with its own timeout
//!     → per-probe results + overall status (healthy iff all probes healthy)
//! ```
//!
//! # Design Decisions
//! - Probes run in their own tasks so a panic or hang is contained
//! - A probe past its deadline is aborted and reported with error "timeout"
//! - Failures are data in the report, never errors from `run_checks`

pub mod probes;
pub mod registry;

pub use probes::{BreakerProbe, CacheProbe};
pub use registry::{HealthCheckResult, HealthProbe, HealthRegistry, HealthReport, HealthStatus};
