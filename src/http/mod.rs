//! HTTP surface of the demo service.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, trace + timeout layers)
//!     → /health/*  → handlers.rs (liveness, readiness from HealthRegistry)
//!     → /v1/*      → middleware/rate_limit.rs (tiered limiter, 429 on denial)
//!                  → handlers.rs (breaker inspection and reset, cache clearing)
//! ```
//!
//! # Design Decisions
//! - Health endpoints are never rate limited, so orchestrator probes always get through
//! - The limiter keys on `x-api-key`, falling back to the client IP

pub mod handlers;
pub mod middleware;
pub mod server;

pub use server::{router, serve, AppState};
