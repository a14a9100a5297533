//! Caching subsystem.
//!
//! # Data Flow
//! ```text
//! get(key):
//!     → memory tier (lazy expiry: expired entry removed, kept as stale)
//!     → shared backend, if configured and not degraded
//!     → absent
//!
//! set(key, value, ttl):
//!     → memory tier
//!     → mirrored to backend (failure logged, store degrades to memory-only)
//!
//! get_or_compute(key, ttl, producer):
//!     → get(key)
//!     → on miss, singleflight.rs ensures one producer per key
//! ```
//!
//! # Design Decisions
//! - Sharded maps (DashMap); no lock spans more than one shard
//! - Values are stored as `serde_json::Value` so any serializable type can be
//!   cached and mirrored
//! - The background sweep only bounds memory; reads never rely on it

pub mod backend;
pub mod key;
pub mod singleflight;
pub mod store;

pub use backend::{LocalBackend, MirroredEntry, SharedBackend};
pub use key::cache_key;
pub use singleflight::Computed;
pub use store::{CacheEntry, CacheStore};
