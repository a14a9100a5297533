//! Cache key derivation for wrapped functions.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::ResilienceResult;

/// Build `prefix + hex(sha256(json(args)))`.
///
/// Equal arguments always map to the same key; the prefix keeps keys of
/// different call sites apart and makes them invalidatable with
/// `CacheStore::clear_pattern`.
pub fn cache_key<A: Serialize + ?Sized>(prefix: &str, args: &A) -> ResilienceResult<String> {
    let encoded = serde_json::to_vec(args)?;
    let digest = Sha256::digest(&encoded);
    Ok(format!("{}{}", prefix, hex::encode(digest)))
}
