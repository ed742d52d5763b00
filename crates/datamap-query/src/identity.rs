//! Query identity: hashing rendered SQL into cache and collection keys.

use std::hash::{Hash, Hasher};

/// Hash rendered SQL text into a 64-bit query identity.
///
/// Two sources that render identical SQL share one identity, so they share
/// one materialized collection and one cache slot.
pub fn query_hash(sql: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    sql.hash(&mut hasher);
    hasher.finish()
}

/// Identity-map key for a materialized collection.
pub fn collection_key(entity: &str, hash: u64) -> String {
    format!("collection_{}_{:016x}", entity, hash)
}

/// Result-cache key for a query's row set.
pub fn result_cache_key(entity: &str, hash: u64) -> String {
    format!("{}_{:016x}", entity, hash)
}
