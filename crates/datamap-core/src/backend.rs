//! External collaborator traits: SQL execution and result caching.

use crate::Result;
use crate::row::Row;

/// Synchronous SQL execution backend.
///
/// The mapper renders complete SQL strings and hands them here; the backend
/// owns connections, drivers and failure details. Errors surface as
/// `Error::Execution` and are never retried by the mapper.
pub trait Execution: Send + Sync {
    /// Run a SELECT and return all rows.
    fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Run a statement, returning the number of affected rows.
    fn execute(&self, sql: &str) -> Result<u64>;

    /// The key generated by the most recent INSERT.
    fn last_insert_id(&self) -> Result<i64>;
}

/// Tagged result cache.
///
/// Keys are opaque strings derived from query identity; tags are entity names
/// so a write to one entity type can drop every cached result that involved
/// it. Payloads are JSON-encoded row sets (`row::encode_rows`).
pub trait ResultCache: Send + Sync {
    fn load(&self, key: &str) -> Option<serde_json::Value>;

    fn save(&self, key: &str, value: serde_json::Value, tags: &[String]);

    /// Drop every entry saved under the given tag.
    fn invalidate(&self, tag: &str);
}

/// A cache that stores nothing and never hits.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl ResultCache for NoopCache {
    fn load(&self, _key: &str) -> Option<serde_json::Value> {
        None
    }

    fn save(&self, _key: &str, _value: serde_json::Value, _tags: &[String]) {}

    fn invalidate(&self, _tag: &str) {}
}
