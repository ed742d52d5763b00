//! Structural SQL construction for the datamap ORM.
//!
//! Queries are never edited as strings after the fact. A `SqlTemplate` holds
//! the immutable base query; a `SqlSource` accumulates joins, predicates and
//! modifiers on top of it and renders the final SQL deterministically, any
//! number of times. Query identity (cache and collection keys) is a hash of
//! the rendered text.

pub mod identity;
pub mod source;
pub mod template;

pub use identity::{collection_key, query_hash, result_cache_key};
pub use source::{Connective, SqlSource};
pub use template::SqlTemplate;
