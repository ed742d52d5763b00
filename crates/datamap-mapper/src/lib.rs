//! Orchestration layer of the datamap ORM.
//!
//! One `Mapper` per unit of work composes the injected collaborators: the
//! execution backend, the result cache and the metadata provider. It hands
//! out per-entity `Repository` handles that share a request-scoped
//! `IdentityMap`, so every row hydrates to exactly one live instance and
//! repeated queries return the same references.

pub mod association;
pub mod collection;
pub mod hydrator;
pub mod identity_map;
pub mod mapper;
pub mod query;
pub mod repository;

pub use association::AssociationValue;
pub use collection::Collection;
pub use identity_map::{EntityRef, IdentityMap};
pub use mapper::Mapper;
pub use query::Query;
pub use repository::{FindOptions, Repository};
