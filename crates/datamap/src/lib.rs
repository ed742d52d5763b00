//! Datamap - a metadata-driven data mapper for SQL rows.
//!
//! Datamap maps plain structs onto table rows through injected metadata,
//! providing:
//!
//! - Per-entity repositories with fluent, lazily executed queries
//! - An identity map: every row hydrates to exactly one live instance
//! - Lazy and eager association loading between entities
//! - Structural SQL assembly from parsed templates, no string surgery
//! - Tagged result caching across units of work
//!
//! # Quick Start
//!
//! ```ignore
//! use datamap::prelude::*;
//!
//! let provider = StaticMetadataProvider::new();
//! provider.register(
//!     EntityMetadata::builder("customer", "customer")
//!         .property("id", "id")
//!         .property("name", "name")
//!         .build()?,
//! );
//!
//! let mapper = Mapper::new(execution, cache, Arc::new(provider));
//! let customers = mapper.repository::<Customer>()?;
//!
//! // Insert
//! let mut customer = Customer { name: "Ada".into(), ..Default::default() };
//! let id = customers.save(&mut customer)?;
//!
//! // Query lazily, execute on iter
//! let recent = customers
//!     .find_all()
//!     .filter("c.name IS NOT NULL")
//!     .order_by("c.id DESC")?
//!     .limit(10);
//! for customer in recent.iter()? {
//!     println!("{:?}", customer.read().unwrap());
//! }
//!
//! // The same row always hydrates to the same instance
//! let one = customers.find_by_id(id)?;
//! let two = customers.find_by_id(id)?;
//! assert!(Arc::ptr_eq(&one, &two));
//! ```

// Re-export the public surface of the sub-crates
pub use datamap_core::{
    // Collaborator seams
    Execution,
    MetadataProvider,
    NoopCache,
    ResultCache,
    // Entity contract
    AssociationSlot,
    Entity,
    EntityState,
    MetaBag,
    // Errors
    Error,
    ExecutionError,
    MetadataError,
    NotFoundError,
    Result,
    TypeError,
    // Mapping metadata
    AssociationKind,
    AssociationSpec,
    EntityMetadata,
    MetadataBuilder,
    PropertyMapping,
    StaticMetadataProvider,
    // Rows and values
    ColumnInfo,
    Row,
    Value,
};

pub use datamap_query::{Connective, SqlSource, SqlTemplate};

pub use datamap_mapper::{
    AssociationValue, Collection, EntityRef, FindOptions, IdentityMap, Mapper, Query, Repository,
};

/// The common imports for working with datamap.
pub mod prelude {
    pub use crate::{
        AssociationValue, Connective, Entity, EntityMetadata, EntityRef, EntityState, Error,
        Execution, FindOptions, Mapper, MetaBag, MetadataProvider, Query, Repository, Result,
        ResultCache, Row, StaticMetadataProvider, Value,
    };
}
