//! Core types and collaborator contracts for the datamap ORM.
//!
//! This crate provides the foundational abstractions shared by the query and
//! mapper layers:
//!
//! - `Value` dynamic SQL values with centralized literal rendering
//! - `Row` result rows with shared column metadata
//! - `EntityMetadata` and the `MetadataProvider` seam
//! - `Entity` trait for mapped structs, with the `MetaBag` and lifecycle state
//! - `Execution` and `ResultCache` collaborator traits

pub mod backend;
pub mod entity;
pub mod error;
pub mod metadata;
pub mod row;
pub mod value;

pub use backend::{Execution, NoopCache, ResultCache};
pub use entity::{AssociationSlot, Entity, EntityState, MetaBag};
pub use error::{Error, ExecutionError, MetadataError, NotFoundError, Result, TypeError};
pub use metadata::{
    AssociationKind, AssociationSpec, EntityMetadata, MetadataBuilder, MetadataProvider,
    PropertyMapping, StaticMetadataProvider,
};
pub use row::{ColumnInfo, Row, decode_rows, encode_rows};
pub use value::Value;
