//! Entity mapping metadata and the provider seam.
//!
//! Metadata describes how one entity maps onto one table: the table name, the
//! query alias, the property/column pairs and the declared associations. It is
//! built once, validated once, and shared immutably behind `Arc` afterwards.

use crate::error::{Error, MetadataError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// How an association resolves: a single target entity or a set of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    /// Foreign key on this side points at one target row
    One,
    /// Target rows carry a foreign key pointing back at this side
    Many,
}

/// One property/column pair.
#[derive(Debug, Clone)]
pub struct PropertyMapping {
    /// Property name on the entity
    pub property: String,
    /// Column name in the table
    pub column: String,
    /// Meta columns are fetched and kept in the entity bag but never mapped
    /// onto a declared property (foreign keys kept for lazy loading).
    pub meta: bool,
}

/// A declared association toward another entity.
#[derive(Debug, Clone)]
pub struct AssociationSpec {
    /// Association name, as used by `with` and the lazy trampoline
    pub name: String,
    /// Logical name of the target entity
    pub target_entity: String,
    pub kind: AssociationKind,
    /// Column on the target side the join key is matched against
    pub target_column: String,
    /// Column on this side carrying the join key; defaults to the
    /// primary column when unset.
    pub own_column: Option<String>,
}

impl AssociationSpec {
    /// The column on this side whose value drives the join.
    pub fn join_column<'a>(&'a self, metadata: &'a EntityMetadata) -> &'a str {
        self.own_column
            .as_deref()
            .unwrap_or(&metadata.primary_column)
    }
}

/// Immutable mapping metadata for one entity type.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    /// Logical entity name; namespaces the identity map and cache tags
    pub entity: String,
    /// Table name
    pub table: String,
    /// The single surrogate primary key column
    pub primary_column: String,
    /// Alias used in rendered SQL
    pub alias: String,
    /// Property/column pairs in declaration order
    pub properties: Vec<PropertyMapping>,
    /// Declared associations in declaration order
    pub associations: Vec<AssociationSpec>,
}

impl EntityMetadata {
    /// Start building metadata for an entity.
    pub fn builder(entity: impl Into<String>, table: impl Into<String>) -> MetadataBuilder {
        MetadataBuilder::new(entity, table)
    }

    /// Derive a table alias from the first letter of each underscore word.
    ///
    /// `sales_order` becomes `so`, `customer` becomes `c`.
    pub fn derive_alias(table: &str) -> String {
        table
            .split('_')
            .filter_map(|word| word.chars().next())
            .collect()
    }

    /// The aliased select list covering every mapped column, in declaration
    /// order: `c.id, c.name, ...`.
    pub fn select_list(&self) -> String {
        self.properties
            .iter()
            .map(|p| format!("{}.{}", self.alias, p.column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Qualified primary key reference, `alias.column`.
    pub fn primary_ref(&self) -> String {
        format!("{}.{}", self.alias, self.primary_column)
    }

    /// Look up a property mapping by property name.
    pub fn property(&self, property: &str) -> Option<&PropertyMapping> {
        self.properties.iter().find(|p| p.property == property)
    }

    /// Look up a property mapping by column name.
    pub fn property_by_column(&self, column: &str) -> Option<&PropertyMapping> {
        self.properties.iter().find(|p| p.column == column)
    }

    /// The column a property maps to, or `InvalidArgument`.
    pub fn column_for(&self, property: &str) -> Result<&str> {
        self.property(property)
            .map(|p| p.column.as_str())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "unknown property '{}' on entity '{}'",
                    property, self.entity
                ))
            })
    }

    /// Look up a declared association by name.
    pub fn association(&self, name: &str) -> Option<&AssociationSpec> {
        self.associations.iter().find(|a| a.name == name)
    }
}

/// Builder for `EntityMetadata`.
#[derive(Debug)]
pub struct MetadataBuilder {
    entity: String,
    table: String,
    primary_column: String,
    alias: Option<String>,
    properties: Vec<PropertyMapping>,
    associations: Vec<AssociationSpec>,
}

impl MetadataBuilder {
    pub fn new(entity: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            primary_column: "id".to_string(),
            alias: None,
            properties: Vec::new(),
            associations: Vec::new(),
        }
    }

    /// Override the primary key column (defaults to `id`).
    pub fn primary(mut self, column: impl Into<String>) -> Self {
        self.primary_column = column.into();
        self
    }

    /// Override the derived table alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Declare a property mapped onto a column.
    pub fn property(mut self, property: impl Into<String>, column: impl Into<String>) -> Self {
        self.properties.push(PropertyMapping {
            property: property.into(),
            column: column.into(),
            meta: false,
        });
        self
    }

    /// Declare a meta column: fetched into the bag, not mapped to a property.
    pub fn meta_column(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.properties.push(PropertyMapping {
            property: column.clone(),
            column,
            meta: true,
        });
        self
    }

    /// Declare a to-one association keyed by a foreign key column on this side.
    pub fn belongs_to(
        mut self,
        name: impl Into<String>,
        target_entity: impl Into<String>,
        own_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        self.associations.push(AssociationSpec {
            name: name.into(),
            target_entity: target_entity.into(),
            kind: AssociationKind::One,
            target_column: target_column.into(),
            own_column: Some(own_column.into()),
        });
        self
    }

    /// Declare a to-many association keyed by this side's primary key.
    pub fn has_many(
        mut self,
        name: impl Into<String>,
        target_entity: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        self.associations.push(AssociationSpec {
            name: name.into(),
            target_entity: target_entity.into(),
            kind: AssociationKind::Many,
            target_column: target_column.into(),
            own_column: None,
        });
        self
    }

    /// Finish building, validating the mapping.
    pub fn build(self) -> Result<EntityMetadata> {
        let alias = self
            .alias
            .unwrap_or_else(|| EntityMetadata::derive_alias(&self.table));
        let metadata = EntityMetadata {
            entity: self.entity,
            table: self.table,
            primary_column: self.primary_column,
            alias,
            properties: self.properties,
            associations: self.associations,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

impl EntityMetadata {
    /// Check structural invariants. Bad metadata fails here, at load time,
    /// never during hydration.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| {
            Err(Error::Metadata(MetadataError {
                entity: self.entity.clone(),
                message,
            }))
        };

        if self.entity.is_empty() {
            return fail("entity name is empty".to_string());
        }
        if self.table.is_empty() {
            return fail("table name is empty".to_string());
        }
        if self.alias.is_empty() {
            return fail("alias is empty".to_string());
        }
        if self.properties.is_empty() {
            return fail("no mapped columns".to_string());
        }

        let mut columns = HashSet::new();
        for p in &self.properties {
            if !columns.insert(p.column.as_str()) {
                return fail(format!("duplicate column '{}'", p.column));
            }
        }
        if !columns.contains(self.primary_column.as_str()) {
            return fail(format!(
                "primary column '{}' is not among the mapped columns",
                self.primary_column
            ));
        }

        let mut names = HashSet::new();
        for a in &self.associations {
            if a.name.is_empty() || a.target_entity.is_empty() {
                return fail("association with empty name or target".to_string());
            }
            if !names.insert(a.name.as_str()) {
                return fail(format!("duplicate association '{}'", a.name));
            }
            if let Some(own) = &a.own_column {
                if !columns.contains(own.as_str()) {
                    return fail(format!(
                        "association '{}' references unmapped column '{}'",
                        a.name, own
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Source of entity metadata, injected into the mapper.
///
/// Implementations must be idempotent: loading the same entity twice yields
/// equivalent metadata.
pub trait MetadataProvider: Send + Sync {
    fn load(&self, entity: &str) -> Result<Arc<EntityMetadata>>;
}

/// In-memory provider populated programmatically.
#[derive(Default)]
pub struct StaticMetadataProvider {
    entries: RwLock<HashMap<String, Arc<EntityMetadata>>>,
}

impl StaticMetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register metadata, replacing any previous mapping for the entity.
    pub fn register(&self, metadata: EntityMetadata) {
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.insert(metadata.entity.clone(), Arc::new(metadata));
    }
}

impl MetadataProvider for StaticMetadataProvider {
    fn load(&self, entity: &str) -> Result<Arc<EntityMetadata>> {
        let entries = self.entries.read().expect("lock poisoned");
        entries.get(entity).cloned().ok_or_else(|| {
            Error::Metadata(MetadataError {
                entity: entity.to_string(),
                message: "no mapping registered".to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_metadata() -> EntityMetadata {
        EntityMetadata::builder("order", "sales_order")
            .property("id", "id")
            .property("number", "number")
            .meta_column("customer_id")
            .belongs_to("customer", "customer", "customer_id", "id")
            .has_many("items", "order_item", "order_id")
            .build()
            .unwrap()
    }

    #[test]
    fn test_derive_alias() {
        assert_eq!(EntityMetadata::derive_alias("customer"), "c");
        assert_eq!(EntityMetadata::derive_alias("sales_order"), "so");
        assert_eq!(EntityMetadata::derive_alias("a_b_c"), "abc");
    }

    #[test]
    fn test_select_list_uses_alias() {
        let meta = order_metadata();
        assert_eq!(meta.alias, "so");
        assert_eq!(meta.select_list(), "so.id, so.number, so.customer_id");
        assert_eq!(meta.primary_ref(), "so.id");
    }

    #[test]
    fn test_column_lookup() {
        let meta = order_metadata();
        assert_eq!(meta.column_for("number").unwrap(), "number");
        assert!(matches!(
            meta.column_for("nope"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(meta.property_by_column("customer_id").unwrap().meta);
    }

    #[test]
    fn test_association_lookup() {
        let meta = order_metadata();
        let customer = meta.association("customer").unwrap();
        assert_eq!(customer.kind, AssociationKind::One);
        assert_eq!(customer.join_column(&meta), "customer_id");

        let items = meta.association("items").unwrap();
        assert_eq!(items.kind, AssociationKind::Many);
        // has_many joins on this side's primary key
        assert_eq!(items.join_column(&meta), "id");
    }

    #[test]
    fn test_validate_duplicate_column() {
        let result = EntityMetadata::builder("x", "x_table")
            .property("id", "id")
            .property("other", "id")
            .build();
        assert!(matches!(result, Err(Error::Metadata(_))));
    }

    #[test]
    fn test_validate_missing_primary() {
        let result = EntityMetadata::builder("x", "x_table")
            .primary("uid")
            .property("id", "id")
            .build();
        assert!(matches!(result, Err(Error::Metadata(_))));
    }

    #[test]
    fn test_validate_association_own_column() {
        let result = EntityMetadata::builder("x", "x_table")
            .property("id", "id")
            .belongs_to("y", "y", "y_id", "id")
            .build();
        assert!(matches!(result, Err(Error::Metadata(_))));
    }

    #[test]
    fn test_static_provider() {
        let provider = StaticMetadataProvider::new();
        provider.register(order_metadata());

        let loaded = provider.load("order").unwrap();
        assert_eq!(loaded.table, "sales_order");
        assert!(provider.load("missing").is_err());
    }
}
