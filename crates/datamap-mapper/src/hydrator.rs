//! Row-to-entity hydration.
//!
//! Hydration goes through the identity map: a row whose primary key is
//! already live returns the existing instance untouched. Fresh instances are
//! filled property by property through the entity's typed setters, meta
//! columns land in the bag, and the result enters the map before anything
//! else can observe it.

use crate::identity_map::EntityRef;
use crate::mapper::Mapper;
use datamap_core::{Entity, EntityMetadata, EntityState, Error, Row, TypeError, Value};
use std::collections::HashSet;

/// Resolve the output column name for a mapped column.
///
/// Joined queries alias every column to `alias_column`; plain queries keep
/// bare column names.
pub(crate) fn column_name(metadata: &EntityMetadata, column: &str, aliased: bool) -> String {
    if aliased {
        format!("{}_{}", metadata.alias, column)
    } else {
        column.to_string()
    }
}

/// Hydrate one row into an entity reference.
///
/// Returns `Ok(None)` when the primary key column is missing or NULL, which
/// is how an outer-joined optional association looks in a row set.
pub(crate) fn hydrate_row<E: Entity>(
    mapper: &Mapper,
    row: &Row,
    metadata: &EntityMetadata,
    aliased: bool,
) -> datamap_core::Result<Option<EntityRef<E>>> {
    let pk_column = column_name(metadata, &metadata.primary_column, aliased);
    let pk_value = match row.get_by_name(&pk_column) {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };
    let id = pk_value.as_i64().ok_or_else(|| {
        Error::Type(TypeError {
            expected: "integer primary key",
            actual: pk_value.type_name().to_string(),
            column: Some(metadata.primary_column.clone()),
        })
    })?;

    // first hydration wins; a live instance is returned as-is
    if let Some(existing) = mapper.identity().read().expect("lock poisoned").get::<E>(id) {
        return Ok(Some(existing));
    }

    let mut entity = E::default();
    for mapping in &metadata.properties {
        let name = column_name(metadata, &mapping.column, aliased);
        let Some(value) = row.get_by_name(&name) else {
            continue;
        };
        if mapping.meta {
            entity.bag_mut().set(mapping.column.clone(), value.clone());
        } else {
            entity.set(&mapping.property, value.clone())?;
        }
    }
    entity
        .bag_mut()
        .set(metadata.primary_column.clone(), Value::Int(id));
    entity.bag_mut().set_state(EntityState::Persisted);

    let entity_ref = mapper
        .identity()
        .write()
        .expect("lock poisoned")
        .insert(id, entity);
    Ok(Some(entity_ref))
}

/// Hydrate a row set into an ordered, deduplicated list of references,
/// memoized in the identity map under the query's collection key.
///
/// Joined queries repeat the parent row once per joined child; duplicates
/// collapse onto the first occurrence.
pub(crate) fn hydrate_collection<E: Entity>(
    mapper: &Mapper,
    rows: &[Row],
    metadata: &EntityMetadata,
    aliased: bool,
    key: &str,
) -> datamap_core::Result<Vec<EntityRef<E>>> {
    if let Some(existing) = mapper
        .identity()
        .read()
        .expect("lock poisoned")
        .get_collection::<E>(key)
    {
        tracing::trace!(key, "collection already materialized");
        return Ok(existing);
    }

    let pk_column = column_name(metadata, &metadata.primary_column, aliased);
    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    for row in rows {
        let Some(entity_ref) = hydrate_row::<E>(mapper, row, metadata, aliased)? else {
            continue;
        };
        let id = row
            .get_by_name(&pk_column)
            .and_then(Value::as_i64)
            .unwrap_or_default();
        if seen.insert(id) {
            refs.push(entity_ref);
        }
    }

    tracing::trace!(key, hydrated = refs.len(), "materialized collection");
    mapper
        .identity()
        .write()
        .expect("lock poisoned")
        .insert_collection(key, refs.clone());
    Ok(refs)
}
