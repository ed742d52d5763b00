//! Per-entity repositories: finders, persistence and association loading.

use crate::association::{AssociationValue, ErasedRef};
use crate::collection::Collection;
use crate::hydrator;
use crate::identity_map::EntityRef;
use crate::mapper::Mapper;
use crate::query::Query;
use datamap_core::{
    AssociationKind, Entity, EntityMetadata, EntityState, Error, ExecutionError, NotFoundError,
    Result, Row, Value, decode_rows, encode_rows,
};
use datamap_query::{
    Connective, SqlSource, SqlTemplate, collection_key, query_hash, result_cache_key,
};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Options for `find_by_id_with`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Associations to load eagerly alongside the entity.
    pub with: Vec<String>,
    /// Route the query through the result cache.
    pub cache: bool,
    /// Skip the identity-map shortcut and hit the backend.
    pub force_load: bool,
}

/// The data-mapper facade for one entity type.
///
/// Repositories are cheap to clone; every clone shares the mapper's unit of
/// work, so entities found through different repository handles still
/// deduplicate through the one identity map.
pub struct Repository<E: Entity> {
    pub(crate) mapper: Mapper,
    pub(crate) metadata: Arc<EntityMetadata>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            mapper: self.mapper.clone(),
            metadata: Arc::clone(&self.metadata),
            _marker: PhantomData,
        }
    }
}

impl<E: Entity> Repository<E> {
    pub(crate) fn from_parts(mapper: Mapper, metadata: Arc<EntityMetadata>) -> Self {
        Self {
            mapper,
            metadata,
            _marker: PhantomData,
        }
    }

    pub fn metadata(&self) -> &EntityMetadata {
        &self.metadata
    }

    fn base_template(&self) -> SqlTemplate {
        SqlTemplate::new(
            self.metadata.select_list(),
            format!("{} {}", self.metadata.table, self.metadata.alias),
        )
    }

    /// An unexecuted query over every row of the entity's table.
    pub fn find_all(&self) -> Query<E> {
        Query::from_source(self.clone(), SqlSource::new(self.base_template()))
    }

    /// Load one entity by primary key.
    pub fn find_by_id(&self, id: i64) -> Result<EntityRef<E>> {
        self.find_by_id_with(id, &FindOptions::default())
    }

    /// Load one entity by primary key with eager and cache options.
    ///
    /// A live instance short-circuits through the identity map without a
    /// query unless `force_load` is set or eager associations are requested.
    pub fn find_by_id_with(&self, id: i64, options: &FindOptions) -> Result<EntityRef<E>> {
        if id <= 0 {
            return Err(Error::InvalidArgument(format!(
                "primary key must be positive, got {}",
                id
            )));
        }

        if !options.force_load && options.with.is_empty() {
            if let Some(existing) = self
                .mapper
                .identity()
                .read()
                .expect("lock poisoned")
                .get::<E>(id)
            {
                tracing::trace!(entity = E::ENTITY, id, "identity map hit");
                return Ok(existing);
            }
        }

        let mut query = self
            .find_all()
            .cached(options.cache)
            .filter(format!("{} = {}", self.metadata.primary_ref(), id));
        for name in &options.with {
            query = query.with(name)?;
        }

        query.first()?.ok_or_else(|| {
            Error::NotFound(NotFoundError {
                entity: self.metadata.entity.clone(),
                id,
            })
        })
    }

    /// An unexecuted query filtered by property equality predicates.
    ///
    /// Predicates attach in the given order with the given connective;
    /// `Value::Null` renders as `IS NULL`.
    pub fn find_by_predicates(
        &self,
        pairs: &[(&str, Value)],
        connective: Connective,
    ) -> Result<Query<E>> {
        let mut query = self.find_all();
        for (property, value) in pairs {
            let condition = self.property_condition(property, value)?;
            query.source.predicate(condition, connective);
        }
        Ok(query)
    }

    /// An unexecuted query over rows linked to `id` through an association
    /// table (many-to-many).
    ///
    /// `owner_column` is the association-table column filtered by the
    /// caller's key; `target_column` is the one matched against this
    /// entity's primary key. The returned query is lazy and refinable like
    /// any other.
    pub fn find_by_assoc_table(
        &self,
        assoc_table: &str,
        owner_column: &str,
        target_column: &str,
        id: i64,
    ) -> Result<Query<E>> {
        if id <= 0 {
            return Err(Error::InvalidArgument(format!(
                "primary key must be positive, got {}",
                id
            )));
        }
        let assoc_alias = EntityMetadata::derive_alias(assoc_table);
        Ok(self
            .find_all()
            .join(
                assoc_table,
                assoc_alias.clone(),
                format!(
                    "{}.{} = {}",
                    assoc_alias,
                    target_column,
                    self.metadata.primary_ref()
                ),
            )
            .filter(format!("{}.{} = {}", assoc_alias, owner_column, id)))
    }

    /// An unexecuted query over a raw SELECT statement, parsed once.
    pub fn find_by_sql(&self, sql: &str) -> Result<Query<E>> {
        let template = SqlTemplate::parse(sql)?;
        Ok(Query::from_source(self.clone(), SqlSource::new(template)))
    }

    pub(crate) fn property_condition(&self, property: &str, value: &Value) -> Result<String> {
        let column = self.metadata.column_for(property)?;
        let qualified = format!("{}.{}", self.metadata.alias, column);
        Ok(if value.is_null() {
            format!("{} IS NULL", qualified)
        } else {
            format!("{} = {}", qualified, value.to_sql_literal())
        })
    }

    /// Persist an entity: INSERT when the primary key is empty, UPDATE
    /// otherwise. Returns the primary key.
    pub fn save(&self, entity: &mut E) -> Result<i64> {
        if entity.bag().state() == EntityState::Detached {
            return Err(Error::InvalidState(format!(
                "cannot save a deleted '{}' entity",
                E::ENTITY
            )));
        }

        let pairs = self.column_values(entity)?;
        let id = match self.current_id(entity) {
            Some(id) => {
                self.update_row(id, &pairs)?;
                id
            }
            None => {
                let id = self.insert_row(&pairs)?;
                if let Some(mapping) = self
                    .metadata
                    .property_by_column(&self.metadata.primary_column)
                {
                    if !mapping.meta {
                        entity.set(&mapping.property, Value::Int(id))?;
                    }
                }
                entity
                    .bag_mut()
                    .set(self.metadata.primary_column.clone(), Value::Int(id));
                id
            }
        };

        entity.bag_mut().set_state(EntityState::Persisted);
        self.mapper.cache().invalidate(&self.metadata.entity);
        Ok(id)
    }

    /// Write a single property of a stored row without loading it.
    pub fn update_property(&self, property: &str, value: &Value, id: i64) -> Result<()> {
        if id <= 0 {
            return Err(Error::InvalidArgument(format!(
                "primary key must be positive, got {}",
                id
            )));
        }
        let column = self.metadata.column_for(property)?;
        let sql = format!(
            "UPDATE {} SET {} = {} WHERE {} = {}",
            self.metadata.table,
            column,
            value.to_sql_literal(),
            self.metadata.primary_column,
            id
        );
        tracing::debug!(entity = E::ENTITY, sql = %sql, "update property");
        self.mapper.execution().execute(&sql)?;
        self.mapper.cache().invalidate(&self.metadata.entity);
        Ok(())
    }

    /// Delete the entity's row, clear its properties and detach it.
    ///
    /// Deleting a row that is already gone succeeds silently; the entity
    /// still detaches.
    pub fn delete(&self, entity: &mut E) -> Result<()> {
        let Some(id) = self.current_id(entity) else {
            return Err(Error::InvalidArgument(format!(
                "cannot delete a '{}' entity without a primary key",
                E::ENTITY
            )));
        };
        self.delete_by_id(id)?;

        for mapping in &self.metadata.properties {
            if !mapping.meta {
                entity.set(&mapping.property, Value::Null)?;
            }
        }
        entity.bag_mut().clear();
        entity.bag_mut().set_state(EntityState::Detached);
        Ok(())
    }

    /// Delete a row by primary key. Zero affected rows is a silent no-op.
    pub fn delete_by_id(&self, id: i64) -> Result<()> {
        if id <= 0 {
            return Err(Error::InvalidArgument(format!(
                "primary key must be positive, got {}",
                id
            )));
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.metadata.table, self.metadata.primary_column, id
        );
        tracing::debug!(entity = E::ENTITY, sql = %sql, "delete");
        let affected = self.mapper.execution().execute(&sql)?;
        if affected == 0 {
            tracing::debug!(entity = E::ENTITY, id, "delete matched no rows");
        }
        self.mapper
            .identity()
            .write()
            .expect("lock poisoned")
            .remove::<E>(id);
        self.mapper.cache().invalidate(&self.metadata.entity);
        Ok(())
    }

    /// Load a declared association for an entity, without consulting or
    /// updating its slot.
    ///
    /// The join key comes from the entity's bag; a missing or NULL key is a
    /// definitive `Absent`. MANY associations come back as an unexecuted,
    /// further-filterable scope.
    pub fn load_association<T: Entity>(
        &self,
        entity: &E,
        name: &str,
    ) -> Result<AssociationValue<T>> {
        let spec = self.metadata.association(name).ok_or_else(|| {
            Error::InvalidState(format!(
                "association '{}' is not declared on entity '{}'",
                name,
                E::ENTITY
            ))
        })?;
        if spec.target_entity != T::ENTITY {
            return Err(Error::InvalidState(format!(
                "association '{}' targets entity '{}', not '{}'",
                name,
                spec.target_entity,
                T::ENTITY
            )));
        }

        let target = self.mapper.repository::<T>()?;
        let join_column = spec.join_column(&self.metadata);
        let Some(key) = entity
            .bag()
            .get(join_column)
            .filter(|v| !v.is_null())
            .cloned()
        else {
            return Ok(AssociationValue::Absent);
        };

        let condition = format!(
            "{}.{} = {}",
            target.metadata.alias,
            spec.target_column,
            key.to_sql_literal()
        );
        match spec.kind {
            AssociationKind::Many => Ok(AssociationValue::Many(
                target.find_all().filter(condition),
            )),
            AssociationKind::One => match target.find_all().filter(condition).first()? {
                Some(found) => Ok(AssociationValue::One(found)),
                None => Ok(AssociationValue::Absent),
            },
        }
    }

    /// The lazy association trampoline.
    ///
    /// Resolved slots return their cached value without I/O, as do entities
    /// that are not in the persisted state. An unresolved slot on a persisted
    /// entity loads through `load_association` and caches the result back
    /// onto the slot.
    pub fn association<T: Entity>(
        &self,
        entity_ref: &EntityRef<E>,
        name: &str,
    ) -> Result<AssociationValue<T>> {
        let snapshot = {
            let guard = entity_ref.read().expect("lock poisoned");
            let slot = guard.association_slot(name).ok_or_else(|| {
                Error::InvalidState(format!(
                    "entity '{}' has no association slot '{}'",
                    E::ENTITY,
                    name
                ))
            })?;
            let value = slot
                .as_any()
                .downcast_ref::<AssociationValue<T>>()
                .ok_or_else(|| {
                    Error::InvalidState(format!(
                        "association '{}' does not target entity '{}'",
                        name,
                        T::ENTITY
                    ))
                })?;
            if guard.bag().state() != EntityState::Persisted || value.is_resolved() {
                return Ok(value.clone());
            }
            guard.clone()
        };

        let loaded = self.load_association::<T>(&snapshot, name)?;

        let mut guard = entity_ref.write().expect("lock poisoned");
        if let Some(slot) = guard.association_slot_mut(name) {
            if let Some(value) = slot.as_any_mut().downcast_mut::<AssociationValue<T>>() {
                *value = loaded.clone();
            }
        }
        Ok(loaded)
    }

    /// Materialize a source: identity map first, then the result cache when
    /// requested, then the execution backend, then hydration and eager
    /// association wiring.
    pub(crate) fn hydrate_source(&self, source: &SqlSource) -> Result<Collection<E>> {
        let sql = source.checked_sql()?;
        let hash = query_hash(&sql);
        let key = collection_key(&self.metadata.entity, hash);

        if let Some(existing) = self
            .mapper
            .identity()
            .read()
            .expect("lock poisoned")
            .get_collection::<E>(&key)
        {
            tracing::trace!(entity = E::ENTITY, key = %key, "reusing materialized collection");
            return Ok(Collection::from(existing));
        }

        let rows = self.fetch_rows(source, &sql, hash)?;
        let refs = hydrator::hydrate_collection::<E>(
            &self.mapper,
            &rows,
            &self.metadata,
            source.aliased(),
            &key,
        )?;

        for name in source.with_names() {
            self.wire_association(&rows, &refs, name)?;
        }

        Ok(Collection::from(refs))
    }

    fn fetch_rows(&self, source: &SqlSource, sql: &str, hash: u64) -> Result<Vec<Row>> {
        if !source.is_cached() {
            return self.run_query(sql);
        }

        let key = result_cache_key(&self.metadata.entity, hash);
        if let Some(json) = self.mapper.cache().load(&key) {
            tracing::debug!(entity = E::ENTITY, key = %key, "result cache hit");
            return decode_rows(&json);
        }

        let rows = self.run_query(sql)?;
        let mut tags = vec![self.metadata.entity.clone()];
        tags.extend(source.cache_tags().iter().cloned());
        self.mapper.cache().save(&key, encode_rows(&rows)?, &tags);
        Ok(rows)
    }

    fn run_query(&self, sql: &str) -> Result<Vec<Row>> {
        tracing::debug!(entity = E::ENTITY, sql = %sql, "query");
        self.mapper.execution().query(sql)
    }

    pub(crate) fn total_count(&self, source: &SqlSource) -> Result<u64> {
        source.checked_sql()?;
        let sql = source.render_count();
        let rows = self.run_query(&sql)?;
        let count = rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::Execution(ExecutionError {
                    message: "count query returned no value".to_string(),
                    sql: Some(sql.clone()),
                    source: None,
                })
            })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Add the join, select columns and hydration marker for an eager
    /// association to a source.
    pub(crate) fn apply_with(&self, source: &mut SqlSource, name: &str) -> Result<()> {
        let spec = self.metadata.association(name).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "association '{}' is not declared on entity '{}'",
                name,
                E::ENTITY
            ))
        })?;
        let ops = self.mapper.entity_ops(&spec.target_entity)?;
        let target = ops.metadata();
        let own = spec.join_column(&self.metadata);

        source.left_join(
            target.table.clone(),
            target.alias.clone(),
            format!(
                "{}.{} = {}.{}",
                target.alias, spec.target_column, self.metadata.alias, own
            ),
        );
        for mapping in &target.properties {
            source.select_also(format!("{}.{}", target.alias, mapping.column));
        }
        source.with(name);
        Ok(())
    }

    /// Wire one eagerly loaded association from the already-fetched rows.
    fn wire_association(&self, rows: &[Row], refs: &[EntityRef<E>], name: &str) -> Result<()> {
        let spec = self.metadata.association(name).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "association '{}' is not declared on entity '{}'",
                name,
                E::ENTITY
            ))
        })?;
        let ops = self.mapper.entity_ops(&spec.target_entity)?;
        let own = spec.join_column(&self.metadata);
        let own_output = hydrator::column_name(&self.metadata, own, true);

        match spec.kind {
            AssociationKind::One => {
                let pk_output =
                    hydrator::column_name(&self.metadata, &self.metadata.primary_column, true);
                for row in rows {
                    let Some(parent_id) = row.get_by_name(&pk_output).and_then(Value::as_i64)
                    else {
                        continue;
                    };
                    let Some(parent) = self
                        .mapper
                        .identity()
                        .read()
                        .expect("lock poisoned")
                        .get::<E>(parent_id)
                    else {
                        continue;
                    };
                    let child = ops.hydrate_one(&self.mapper, row, true)?;
                    let mut guard = parent.write().expect("lock poisoned");
                    if let Some(slot) = guard.association_slot_mut(name) {
                        ops.assign_one(slot, child)?;
                    }
                }
            }
            AssociationKind::Many => {
                // children grouped by the parent join key they belong to
                let mut groups: HashMap<String, Vec<ErasedRef>> = HashMap::new();
                for row in rows {
                    let Some(key) = row.get_by_name(&own_output).filter(|v| !v.is_null()) else {
                        continue;
                    };
                    if let Some(child) = ops.hydrate_one(&self.mapper, row, true)? {
                        groups.entry(key.to_sql_literal()).or_default().push(child);
                    }
                }

                let target = ops.metadata();
                for parent in refs {
                    let key = parent
                        .read()
                        .expect("lock poisoned")
                        .bag()
                        .get(own)
                        .cloned();
                    let mut guard = parent.write().expect("lock poisoned");
                    let Some(slot) = guard.association_slot_mut(name) else {
                        continue;
                    };
                    let Some(key) = key.filter(|v| !v.is_null()) else {
                        ops.assign_one(slot, None)?;
                        continue;
                    };

                    let literal = key.to_sql_literal();
                    let mut scoped = SqlSource::new(SqlTemplate::new(
                        target.select_list(),
                        format!("{} {}", target.table, target.alias),
                    ));
                    scoped.predicate(
                        format!("{}.{} = {}", target.alias, spec.target_column, literal),
                        Connective::And,
                    );
                    scoped.freeze();

                    let child_key = collection_key(&target.entity, query_hash(&scoped.render()));
                    let children = groups.remove(&literal).unwrap_or_default();
                    ops.store_collection(&self.mapper, &child_key, children)?;
                    ops.assign_many(slot, &self.mapper, scoped)?;
                }
            }
        }
        Ok(())
    }

    fn current_id(&self, entity: &E) -> Option<i64> {
        let primary = &self.metadata.primary_column;
        if let Some(mapping) = self.metadata.property_by_column(primary) {
            if !mapping.meta {
                if let Some(id) = entity.get(&mapping.property).and_then(|v| v.as_i64()) {
                    if id > 0 {
                        return Some(id);
                    }
                }
            }
        }
        entity
            .bag()
            .get(primary)
            .and_then(Value::as_i64)
            .filter(|id| *id > 0)
    }

    /// The column/value pairs an INSERT or UPDATE writes, in declaration
    /// order. Meta columns come from the bag; a resolved ONE association
    /// overrides its foreign key column with the target's key.
    fn column_values(&self, entity: &E) -> Result<Vec<(String, Value)>> {
        let mut pairs: Vec<(String, Value)> = Vec::new();
        for mapping in &self.metadata.properties {
            if mapping.column == self.metadata.primary_column {
                continue;
            }
            let value = if mapping.meta {
                entity.bag().get(&mapping.column).cloned()
            } else {
                entity.get(&mapping.property)
            };
            if let Some(value) = value {
                pairs.push((mapping.column.clone(), value));
            }
        }

        for spec in &self.metadata.associations {
            if spec.kind != AssociationKind::One {
                continue;
            }
            let own = spec.join_column(&self.metadata);
            if own == self.metadata.primary_column {
                continue;
            }
            let Some(slot) = entity.association_slot(&spec.name) else {
                continue;
            };
            let target = self.mapper.metadata_for(&spec.target_entity)?;
            let target_property = target
                .property_by_column(&spec.target_column)
                .map_or_else(|| spec.target_column.clone(), |p| p.property.clone());
            if let Some(key) = slot.resolved_key(&target_property) {
                if !key.is_null() {
                    if let Some(existing) = pairs.iter_mut().find(|(c, _)| c.as_str() == own) {
                        existing.1 = key;
                    } else {
                        pairs.push((own.to_string(), key));
                    }
                }
            }
        }

        Ok(pairs)
    }

    fn insert_row(&self, pairs: &[(String, Value)]) -> Result<i64> {
        let columns: Vec<&str> = pairs.iter().map(|(c, _)| c.as_str()).collect();
        let values: Vec<String> = pairs.iter().map(|(_, v)| v.to_sql_literal()).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.metadata.table,
            columns.join(", "),
            values.join(", ")
        );
        tracing::debug!(entity = E::ENTITY, sql = %sql, "insert");
        self.mapper.execution().execute(&sql)?;
        self.mapper.execution().last_insert_id()
    }

    fn update_row(&self, id: i64, pairs: &[(String, Value)]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let assignments: Vec<String> = pairs
            .iter()
            .map(|(c, v)| format!("{} = {}", c, v.to_sql_literal()))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.metadata.table,
            assignments.join(", "),
            self.metadata.primary_column,
            id
        );
        tracing::debug!(entity = E::ENTITY, sql = %sql, "update");
        self.mapper.execution().execute(&sql)?;
        Ok(())
    }
}
