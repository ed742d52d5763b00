//! Lazy, fluent query scopes over one entity type.

use crate::collection::Collection;
use crate::identity_map::EntityRef;
use crate::repository::Repository;
use datamap_core::{Entity, Result, Value};
use datamap_query::{Connective, SqlSource};

/// A query that has not executed yet.
///
/// Every fluent call refines the underlying `SqlSource`; nothing touches the
/// execution backend until `iter` (or one of its shortcuts) runs. Iterating
/// twice yields the same materialized collection through the identity map.
pub struct Query<E: Entity> {
    pub(crate) source: SqlSource,
    pub(crate) repository: Repository<E>,
}

impl<E: Entity> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            repository: self.repository.clone(),
        }
    }
}

impl<E: Entity> Query<E> {
    pub(crate) fn from_source(repository: Repository<E>, source: SqlSource) -> Self {
        Self { source, repository }
    }

    /// Append a raw WHERE condition with AND.
    pub fn filter(mut self, condition: impl Into<String>) -> Self {
        self.source.predicate(condition, Connective::And);
        self
    }

    /// Append a raw WHERE condition with OR.
    pub fn or_filter(mut self, condition: impl Into<String>) -> Self {
        self.source.predicate(condition, Connective::Or);
        self
    }

    /// Append an equality predicate on a mapped property.
    ///
    /// `Value::Null` renders as `IS NULL`.
    pub fn filter_property(mut self, property: &str, value: &Value) -> Result<Self> {
        let condition = self.repository.property_condition(property, value)?;
        self.source.predicate(condition, Connective::And);
        Ok(self)
    }

    /// Append an inner join.
    pub fn join(
        mut self,
        table: impl Into<String>,
        alias: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        self.source.join(table, alias, condition);
        self
    }

    /// Append an extra select expression.
    pub fn select_also(mut self, expr: impl Into<String>) -> Self {
        self.source.select_also(expr);
        self
    }

    /// Set the ORDER BY expression; fails if one is already set.
    pub fn order_by(mut self, expr: impl Into<String>) -> Result<Self> {
        self.source.order_by(expr)?;
        Ok(self)
    }

    /// Set the GROUP BY expression; fails if one is already set.
    pub fn group_by(mut self, expr: impl Into<String>) -> Result<Self> {
        self.source.group_by(expr)?;
        Ok(self)
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.source.limit(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.source.offset(n);
        self
    }

    /// Turn result caching on or off for this query.
    pub fn cached(mut self, on: bool) -> Self {
        self.source.use_cache(on);
        self
    }

    /// Add an extra cache invalidation tag.
    pub fn cache_tag(mut self, tag: impl Into<String>) -> Self {
        self.source.cache_tag(tag);
        self
    }

    /// Eagerly load a declared association alongside this query.
    pub fn with(mut self, name: &str) -> Result<Self> {
        self.repository.apply_with(&mut self.source, name)?;
        Ok(self)
    }

    /// The SQL this query renders to, checked for builder misuse.
    pub fn sql(&self) -> Result<String> {
        self.source.checked_sql()
    }

    /// Execute (or reuse the materialized result) and return the collection.
    pub fn iter(&self) -> Result<Collection<E>> {
        self.repository.hydrate_source(&self.source)
    }

    /// Execute and return the first entity, if any.
    pub fn first(&self) -> Result<Option<EntityRef<E>>> {
        Ok(self.iter()?.first().cloned())
    }

    /// Execute and return the entity at `index`, if any.
    pub fn get(&self, index: usize) -> Result<Option<EntityRef<E>>> {
        Ok(self.iter()?.get(index).cloned())
    }

    /// Execute and count the hydrated entities.
    pub fn count(&self) -> Result<usize> {
        Ok(self.iter()?.len())
    }

    /// Run the COUNT(*) variant, ignoring LIMIT and OFFSET.
    pub fn total_count(&self) -> Result<u64> {
        self.repository.total_count(&self.source)
    }
}
