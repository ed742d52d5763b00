//! Association values and the type-erased per-entity operations registry.

use crate::identity_map::EntityRef;
use crate::mapper::Mapper;
use crate::query::Query;
use crate::repository::Repository;
use datamap_core::{AssociationSlot, Entity, EntityMetadata, Error, Result, Row, Value};
use datamap_query::SqlSource;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// The value of an association field on an entity.
///
/// `Unresolved` means nothing was ever loaded or assigned and a trip through
/// the repository trampoline may trigger a query. `Absent` is a definitive
/// negative: the join key was NULL or matched nothing, and no further query
/// happens. `One` holds a shared reference to the target; `Many` holds a
/// lazy scope over the target entity that can be filtered further before it
/// executes.
pub enum AssociationValue<T: Entity> {
    Unresolved,
    Absent,
    One(EntityRef<T>),
    Many(Query<T>),
}

impl<T: Entity> AssociationValue<T> {
    /// True once the association carries a definitive value.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, AssociationValue::Unresolved)
    }

    /// The single target, if this resolved to one.
    pub fn as_one(&self) -> Option<&EntityRef<T>> {
        match self {
            AssociationValue::One(target) => Some(target),
            _ => None,
        }
    }

    /// The lazy target scope, if this resolved to many.
    pub fn as_many(&self) -> Option<&Query<T>> {
        match self {
            AssociationValue::Many(scope) => Some(scope),
            _ => None,
        }
    }
}

impl<T: Entity> Default for AssociationValue<T> {
    fn default() -> Self {
        AssociationValue::Unresolved
    }
}

impl<T: Entity> Clone for AssociationValue<T> {
    fn clone(&self) -> Self {
        match self {
            AssociationValue::Unresolved => AssociationValue::Unresolved,
            AssociationValue::Absent => AssociationValue::Absent,
            AssociationValue::One(target) => AssociationValue::One(Arc::clone(target)),
            AssociationValue::Many(scope) => AssociationValue::Many(scope.clone()),
        }
    }
}

impl<T: Entity> fmt::Debug for AssociationValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssociationValue::Unresolved => write!(f, "Unresolved"),
            AssociationValue::Absent => write!(f, "Absent"),
            AssociationValue::One(_) => write!(f, "One(..)"),
            AssociationValue::Many(_) => write!(f, "Many(..)"),
        }
    }
}

impl<T: Entity> AssociationSlot for AssociationValue<T> {
    fn is_unresolved(&self) -> bool {
        matches!(self, AssociationValue::Unresolved)
    }

    fn resolved_key(&self, target_property: &str) -> Option<Value> {
        match self {
            AssociationValue::One(target) => target
                .read()
                .expect("lock poisoned")
                .get(target_property),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A type-erased entity reference, concretely `EntityRef<T>`.
pub(crate) type ErasedRef = Box<dyn Any + Send + Sync>;

/// Operations on one entity type, callable without naming the type.
///
/// Eager loading discovers target entities by their metadata name at runtime;
/// this trait bridges from that string back into typed hydration and slot
/// assignment. One implementation is registered per entity type when its
/// repository is first built.
pub(crate) trait ErasedEntityOps: Send + Sync {
    fn metadata(&self) -> Arc<EntityMetadata>;

    /// Hydrate the target portion of an aliased row, if present.
    fn hydrate_one(
        &self,
        mapper: &Mapper,
        row: &Row,
        aliased: bool,
    ) -> Result<Option<ErasedRef>>;

    /// Assign a single target (or a definitive absence) to a slot.
    fn assign_one(&self, slot: &mut dyn AssociationSlot, child: Option<ErasedRef>) -> Result<()>;

    /// Assign a lazy scope over the target entity to a slot.
    fn assign_many(
        &self,
        slot: &mut dyn AssociationSlot,
        mapper: &Mapper,
        source: SqlSource,
    ) -> Result<()>;

    /// Memoize already-hydrated children under a scope's collection key.
    fn store_collection(&self, mapper: &Mapper, key: &str, children: Vec<ErasedRef>) -> Result<()>;
}

pub(crate) struct EntityOps<T: Entity> {
    metadata: Arc<EntityMetadata>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> EntityOps<T> {
    pub(crate) fn new(metadata: Arc<EntityMetadata>) -> Self {
        Self {
            metadata,
            _marker: PhantomData,
        }
    }

    fn typed_slot<'a>(
        &self,
        slot: &'a mut dyn AssociationSlot,
    ) -> Result<&'a mut AssociationValue<T>> {
        slot.as_any_mut()
            .downcast_mut::<AssociationValue<T>>()
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "association slot does not hold entity '{}'",
                    T::ENTITY
                ))
            })
    }

    fn typed_ref(&self, child: ErasedRef) -> Result<EntityRef<T>> {
        child
            .downcast::<EntityRef<T>>()
            .map(|boxed| *boxed)
            .map_err(|_| {
                Error::InvalidState(format!(
                    "hydrated reference does not hold entity '{}'",
                    T::ENTITY
                ))
            })
    }
}

impl<T: Entity> ErasedEntityOps for EntityOps<T> {
    fn metadata(&self) -> Arc<EntityMetadata> {
        Arc::clone(&self.metadata)
    }

    fn hydrate_one(
        &self,
        mapper: &Mapper,
        row: &Row,
        aliased: bool,
    ) -> Result<Option<ErasedRef>> {
        let hydrated = crate::hydrator::hydrate_row::<T>(mapper, row, &self.metadata, aliased)?;
        Ok(hydrated.map(|entity_ref| Box::new(entity_ref) as ErasedRef))
    }

    fn assign_one(&self, slot: &mut dyn AssociationSlot, child: Option<ErasedRef>) -> Result<()> {
        let value = match child {
            Some(child) => AssociationValue::One(self.typed_ref(child)?),
            None => AssociationValue::Absent,
        };
        *self.typed_slot(slot)? = value;
        Ok(())
    }

    fn assign_many(
        &self,
        slot: &mut dyn AssociationSlot,
        mapper: &Mapper,
        source: SqlSource,
    ) -> Result<()> {
        let repository = Repository::<T>::from_parts(mapper.clone(), Arc::clone(&self.metadata));
        *self.typed_slot(slot)? = AssociationValue::Many(Query::from_source(repository, source));
        Ok(())
    }

    fn store_collection(&self, mapper: &Mapper, key: &str, children: Vec<ErasedRef>) -> Result<()> {
        let refs = children
            .into_iter()
            .map(|child| self.typed_ref(child))
            .collect::<Result<Vec<_>>>()?;
        mapper
            .identity()
            .write()
            .expect("lock poisoned")
            .insert_collection(key, refs);
        Ok(())
    }
}
