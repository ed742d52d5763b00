//! The unit-of-work composition root.

use crate::association::{EntityOps, ErasedEntityOps};
use crate::identity_map::IdentityMap;
use crate::repository::Repository;
use datamap_core::{
    Entity, EntityMetadata, Error, Execution, MetadataError, MetadataProvider, Result, ResultCache,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

struct MapperInner {
    execution: Arc<dyn Execution>,
    cache: Arc<dyn ResultCache>,
    provider: Arc<dyn MetadataProvider>,
    identity: RwLock<IdentityMap>,
    ops: RwLock<HashMap<String, Arc<dyn ErasedEntityOps>>>,
}

/// The mapper: one per unit of work.
///
/// Owns the injected collaborators and the request-scoped identity map, and
/// hands out per-entity repositories that share them. Cloning a mapper is
/// cheap and yields a handle onto the same unit of work.
pub struct Mapper {
    inner: Arc<MapperInner>,
}

impl Clone for Mapper {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Mapper {
    pub fn new(
        execution: Arc<dyn Execution>,
        cache: Arc<dyn ResultCache>,
        provider: Arc<dyn MetadataProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(MapperInner {
                execution,
                cache,
                provider,
                identity: RwLock::new(IdentityMap::new()),
                ops: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Build a repository for an entity type.
    ///
    /// Loads and validates the metadata, then registers the entity type for
    /// eager hydration. Mismatches between the mapping and the entity's
    /// declared properties fail here, before any query runs.
    pub fn repository<E: Entity>(&self) -> Result<Repository<E>> {
        let metadata = self.inner.provider.load(E::ENTITY)?;
        self.check_properties::<E>(&metadata)?;

        let mut ops = self.inner.ops.write().expect("lock poisoned");
        ops.entry(metadata.entity.clone())
            .or_insert_with(|| Arc::new(EntityOps::<E>::new(Arc::clone(&metadata))));
        drop(ops);

        tracing::debug!(entity = E::ENTITY, table = %metadata.table, "repository ready");
        Ok(Repository::from_parts(self.clone(), metadata))
    }

    /// Every non-meta mapped property must be settable on the entity.
    fn check_properties<E: Entity>(&self, metadata: &EntityMetadata) -> Result<()> {
        for mapping in &metadata.properties {
            if !mapping.meta && !E::PROPERTIES.contains(&mapping.property.as_str()) {
                return Err(Error::Metadata(MetadataError {
                    entity: metadata.entity.clone(),
                    message: format!(
                        "mapped property '{}' is not declared on the entity",
                        mapping.property
                    ),
                }));
            }
        }
        Ok(())
    }

    /// Forget every tracked instance and memoized collection.
    pub fn clear_identity_map(&self) {
        self.inner.identity.write().expect("lock poisoned").clear();
    }

    pub(crate) fn identity(&self) -> &RwLock<IdentityMap> {
        &self.inner.identity
    }

    pub(crate) fn execution(&self) -> &dyn Execution {
        self.inner.execution.as_ref()
    }

    pub(crate) fn cache(&self) -> &dyn ResultCache {
        self.inner.cache.as_ref()
    }

    pub(crate) fn metadata_for(&self, entity: &str) -> Result<Arc<EntityMetadata>> {
        self.inner.provider.load(entity)
    }

    pub(crate) fn entity_ops(&self, entity: &str) -> Result<Arc<dyn ErasedEntityOps>> {
        let ops = self.inner.ops.read().expect("lock poisoned");
        ops.get(entity).cloned().ok_or_else(|| {
            Error::InvalidState(format!(
                "no repository has been built for entity '{}'",
                entity
            ))
        })
    }
}
