//! Identity Map: one live instance per (entity type, primary key).
//!
//! The map guarantees that within a unit of work the same row never hydrates
//! into two objects. The first hydration wins; later hydrations of the same
//! key return the existing reference and do not re-apply row values.
//!
//! Entities are stored type-erased behind `Arc<RwLock<E>>` so one map serves
//! every entity type; downcasting through `TypeId`-scoped keys recovers the
//! concrete type. A second namespace memoizes materialized collections by
//! query identity key.

use datamap_core::Entity;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A shared reference to an entity held by the identity map.
pub type EntityRef<E> = Arc<RwLock<E>>;

#[derive(Default)]
pub struct IdentityMap {
    /// (entity type, primary key) -> type-erased `EntityRef<E>`
    entities: HashMap<(TypeId, i64), Box<dyn Any + Send + Sync>>,
    /// collection key -> type-erased `Vec<EntityRef<E>>`
    collections: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl IdentityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity under its primary key.
    ///
    /// If the key is already present the existing reference is returned and
    /// the new instance is dropped.
    pub fn insert<E: Entity>(&mut self, id: i64, entity: E) -> EntityRef<E> {
        let key = (TypeId::of::<E>(), id);

        if let Some(existing) = self.entities.get(&key) {
            if let Some(arc) = existing.downcast_ref::<EntityRef<E>>() {
                return Arc::clone(arc);
            }
        }

        let arc: EntityRef<E> = Arc::new(RwLock::new(entity));
        self.entities
            .insert(key, Box::new(Arc::clone(&arc)) as Box<dyn Any + Send + Sync>);
        arc
    }

    /// Get an entity reference by primary key.
    pub fn get<E: Entity>(&self, id: i64) -> Option<EntityRef<E>> {
        let entry = self.entities.get(&(TypeId::of::<E>(), id))?;
        let arc = entry.downcast_ref::<EntityRef<E>>()?;
        Some(Arc::clone(arc))
    }

    pub fn contains<E: Entity>(&self, id: i64) -> bool {
        self.entities.contains_key(&(TypeId::of::<E>(), id))
    }

    /// Remove an entity. Returns true if it was present.
    pub fn remove<E: Entity>(&mut self, id: i64) -> bool {
        self.entities.remove(&(TypeId::of::<E>(), id)).is_some()
    }

    /// Memoize a materialized collection under its query identity key.
    pub fn insert_collection<E: Entity>(&mut self, key: impl Into<String>, refs: Vec<EntityRef<E>>) {
        self.collections
            .insert(key.into(), Box::new(refs) as Box<dyn Any + Send + Sync>);
    }

    /// Get a memoized collection by key.
    pub fn get_collection<E: Entity>(&self, key: &str) -> Option<Vec<EntityRef<E>>> {
        let entry = self.collections.get(key)?;
        let refs = entry.downcast_ref::<Vec<EntityRef<E>>>()?;
        Some(refs.clone())
    }

    pub fn contains_collection(&self, key: &str) -> bool {
        self.collections.contains_key(key)
    }

    /// Drop everything: entities and memoized collections.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.collections.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datamap_core::{MetaBag, Result, Value};

    #[derive(Debug, Clone, Default)]
    struct Thing {
        name: String,
        bag: MetaBag,
    }

    impl Entity for Thing {
        const ENTITY: &'static str = "thing";
        const PROPERTIES: &'static [&'static str] = &["name"];

        fn get(&self, property: &str) -> Option<Value> {
            (property == "name").then(|| Value::Text(self.name.clone()))
        }

        fn set(&mut self, property: &str, value: Value) -> Result<()> {
            if property == "name" {
                self.name = value.as_str().unwrap_or_default().to_string();
            }
            Ok(())
        }

        fn bag(&self) -> &MetaBag {
            &self.bag
        }

        fn bag_mut(&mut self) -> &mut MetaBag {
            &mut self.bag
        }
    }

    #[test]
    fn first_insert_wins() {
        let mut map = IdentityMap::new();

        let first = map.insert(
            1,
            Thing {
                name: "original".to_string(),
                bag: MetaBag::new(),
            },
        );
        let second = map.insert(
            1,
            Thing {
                name: "ignored".to_string(),
                bag: MetaBag::new(),
            },
        );

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.read().unwrap().name, "original");
    }

    #[test]
    fn get_returns_same_reference() {
        let mut map = IdentityMap::new();
        let inserted = map.insert(7, Thing::default());

        let fetched = map.get::<Thing>(7).unwrap();
        assert!(Arc::ptr_eq(&inserted, &fetched));
        assert!(map.get::<Thing>(8).is_none());
    }

    #[test]
    fn modifications_visible_through_all_references() {
        let mut map = IdentityMap::new();
        let a = map.insert(1, Thing::default());
        let b = map.get::<Thing>(1).unwrap();

        a.write().unwrap().name = "changed".to_string();
        assert_eq!(b.read().unwrap().name, "changed");
    }

    #[test]
    fn remove_and_contains() {
        let mut map = IdentityMap::new();
        map.insert(1, Thing::default());

        assert!(map.contains::<Thing>(1));
        assert!(map.remove::<Thing>(1));
        assert!(!map.contains::<Thing>(1));
        assert!(!map.remove::<Thing>(1));
    }

    #[test]
    fn collections_are_memoized() {
        let mut map = IdentityMap::new();
        let a = map.insert(1, Thing::default());
        let b = map.insert(2, Thing::default());

        map.insert_collection("collection_thing_0000000000000001", vec![a, b]);

        assert!(map.contains_collection("collection_thing_0000000000000001"));
        let refs = map
            .get_collection::<Thing>("collection_thing_0000000000000001")
            .unwrap();
        assert_eq!(refs.len(), 2);
        assert!(map.get_collection::<Thing>("other").is_none());
    }
}
