//! Materialized entity collections.

use crate::identity_map::EntityRef;
use datamap_core::Entity;

/// An ordered set of shared entity references produced by one query.
///
/// A collection holds the same `Arc`s the identity map does, so indexing into
/// two collections that cover the same row yields the same instance.
#[derive(Debug, Clone, Default)]
pub struct Collection<E: Entity> {
    items: Vec<EntityRef<E>>,
}

impl<E: Entity> Collection<E> {
    pub fn new(items: Vec<EntityRef<E>>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&EntityRef<E>> {
        self.items.first()
    }

    pub fn get(&self, index: usize) -> Option<&EntityRef<E>> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRef<E>> {
        self.items.iter()
    }

    pub fn into_inner(self) -> Vec<EntityRef<E>> {
        self.items
    }
}

impl<E: Entity> From<Vec<EntityRef<E>>> for Collection<E> {
    fn from(items: Vec<EntityRef<E>>) -> Self {
        Self::new(items)
    }
}

impl<E: Entity> IntoIterator for Collection<E> {
    type Item = EntityRef<E>;
    type IntoIter = std::vec::IntoIter<EntityRef<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, E: Entity> IntoIterator for &'a Collection<E> {
    type Item = &'a EntityRef<E>;
    type IntoIter = std::slice::Iter<'a, EntityRef<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
