//! The entity contract: mapped structs, their meta bag and lifecycle state.

use crate::Result;
use crate::value::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Persistence lifecycle of an entity instance.
///
/// `New` instances have never been written, `Persisted` instances mirror a
/// row, `Detached` instances have been deleted and accept no further writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityState {
    #[default]
    New,
    Persisted,
    Detached,
}

/// Per-instance side channel carried by every entity.
///
/// Holds the lifecycle state plus the meta column values fetched alongside
/// the mapped properties: the primary key and any foreign keys kept for lazy
/// association loading.
#[derive(Debug, Clone, Default)]
pub struct MetaBag {
    values: HashMap<String, Value>,
    state: EntityState,
}

impl MetaBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }
}

/// Object-safe view of an association field on an entity.
///
/// Concrete association values are generic over their target type; this trait
/// lets the repository and hydrator reach them through `&dyn` without knowing
/// the target. Downcasting through `as_any` recovers the typed value.
pub trait AssociationSlot: Any + Send + Sync {
    /// True while the association has never been loaded or assigned.
    fn is_unresolved(&self) -> bool;

    /// If a single target entity is resolved, read one of its properties.
    ///
    /// Used during save to derive the foreign key from an assigned target.
    fn resolved_key(&self, target_property: &str) -> Option<Value>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A struct mapped onto a table row.
///
/// Property access is by name so one hydrator serves every entity type; the
/// `set` implementations give the typed conversion point the mapper validates
/// against metadata when a repository is first built.
pub trait Entity: Default + Clone + fmt::Debug + Send + Sync + 'static {
    /// Logical entity name, matching the metadata registration.
    const ENTITY: &'static str;

    /// Every settable property name, in declaration order.
    const PROPERTIES: &'static [&'static str];

    /// Read a property by name. Unknown names yield `None`.
    fn get(&self, property: &str) -> Option<Value>;

    /// Write a property by name, converting from `Value`.
    fn set(&mut self, property: &str, value: Value) -> Result<()>;

    fn bag(&self) -> &MetaBag;

    fn bag_mut(&mut self) -> &mut MetaBag;

    /// Snapshot every declared property into a name/value map.
    fn to_values(&self) -> HashMap<String, Value> {
        Self::PROPERTIES
            .iter()
            .filter_map(|p| self.get(p).map(|v| ((*p).to_string(), v)))
            .collect()
    }

    /// Build an instance from a name/value map through the typed setters.
    ///
    /// Keys that do not name a declared property are ignored; properties
    /// missing from the map keep their defaults.
    fn from_values(values: &HashMap<String, Value>) -> Result<Self> {
        let mut entity = Self::default();
        for property in Self::PROPERTIES {
            if let Some(value) = values.get(*property) {
                entity.set(property, value.clone())?;
            }
        }
        Ok(entity)
    }

    /// Access an association field by its declared name.
    fn association_slot(&self, name: &str) -> Option<&dyn AssociationSlot> {
        let _ = name;
        None
    }

    fn association_slot_mut(&mut self, name: &str) -> Option<&mut dyn AssociationSlot> {
        let _ = name;
        None
    }

    /// The primary key value, read from the bag.
    fn primary_key(&self, primary_column: &str) -> Option<i64> {
        self.bag().get(primary_column).and_then(Value::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Sample {
        id: i64,
        label: String,
        bag: MetaBag,
    }

    impl Entity for Sample {
        const ENTITY: &'static str = "sample";
        const PROPERTIES: &'static [&'static str] = &["id", "label"];

        fn get(&self, property: &str) -> Option<Value> {
            match property {
                "id" => Some(Value::Int(self.id)),
                "label" => Some(Value::Text(self.label.clone())),
                _ => None,
            }
        }

        fn set(&mut self, property: &str, value: Value) -> Result<()> {
            match property {
                "id" => self.id = value.as_i64().unwrap_or(0),
                "label" => {
                    self.label = value.as_str().map(str::to_string).unwrap_or_default();
                }
                _ => {}
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
    fn values_roundtrip() {
        let sample = Sample {
            id: 4,
            label: "alpha".to_string(),
            bag: MetaBag::new(),
        };

        let values = sample.to_values();
        assert_eq!(values.get("id"), Some(&Value::Int(4)));
        assert_eq!(values.get("label"), Some(&Value::Text("alpha".to_string())));

        let rebuilt = Sample::from_values(&values).unwrap();
        assert_eq!(rebuilt.id, 4);
        assert_eq!(rebuilt.label, "alpha");
    }

    #[test]
    fn from_values_ignores_unknown_keys() {
        let mut values = HashMap::new();
        values.insert("label".to_string(), Value::Text("beta".to_string()));
        values.insert("ghost".to_string(), Value::Int(1));

        let rebuilt = Sample::from_values(&values).unwrap();
        assert_eq!(rebuilt.label, "beta");
        // missing properties keep their defaults
        assert_eq!(rebuilt.id, 0);
    }

    #[test]
    fn bag_roundtrip() {
        let mut bag = MetaBag::new();
        assert_eq!(bag.state(), EntityState::New);

        bag.set("id", Value::Int(3));
        bag.set_state(EntityState::Persisted);

        assert_eq!(bag.get("id"), Some(&Value::Int(3)));
        assert_eq!(bag.state(), EntityState::Persisted);

        bag.clear();
        assert_eq!(bag.get("id"), None);
        // clearing values does not reset the lifecycle state
        assert_eq!(bag.state(), EntityState::Persisted);
    }
}
