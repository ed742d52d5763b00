//! Shared fixtures: a scripted execution backend, an in-memory result cache
//! and a small order/customer entity model.

use datamap_core::{
    Entity, EntityMetadata, Error, Execution, ExecutionError, MetaBag, Result, ResultCache, Row,
    StaticMetadataProvider, Value,
};
use datamap_mapper::{AssociationValue, Mapper};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Execution backend that replays scripted result sets and records every
/// statement it is handed.
#[derive(Default)]
pub struct MockExecution {
    responses: Mutex<HashMap<String, Vec<Row>>>,
    calls: Mutex<Vec<String>>,
    last_insert_id: Mutex<i64>,
    affected: Mutex<u64>,
}

impl MockExecution {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            affected: Mutex::new(1),
            ..Self::default()
        })
    }

    pub fn respond(&self, sql: &str, rows: Vec<Row>) {
        self.responses
            .lock()
            .expect("lock poisoned")
            .insert(sql.to_string(), rows);
    }

    pub fn set_last_insert_id(&self, id: i64) {
        *self.last_insert_id.lock().expect("lock poisoned") = id;
    }

    pub fn set_affected(&self, n: u64) {
        *self.affected.lock().expect("lock poisoned") = n;
    }

    /// Every statement seen so far, queries and writes alike, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    pub fn call_count(&self, sql: &str) -> usize {
        self.calls
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|s| s.as_str() == sql)
            .count()
    }
}

impl Execution for MockExecution {
    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push(sql.to_string());
        Ok(self
            .responses
            .lock()
            .expect("lock poisoned")
            .get(sql)
            .cloned()
            .unwrap_or_default())
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push(sql.to_string());
        Ok(*self.affected.lock().expect("lock poisoned"))
    }

    fn last_insert_id(&self) -> Result<i64> {
        let id = *self.last_insert_id.lock().expect("lock poisoned");
        if id > 0 {
            Ok(id)
        } else {
            Err(Error::Execution(ExecutionError {
                message: "no insert id scripted".to_string(),
                sql: None,
                source: None,
            }))
        }
    }
}

/// Tag-aware in-memory result cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, serde_json::Value>>,
    tagged: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ResultCache for MemoryCache {
    fn load(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.lock().expect("lock poisoned").get(key).cloned()
    }

    fn save(&self, key: &str, value: serde_json::Value, tags: &[String]) {
        self.entries
            .lock()
            .expect("lock poisoned")
            .insert(key.to_string(), value);
        let mut tagged = self.tagged.lock().expect("lock poisoned");
        for tag in tags {
            tagged
                .entry(tag.clone())
                .or_default()
                .push(key.to_string());
        }
    }

    fn invalidate(&self, tag: &str) {
        let keys = self
            .tagged
            .lock()
            .expect("lock poisoned")
            .remove(tag)
            .unwrap_or_default();
        let mut entries = self.entries.lock().expect("lock poisoned");
        for key in keys {
            entries.remove(&key);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub bag: MetaBag,
}

impl Entity for Customer {
    const ENTITY: &'static str = "customer";
    const PROPERTIES: &'static [&'static str] = &["id", "name"];

    fn get(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(Value::Int(self.id)),
            "name" => Some(Value::Text(self.name.clone())),
            _ => None,
        }
    }

    fn set(&mut self, property: &str, value: Value) -> Result<()> {
        match property {
            "id" => self.id = value.as_i64().unwrap_or(0),
            "name" => self.name = value.as_str().map(str::to_string).unwrap_or_default(),
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

#[derive(Debug, Clone, Default)]
pub struct Order {
    pub id: i64,
    pub number: String,
    pub customer: AssociationValue<Customer>,
    pub items: AssociationValue<OrderItem>,
    pub bag: MetaBag,
}

impl Entity for Order {
    const ENTITY: &'static str = "order";
    const PROPERTIES: &'static [&'static str] = &["id", "number"];

    fn get(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(Value::Int(self.id)),
            "number" => Some(Value::Text(self.number.clone())),
            _ => None,
        }
    }

    fn set(&mut self, property: &str, value: Value) -> Result<()> {
        match property {
            "id" => self.id = value.as_i64().unwrap_or(0),
            "number" => self.number = value.as_str().map(str::to_string).unwrap_or_default(),
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

    fn association_slot(&self, name: &str) -> Option<&dyn datamap_core::AssociationSlot> {
        match name {
            "customer" => Some(&self.customer),
            "items" => Some(&self.items),
            _ => None,
        }
    }

    fn association_slot_mut(
        &mut self,
        name: &str,
    ) -> Option<&mut dyn datamap_core::AssociationSlot> {
        match name {
            "customer" => Some(&mut self.customer),
            "items" => Some(&mut self.items),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderItem {
    pub id: i64,
    pub sku: String,
    pub bag: MetaBag,
}

impl Entity for OrderItem {
    const ENTITY: &'static str = "order_item";
    const PROPERTIES: &'static [&'static str] = &["id", "sku"];

    fn get(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(Value::Int(self.id)),
            "sku" => Some(Value::Text(self.sku.clone())),
            _ => None,
        }
    }

    fn set(&mut self, property: &str, value: Value) -> Result<()> {
        match property {
            "id" => self.id = value.as_i64().unwrap_or(0),
            "sku" => self.sku = value.as_str().map(str::to_string).unwrap_or_default(),
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

pub fn provider() -> Arc<StaticMetadataProvider> {
    let provider = StaticMetadataProvider::new();
    provider.register(
        EntityMetadata::builder("customer", "customer")
            .property("id", "id")
            .property("name", "name")
            .build()
            .expect("valid mapping"),
    );
    provider.register(
        EntityMetadata::builder("order", "sales_order")
            .property("id", "id")
            .property("number", "number")
            .meta_column("customer_id")
            .belongs_to("customer", "customer", "customer_id", "id")
            .has_many("items", "order_item", "order_id")
            .build()
            .expect("valid mapping"),
    );
    provider.register(
        EntityMetadata::builder("order_item", "order_item")
            .property("id", "id")
            .property("sku", "sku")
            .meta_column("order_id")
            .build()
            .expect("valid mapping"),
    );
    Arc::new(provider)
}

pub fn mapper() -> (Mapper, Arc<MockExecution>, Arc<MemoryCache>) {
    let execution = MockExecution::new();
    let cache = MemoryCache::new();
    let mapper = Mapper::new(
        Arc::clone(&execution) as Arc<dyn Execution>,
        Arc::clone(&cache) as Arc<dyn ResultCache>,
        provider(),
    );
    (mapper, execution, cache)
}

pub fn row(columns: &[&str], values: Vec<Value>) -> Row {
    Row::new(columns.iter().map(|c| c.to_string()).collect(), values)
}
