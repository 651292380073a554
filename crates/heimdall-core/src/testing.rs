//! In-memory store for unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use heimdall_proto::{Cardinality, EntityDef, Query, Record, RelationDef, Value};
use parking_lot::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::store::{preload, sort_and_page, Store};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub admin: bool,
}

impl User {
    pub fn new(id: i64, admin: bool) -> Self {
        Self { id, admin }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entities: BTreeMap<String, Arc<EntityDef>>,
    rows: Mutex<BTreeMap<String, BTreeMap<i64, BTreeMap<String, Value>>>>,
    next_id: Mutex<i64>,
}

impl MemoryStore {
    pub fn with_entity(mut self, def: EntityDef) -> Self {
        self.entities.insert(def.name.clone(), Arc::new(def));
        self
    }

    pub fn seed(&self, entity: &str, attrs: &[(&str, Value)]) -> Value {
        let mut record = Record::new(entity, "id");
        for (field, value) in attrs {
            record.set(*field, value.clone());
        }
        self.insert(&record).unwrap()
    }

    pub fn row_count(&self, entity: &str) -> usize {
        self.rows.lock().get(entity).map_or(0, BTreeMap::len)
    }
}

impl Store for MemoryStore {
    fn entity(&self, name: &str) -> Option<Arc<EntityDef>> {
        self.entities.get(name).cloned()
    }

    fn select(&self, query: &Query) -> StoreResult<Vec<Record>> {
        let def = self
            .entity(&query.entity)
            .ok_or_else(|| StoreError::UnknownEntity(query.entity.clone()))?;
        let predicate = query.predicate();
        let rows: Vec<Record> = self
            .rows
            .lock()
            .get(&query.entity)
            .map(|rows| {
                rows.values()
                    .filter(|attrs| predicate.matches(attrs))
                    .map(|attrs| Record::loaded(&def.name, &def.primary_key, attrs.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let mut rows = sort_and_page(rows, query);
        preload(self, &mut rows, &query.includes)?;
        Ok(rows)
    }

    fn insert(&self, record: &Record) -> StoreResult<Value> {
        let mut rows = self.rows.lock();
        let table = rows.entry(record.entity().to_string()).or_default();
        let id = match record.id() {
            Some(Value::Int(id)) => *id,
            Some(other) => return Err(StoreError::InvalidData(format!("bad id {other}"))),
            None => {
                let mut next = self.next_id.lock();
                *next += 1;
                while table.contains_key(&*next) {
                    *next += 1;
                }
                *next
            }
        };
        if table.contains_key(&id) {
            return Err(StoreError::InvalidData(format!("duplicate id {id}")));
        }
        let mut attrs = record.attributes().clone();
        attrs.insert("id".to_string(), Value::Int(id));
        table.insert(id, attrs);
        Ok(Value::Int(id))
    }

    fn update(&self, record: &Record) -> StoreResult<()> {
        let id = record
            .id()
            .and_then(Value::as_i64)
            .ok_or_else(|| StoreError::InvalidData("missing id".into()))?;
        self.rows
            .lock()
            .entry(record.entity().to_string())
            .or_default()
            .insert(id, record.attributes().clone());
        Ok(())
    }

    fn delete(&self, entity: &str, id: &Value) -> StoreResult<bool> {
        let Some(id) = id.as_i64() else {
            return Ok(false);
        };
        Ok(self
            .rows
            .lock()
            .get_mut(entity)
            .is_some_and(|rows| rows.remove(&id).is_some()))
    }
}

pub fn article_def() -> EntityDef {
    EntityDef::new("Article")
        .with_fields(["content", "owner_id", "secrecy_level"])
        .with_relation(RelationDef::belongs_to("owner", "User", "owner_id"))
        .with_relation(RelationDef::has_many("comments", "Comment", "article_id"))
        .with_relation(RelationDef::custom(
            "siblings",
            "Article",
            Cardinality::Many,
            |record| Query::new("Article").where_eq("owner_id", record.value("owner_id")),
        ))
        .with_scope("published", |q| q.filter(heimdall_proto::FilterExpr::gt("secrecy_level", 0)))
}

pub fn memory_store() -> MemoryStore {
    MemoryStore::default()
        .with_entity(article_def())
        .with_entity(EntityDef::new("User").with_fields(["name"]))
        .with_entity(
            EntityDef::new("Comment")
                .with_fields(["article_id", "body", "hidden"])
                .with_relation(RelationDef::belongs_to("article", "Article", "article_id")),
        )
}

pub fn article_store() -> Arc<dyn Store> {
    Arc::new(memory_store())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_rejects_taken_id() {
        let store = memory_store();
        let seeded = store.seed("Article", &[("id", Value::Int(1)), ("content", "seeded".into())]);
        assert_eq!(seeded, Value::Int(1));

        let mut again = Record::new("Article", "id");
        again.set("id", 1);
        assert!(matches!(store.insert(&again), Err(StoreError::InvalidData(_))));

        let generated = store.seed("Article", &[("content", "auto".into())]);
        assert_ne!(generated, Value::Int(1));
        assert_eq!(store.row_count("Article"), 2);
    }
}
