//! Sled-backed storage host.

use std::collections::BTreeMap;
use std::sync::Arc;

use heimdall_core::{preload, sort_and_page, Store, StoreError, StoreResult};
use heimdall_proto::{EntityDef, FilterExpr, Query, Record, Value};
use parking_lot::RwLock;
use sled::{Db, Tree};
use tracing::debug;

use crate::config::SledConfig;
use crate::error::{SledError, SledResult};

/// Prefix of the per-entity row trees.
const ENTITY_TREE_PREFIX: &str = "entity:";

type Row = BTreeMap<String, Value>;

/// A [`Store`] keeping each entity in its own sled tree.
///
/// Rows are JSON documents keyed by an integer primary key. Queries are
/// answered by scanning the tree and evaluating the filter in memory.
pub struct SledStore {
    db: Db,
    entities: RwLock<BTreeMap<String, Arc<EntityDef>>>,
}

impl SledStore {
    /// Open or create a store with the given configuration.
    pub fn open(config: SledConfig) -> SledResult<Self> {
        let db = config.to_sled_config().open()?;
        Ok(Self {
            db,
            entities: RwLock::new(BTreeMap::new()),
        })
    }

    /// Register an entity definition.
    pub fn with_entity(self, def: EntityDef) -> Self {
        self.register_entity(def);
        self
    }

    /// Register or replace an entity definition.
    pub fn register_entity(&self, def: EntityDef) {
        self.entities.write().insert(def.name.clone(), Arc::new(def));
    }

    /// Names of the registered entities.
    pub fn entity_names(&self) -> Vec<String> {
        self.entities.read().keys().cloned().collect()
    }

    /// Check if the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> SledResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn definition(&self, entity: &str) -> StoreResult<Arc<EntityDef>> {
        self.entity(entity)
            .ok_or_else(|| StoreError::UnknownEntity(entity.to_string()))
    }

    fn tree(&self, entity: &str) -> SledResult<Tree> {
        Ok(self.db.open_tree(format!("{ENTITY_TREE_PREFIX}{entity}"))?)
    }

    fn load_rows(&self, entity: &str) -> SledResult<Vec<(i64, Row)>> {
        let mut rows = Vec::new();
        for entry in self.tree(entity)?.iter() {
            let (key, value) = entry?;
            let id = decode_key(&key).ok_or(SledError::InvalidKey)?;
            rows.push((id, serde_json::from_slice(&value)?));
        }
        Ok(rows)
    }

    fn matching(&self, entity: &str, predicate: &FilterExpr) -> SledResult<Vec<(i64, Row)>> {
        if matches!(predicate, FilterExpr::False) {
            return Ok(Vec::new());
        }
        let mut rows = self.load_rows(entity)?;
        rows.retain(|(_, row)| predicate.matches(row));
        Ok(rows)
    }

    fn put(&self, entity: &str, id: i64, row: &Row) -> SledResult<()> {
        let bytes = serde_json::to_vec(row)?;
        self.tree(entity)?.insert(encode_key(id), bytes)?;
        Ok(())
    }

    /// Write a row only if its key is free. Returns `false` on a collision.
    fn put_new(&self, entity: &str, id: i64, row: &Row) -> SledResult<bool> {
        let bytes = serde_json::to_vec(row)?;
        let swapped = self
            .tree(entity)?
            .compare_and_swap(encode_key(id), None::<&[u8]>, Some(bytes))?;
        Ok(swapped.is_ok())
    }

    fn next_id(&self) -> StoreResult<i64> {
        let generated = self.db.generate_id().map_err(SledError::from)?;
        i64::try_from(generated + 1)
            .map_err(|_| StoreError::InvalidData("primary key space exhausted".into()))
    }
}

impl Store for SledStore {
    fn entity(&self, name: &str) -> Option<Arc<EntityDef>> {
        self.entities.read().get(name).cloned()
    }

    fn select(&self, query: &Query) -> StoreResult<Vec<Record>> {
        let def = self.definition(&query.entity)?;
        let rows = self
            .matching(&def.name, &query.predicate())?
            .into_iter()
            .map(|(_, row)| Record::loaded(&def.name, &def.primary_key, row))
            .collect();
        let mut rows = sort_and_page(rows, query);
        preload(self, &mut rows, &query.includes)?;
        Ok(rows)
    }

    fn count(&self, query: &Query) -> StoreResult<u64> {
        if query.limit.is_some() || query.offset.is_some() {
            return Ok(self.select(&query.clone().without_includes())?.len() as u64);
        }
        let def = self.definition(&query.entity)?;
        Ok(self.matching(&def.name, &query.predicate())?.len() as u64)
    }

    fn insert(&self, record: &Record) -> StoreResult<Value> {
        let def = self.definition(record.entity())?;
        let mut row = record.attributes().clone();
        let id = match record.id() {
            None | Some(Value::Null) => loop {
                let id = self.next_id()?;
                row.insert(def.primary_key.clone(), Value::Int(id));
                if self.put_new(&def.name, id, &row)? {
                    break id;
                }
                debug!(entity = %def.name, id, "generated key taken, retrying");
            },
            Some(Value::Int(id)) => {
                let id = *id;
                row.insert(def.primary_key.clone(), Value::Int(id));
                if !self.put_new(&def.name, id, &row)? {
                    return Err(StoreError::InvalidData(format!(
                        "{} row with primary key {id} already exists",
                        def.name
                    )));
                }
                id
            }
            Some(other) => {
                return Err(StoreError::InvalidData(format!(
                    "primary key of {} must be an integer, got {other}",
                    def.name
                )))
            }
        };
        debug!(entity = %def.name, id, "inserted row");
        Ok(Value::Int(id))
    }

    fn update(&self, record: &Record) -> StoreResult<()> {
        let def = self.definition(record.entity())?;
        let id = record
            .id()
            .and_then(Value::as_i64)
            .ok_or_else(|| StoreError::InvalidData(format!("{} row without primary key", def.name)))?;
        let exists = self
            .tree(&def.name)?
            .contains_key(encode_key(id))
            .map_err(SledError::from)?;
        if !exists {
            return Err(StoreError::InvalidData(format!(
                "no {} row with primary key {id}",
                def.name
            )));
        }
        self.put(&def.name, id, record.attributes())?;
        debug!(entity = %def.name, id, "updated row");
        Ok(())
    }

    fn delete(&self, entity: &str, id: &Value) -> StoreResult<bool> {
        let def = self.definition(entity)?;
        let Some(id) = id.as_i64() else {
            return Ok(false);
        };
        let removed = self
            .tree(&def.name)?
            .remove(encode_key(id))
            .map_err(SledError::from)?
            .is_some();
        if removed {
            debug!(entity = %def.name, id, "deleted row");
        }
        Ok(removed)
    }
}

/// Encode a primary key so that byte order matches numeric order.
fn encode_key(id: i64) -> [u8; 8] {
    ((id as u64) ^ (1 << 63)).to_be_bytes()
}

fn decode_key(bytes: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = bytes.try_into().ok()?;
    Some((u64::from_be_bytes(bytes) ^ (1 << 63)) as i64)
}
