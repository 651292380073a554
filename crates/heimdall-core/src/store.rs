//! Storage host interface.
//!
//! The policy layer never executes queries itself. It hands [`Query`] values
//! to a [`Store`] and wraps whatever comes back.

use std::sync::Arc;

use heimdall_proto::{
    AggregateFunction, Cardinality, EntityDef, Include, OrderDirection, Preloaded, Query, Record,
    Value,
};

use crate::error::{StoreError, StoreResult};

/// A data-access host: schema reflection plus query execution.
pub trait Store: Send + Sync {
    /// Entity definition for `name`, if the host knows it.
    fn entity(&self, name: &str) -> Option<Arc<EntityDef>>;

    /// Execute a query. Includes must be resolved into each record's
    /// preloaded data, honouring per-include filters.
    fn select(&self, query: &Query) -> StoreResult<Vec<Record>>;

    /// Insert a new record, returning its primary-key value.
    fn insert(&self, record: &Record) -> StoreResult<Value>;

    /// Write back a persisted record.
    fn update(&self, record: &Record) -> StoreResult<()>;

    /// Delete one row by primary key. Returns whether a row was removed.
    fn delete(&self, entity: &str, id: &Value) -> StoreResult<bool>;

    /// Number of rows matching the query (limit and offset applied).
    fn count(&self, query: &Query) -> StoreResult<u64> {
        Ok(self.select(&query.clone().without_includes())?.len() as u64)
    }

    /// Check whether any row matches.
    fn exists(&self, query: &Query) -> StoreResult<bool> {
        Ok(self.count(&query.clone().limit(1))? > 0)
    }

    /// Values of one field for every matching row.
    fn pluck(&self, query: &Query, field: &str) -> StoreResult<Vec<Value>> {
        Ok(self
            .select(&query.clone().without_includes())?
            .iter()
            .map(|r| r.value(field))
            .collect())
    }

    /// Aggregate one field over the matching rows.
    fn aggregate(
        &self,
        query: &Query,
        function: AggregateFunction,
        field: &str,
    ) -> StoreResult<Value> {
        let values = self.pluck(query, field)?;
        Ok(fold_aggregate(function, values))
    }

    /// Delete every matching row, returning how many were removed.
    fn delete_all(&self, query: &Query) -> StoreResult<u64> {
        let mut removed = 0;
        for record in self.select(&query.clone().without_includes())? {
            if let Some(id) = record.id() {
                if self.delete(&query.entity, id)? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/// Sort rows by the query ordering, then apply offset and limit.
pub fn sort_and_page(mut rows: Vec<Record>, query: &Query) -> Vec<Record> {
    if !query.order_by.is_empty() {
        rows.sort_by(|a, b| {
            for spec in &query.order_by {
                let ordering = a.value(&spec.field).sort_cmp(&b.value(&spec.field));
                let ordering = match spec.direction {
                    OrderDirection::Asc => ordering,
                    OrderDirection::Desc => ordering.reverse(),
                };
                if ordering.is_ne() {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
    }
    let offset = query.offset.unwrap_or(0) as usize;
    let limit = query.limit.map_or(usize::MAX, |l| l as usize);
    rows.into_iter().skip(offset).take(limit).collect()
}

/// Resolve includes by querying the store once per record and relation.
///
/// Each include's filter restricts the related rows; nested includes are
/// resolved by the nested `select` call.
pub fn preload<S: Store + ?Sized>(
    store: &S,
    records: &mut [Record],
    includes: &[Include],
) -> StoreResult<()> {
    let Some(entity) = records.first().map(|r| r.entity().to_string()) else {
        return Ok(());
    };
    let def = store
        .entity(&entity)
        .ok_or_else(|| StoreError::UnknownEntity(entity.clone()))?;

    for include in includes {
        let relation = def
            .relation(&include.relation)
            .ok_or_else(|| StoreError::UnknownRelation {
                entity: entity.clone(),
                relation: include.relation.clone(),
            })?;
        for record in records.iter_mut() {
            let rows = match relation.query_for(record) {
                Some(query) => {
                    let mut query = match &include.filter {
                        Some(filter) => query.filter(filter.clone()),
                        None => query,
                    };
                    query.includes = include.includes.clone();
                    store.select(&query)?
                }
                None => Vec::new(),
            };
            let data = match relation.cardinality {
                Cardinality::One => Preloaded::One(rows.into_iter().next().map(Box::new)),
                Cardinality::Many => Preloaded::Many(rows),
            };
            record.set_preloaded(&include.relation, data);
        }
    }
    Ok(())
}

/// Fold plucked values into an aggregate, skipping nulls.
///
/// Sums of integers stay integers (an empty sum is `0`); averages are floats,
/// `Null` over no rows; min/max use value ordering and are `Null` when empty.
pub fn fold_aggregate(function: AggregateFunction, values: Vec<Value>) -> Value {
    let values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    match function {
        AggregateFunction::Sum => {
            if values.iter().all(|v| matches!(v, Value::Int(_))) {
                Value::Int(values.iter().filter_map(Value::as_i64).sum())
            } else {
                Value::Float(values.iter().filter_map(Value::as_f64).sum())
            }
        }
        AggregateFunction::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggregateFunction::Min => extreme(values, |o| o.is_lt()),
        AggregateFunction::Max => extreme(values, |o| o.is_gt()),
    }
}

fn extreme<F>(values: Vec<Value>, better: F) -> Value
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    let mut best: Option<Value> = None;
    for value in values {
        best = match best {
            Some(current) if !value.compare(&current).is_some_and(&better) => Some(current),
            _ => Some(value),
        };
    }
    best.unwrap_or(Value::Null)
}
