//! Entity instances as seen by the policy layer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field the failure is attached to.
    pub field: String,
    /// Human readable message.
    pub message: String,
}

/// Validation error collector attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Errors {
    entries: Vec<FieldError>,
}

impl Errors {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure on a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.entries.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Remove every failure.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Check whether no failures were recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Messages recorded for one field.
    pub fn on(&self, field: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.field == field)
            .map(|e| e.message.as_str())
            .collect()
    }

    /// Iterate over all failures.
    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.entries.iter()
    }

    /// `"field message"` strings for every failure.
    pub fn full_messages(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| format!("{} {}", e.field, e.message))
            .collect()
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_messages().join("; "))
    }
}

/// Relation data loaded together with a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Preloaded {
    /// Single-valued relation.
    One(Option<Box<Record>>),
    /// Multi-valued relation.
    Many(Vec<Record>),
}

/// An entity instance: attributes plus change tracking and an error list.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity: String,
    primary_key: String,
    attributes: BTreeMap<String, Value>,
    /// Changed fields with the value each had before its first change.
    changed: BTreeMap<String, Option<Value>>,
    persisted: bool,
    errors: Errors,
    preloaded: BTreeMap<String, Preloaded>,
}

impl Record {
    /// Create a new, unsaved record.
    pub fn new(entity: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            primary_key: primary_key.into(),
            attributes: BTreeMap::new(),
            changed: BTreeMap::new(),
            persisted: false,
            errors: Errors::new(),
            preloaded: BTreeMap::new(),
        }
    }

    /// Create a record for a row that already exists in storage.
    pub fn loaded(
        entity: impl Into<String>,
        primary_key: impl Into<String>,
        attributes: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            attributes,
            persisted: true,
            ..Self::new(entity, primary_key)
        }
    }

    /// Entity type name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Name of the primary-key field.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Primary-key value, if assigned.
    pub fn id(&self) -> Option<&Value> {
        self.attributes.get(&self.primary_key).filter(|v| !v.is_null())
    }

    /// Attribute value; missing attributes read as `None`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// Attribute value, `Null` when missing.
    pub fn value(&self, field: &str) -> Value {
        self.attributes.get(field).cloned().unwrap_or(Value::Null)
    }

    /// Assign an attribute, marking it changed when the value differs.
    ///
    /// Assigning a field back to the value it had before its first change
    /// clears the mark.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.changed.get(&field) {
            Some(original) => {
                if self.is_original(original.as_ref(), &value) {
                    self.changed.remove(&field);
                }
            }
            None => {
                let current = self.attributes.get(&field);
                if !self.is_original(current, &value) {
                    self.changed.insert(field.clone(), current.cloned());
                }
            }
        }
        self.attributes.insert(field, value);
    }

    fn is_original(&self, original: Option<&Value>, value: &Value) -> bool {
        match original {
            Some(original) => original == value,
            None => value.is_null() && self.persisted,
        }
    }

    /// Assign several attributes.
    pub fn assign<I, K, V>(&mut self, attributes: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (field, value) in attributes {
            self.set(field, value);
        }
    }

    /// All attributes.
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Fields changed since load or last save.
    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.changed.keys().map(String::as_str)
    }

    /// Check whether a field changed since load or last save.
    pub fn is_changed(&self, field: &str) -> bool {
        self.changed.contains_key(field)
    }

    /// Check whether any field changed.
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Check whether the record has never been saved.
    pub fn is_new(&self) -> bool {
        !self.persisted
    }

    /// Mark the record as stored under `id` and forget pending changes.
    pub fn mark_persisted(&mut self, id: Value) {
        self.attributes.insert(self.primary_key.clone(), id);
        self.persisted = true;
        self.changed.clear();
    }

    /// Replace attributes with freshly loaded ones.
    pub fn reset(&mut self, attributes: BTreeMap<String, Value>) {
        self.attributes = attributes;
        self.changed.clear();
        self.preloaded.clear();
    }

    /// Validation errors.
    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    /// Mutable validation errors.
    pub fn errors_mut(&mut self) -> &mut Errors {
        &mut self.errors
    }

    /// Preloaded relation data, if the relation was eager loaded.
    pub fn preloaded(&self, relation: &str) -> Option<&Preloaded> {
        self.preloaded.get(relation)
    }

    /// Attach preloaded relation data.
    pub fn set_preloaded(&mut self, relation: impl Into<String>, data: Preloaded) {
        self.preloaded.insert(relation.into(), data);
    }

    /// Same entity, identity and attributes; ignores errors and preloads.
    pub fn same_state(&self, other: &Record) -> bool {
        self.entity == other.entity
            && self.persisted == other.persisted
            && self.attributes == other.attributes
    }
}
