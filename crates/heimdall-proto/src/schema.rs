//! Entity and relation reflection supplied by the storage host.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::query::Query;
use crate::record::Record;

/// A composable query transform, used for named scopes.
pub type ScopeFn = Arc<dyn Fn(Query) -> Query + Send + Sync>;

/// Builds the query for a host-defined relation of one record.
pub type RelationFn = Arc<dyn Fn(&Record) -> Query + Send + Sync>;

/// Cardinality of a relation as seen from its source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one related row.
    One,
    /// Any number of related rows.
    Many,
}

/// How the related rows of a record are found.
#[derive(Clone)]
pub enum RelationSource {
    /// `target.to_field == source.from_field`.
    Keyed {
        /// Field on the source entity.
        from_field: String,
        /// Field on the target entity.
        to_field: String,
    },
    /// Arbitrary host code. Not trusted until declared with the policy layer.
    Custom(RelationFn),
}

impl fmt::Debug for RelationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationSource::Keyed { from_field, to_field } => f
                .debug_struct("Keyed")
                .field("from_field", from_field)
                .field("to_field", to_field)
                .finish(),
            RelationSource::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A relation definition between two entities.
#[derive(Debug, Clone)]
pub struct RelationDef {
    /// Relation name (unique within the source entity).
    pub name: String,
    /// Target entity name.
    pub target: String,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// How related rows are located.
    pub source: RelationSource,
}

impl RelationDef {
    /// Many-to-one: `source.foreign_key` points at `target.id`.
    pub fn belongs_to(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::keyed(name, target, Cardinality::One, foreign_key, "id")
    }

    /// One-to-one: `target.foreign_key` points at `source.id`.
    pub fn has_one(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::keyed(name, target, Cardinality::One, "id", foreign_key)
    }

    /// One-to-many: `target.foreign_key` points at `source.id`.
    pub fn has_many(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::keyed(name, target, Cardinality::Many, "id", foreign_key)
    }

    /// Relation over explicit key fields.
    pub fn keyed(
        name: impl Into<String>,
        target: impl Into<String>,
        cardinality: Cardinality,
        from_field: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality,
            source: RelationSource::Keyed {
                from_field: from_field.into(),
                to_field: to_field.into(),
            },
        }
    }

    /// Relation computed by host code.
    pub fn custom<F>(
        name: impl Into<String>,
        target: impl Into<String>,
        cardinality: Cardinality,
        build: F,
    ) -> Self
    where
        F: Fn(&Record) -> Query + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality,
            source: RelationSource::Custom(Arc::new(build)),
        }
    }

    /// Check whether this relation comes from schema reflection.
    pub fn is_reflected(&self) -> bool {
        matches!(self.source, RelationSource::Keyed { .. })
    }

    /// Query for the rows related to `record`.
    ///
    /// Returns `None` when a keyed relation's source key is unset.
    pub fn query_for(&self, record: &Record) -> Option<Query> {
        match &self.source {
            RelationSource::Keyed { from_field, to_field } => {
                let key = record.get(from_field).filter(|v| !v.is_null())?;
                Some(Query::new(&self.target).where_eq(to_field.clone(), key.clone()))
            }
            RelationSource::Custom(build) => Some(build(record)),
        }
    }
}

/// An entity definition: primary key, fields, relations and host scopes.
#[derive(Clone)]
pub struct EntityDef {
    /// Entity name.
    pub name: String,
    /// Name of the primary-key field.
    pub primary_key: String,
    /// Declared attribute names.
    pub fields: Vec<String>,
    relations: BTreeMap<String, RelationDef>,
    scopes: BTreeMap<String, ScopeFn>,
}

impl EntityDef {
    /// Create a new entity definition with `id` as primary key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: "id".to_string(),
            fields: vec!["id".to_string()],
            relations: BTreeMap::new(),
            scopes: BTreeMap::new(),
        }
    }

    /// Use a different primary-key field.
    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.fields.retain(|f| f != &self.primary_key);
        if !self.fields.contains(&field) {
            self.fields.insert(0, field.clone());
        }
        self.primary_key = field;
        self
    }

    /// Add an attribute.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.fields.contains(&field) {
            self.fields.push(field);
        }
        self
    }

    /// Add several attributes.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            self = self.with_field(field);
        }
        self
    }

    /// Add a relation.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.insert(relation.name.clone(), relation);
        self
    }

    /// Add a host-defined named scope.
    pub fn with_scope<F>(mut self, name: impl Into<String>, scope: F) -> Self
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        self.scopes.insert(name.into(), Arc::new(scope));
        self
    }

    /// Look up a relation by name.
    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.get(name)
    }

    /// All relations.
    pub fn relations(&self) -> impl Iterator<Item = &RelationDef> {
        self.relations.values()
    }

    /// Look up a host-defined named scope.
    pub fn scope(&self, name: &str) -> Option<&ScopeFn> {
        self.scopes.get(name)
    }

    /// Check whether a field is declared.
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Fresh, unsaved record of this entity.
    pub fn new_record(&self) -> Record {
        Record::new(&self.name, &self.primary_key)
    }

    /// Unfiltered query over this entity.
    pub fn query(&self) -> Query {
        Query::new(&self.name)
    }
}

impl fmt::Debug for EntityDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDef")
            .field("name", &self.name)
            .field("primary_key", &self.primary_key)
            .field("fields", &self.fields)
            .field("relations", &self.relations)
            .field("scopes", &self.scopes.keys().collect::<Vec<_>>())
            .finish()
    }
}
