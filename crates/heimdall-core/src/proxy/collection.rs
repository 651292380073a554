//! Restricted view of a query scope.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use heimdall_proto::{
    AggregateFunction, EntityDef, FilterExpr, Include, OrderSpec, Query, Record, Value,
};
use tracing::{debug, warn};

use super::{IncludeTree, ProxyOptions, RecordProxy};
use crate::error::{GuardError, GuardResult, StoreError};
use crate::guard::Guard;
use crate::model::Model;
use crate::policy::{Action, DecisionTable, SecurityContext, DELETE, FETCH};
use crate::store::fold_aggregate;

/// Rows of one entity seen through the policy of a security context.
///
/// The wrapped query always starts from the fetch scope, so everything
/// reachable from here is already limited to fetchable rows.
#[derive(Clone)]
pub struct CollectionProxy<C: SecurityContext> {
    guard: Guard<C>,
    model: Arc<Model<C>>,
    context: C,
    options: ProxyOptions,
    table: Arc<DecisionTable>,
    query: Query,
    /// Equalities of the base and fetch scope; initial state of built records.
    defaults: BTreeMap<String, Value>,
    loaded: Option<Arc<Vec<Record>>>,
}

impl<C: SecurityContext> CollectionProxy<C> {
    /// Apply the fetch scope to `base` (or to the whole entity).
    pub(crate) fn new(
        guard: Guard<C>,
        model: Arc<Model<C>>,
        context: C,
        options: ProxyOptions,
        base: Option<Query>,
    ) -> GuardResult<Self> {
        let table = model.restrictions(&context, None)?;
        let query = table.request_scope(FETCH, base);
        let mut defaults = query
            .filter
            .as_ref()
            .map(FilterExpr::equalities)
            .unwrap_or_default();
        defaults.remove(&model.entity().primary_key);
        Ok(Self {
            guard,
            model,
            context,
            options,
            table,
            query,
            defaults,
            loaded: None,
        })
    }

    /// Wrap rows that were preloaded with their parent. `base` is the query
    /// that would have produced them.
    pub(crate) fn preloaded(
        guard: Guard<C>,
        model: Arc<Model<C>>,
        context: C,
        options: ProxyOptions,
        base: Query,
        rows: Vec<Record>,
    ) -> GuardResult<Self> {
        let mut proxy = Self::new(guard, model, context, options, Some(base))?;
        proxy.loaded = Some(Arc::new(rows));
        Ok(proxy)
    }

    /// Entity name.
    pub fn entity(&self) -> &str {
        &self.query.entity
    }

    /// The wrapped query, fetch scope included.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Security context.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Proxy options.
    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// Decision table in effect for this collection.
    pub fn restrictions(&self) -> &Arc<DecisionTable> {
        &self.table
    }

    /// Check whether the rows were preloaded with a parent record.
    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn primary_key(&self) -> &str {
        &self.model.entity().primary_key
    }

    /// New proxy over a refined query. Refinement forgets eager loading.
    fn refine<F>(mut self, transform: F) -> Self
    where
        F: FnOnce(Query) -> Query,
    {
        self.query = transform(self.query.without_includes());
        self.options = self.options.without_eager_loaded();
        self.loaded = None;
        self
    }

    /// Conjoin a filter.
    pub fn filter(self, filter: FilterExpr) -> Self {
        self.refine(|q| q.filter(filter))
    }

    /// Conjoin an equality filter.
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.refine(|q| q.where_eq(field, value))
    }

    /// Append an ordering.
    pub fn order_by(self, order: OrderSpec) -> Self {
        self.refine(|q| q.order_by(order))
    }

    /// Replace the ordering.
    pub fn reorder(self, order: OrderSpec) -> Self {
        self.refine(|q| q.reorder(order))
    }

    /// Flip every ordering direction.
    pub fn reverse_order(self) -> Self {
        self.refine(Query::reverse_order)
    }

    /// Limit the number of rows.
    pub fn limit(self, limit: u64) -> Self {
        self.refine(|q| q.limit(limit))
    }

    /// Skip rows.
    pub fn offset(self, offset: u64) -> Self {
        self.refine(|q| q.offset(offset))
    }

    /// Eager load relations.
    ///
    /// Accepts dotted paths or nested trees. Relations into governed entities
    /// only preload rows that entity's fetch scope lets through (unless
    /// disabled in configuration). Record proxies produced by the result use
    /// the preloaded rows instead of querying again.
    pub fn includes(self, tree: impl Into<IncludeTree>) -> GuardResult<Self> {
        let mut eager = self.options.eager_loaded.clone();
        eager.merge(tree.into());

        let mut query = self.query.clone().without_includes();
        let source = Arc::clone(self.model.entity());
        for (relation, subtree) in eager.iter() {
            query = query.include(self.build_include(&source, relation, subtree)?);
        }

        Ok(Self {
            query,
            options: ProxyOptions {
                implicit: self.options.implicit,
                eager_loaded: eager,
            },
            loaded: None,
            ..self
        })
    }

    fn build_include(
        &self,
        source: &EntityDef,
        name: &str,
        subtree: &IncludeTree,
    ) -> GuardResult<Include> {
        let relation = source
            .relation(name)
            .ok_or_else(|| GuardError::NoSuchMethod {
                entity: source.name.clone(),
                method: name.to_string(),
            })?;

        if !relation.is_reflected() {
            let declared = self
                .guard
                .find_model(&source.name)
                .is_some_and(|m| m.is_declared_relation(name));
            if !declared {
                warn!(
                    entity = %source.name,
                    relation = name,
                    "refused eager load of undeclared host-defined relation"
                );
                return Err(GuardError::InsecureOperation(format!(
                    "relation '{name}' of {} is host-defined and was not declared safe",
                    source.name
                )));
            }
        }

        let target = self.guard.find_model(&relation.target);
        let target_def = match &target {
            Some(model) => Arc::clone(model.entity()),
            None => self
                .guard
                .store()
                .entity(&relation.target)
                .ok_or_else(|| StoreError::UnknownEntity(relation.target.clone()))?,
        };

        let mut include = Include::new(name);
        if self.guard.config().eager_load_filtering {
            if let Some(model) = &target {
                if let Some(filter) = model.restrictions(&self.context, None)?.fetch_filter() {
                    include = include.with_filter(filter);
                }
            }
        }
        for (child, child_tree) in subtree.iter() {
            include = include.with_include(self.build_include(&target_def, child, child_tree)?);
        }
        Ok(include)
    }

    /// Apply a host-defined named scope.
    ///
    /// Only scopes declared safe pass through; scopes the host knows but
    /// nobody declared are refused as insecure.
    pub fn scope(self, name: &str) -> GuardResult<Self> {
        let entity = Arc::clone(self.model.entity());
        let Some(scope) = entity.scope(name).cloned() else {
            return Err(GuardError::NoSuchMethod {
                entity: entity.name.clone(),
                method: name.to_string(),
            });
        };
        if !self.model.is_declared_scope(name) {
            warn!(entity = %entity.name, scope = name, "refused undeclared scope");
            return Err(GuardError::InsecureOperation(format!(
                "scope '{name}' of {} was not declared safe",
                entity.name
            )));
        }
        Ok(self.refine(|q| scope(q)))
    }

    /// Apply a scope defined by the rule block on top of the current query.
    /// An undefined scope adds no restriction.
    pub fn policy_scope(self, name: &str) -> Self {
        let table = Arc::clone(&self.table);
        self.refine(|q| table.request_scope(name, Some(q)))
    }

    /// Transform the raw query. The result is wrapped again but no longer
    /// guaranteed to respect the fetch scope.
    pub fn insecure<F>(self, transform: F) -> Self
    where
        F: FnOnce(Query) -> Query,
    {
        debug!(entity = self.entity(), "insecure query transform");
        self.refine(transform)
    }

    /// Fresh record with scope equalities and create fixtures applied.
    pub fn new_record(&self) -> GuardResult<RecordProxy<C>> {
        self.build(std::iter::empty::<(String, Value)>())
    }

    /// Fresh record.
    ///
    /// Equalities of the base and fetch scope become the record's initial,
    /// unchanged state. Equalities added by refinement are assigned like
    /// `attributes`, which come next, and create fixtures win over both.
    pub fn build<I, K, V>(&self, attributes: I) -> GuardResult<RecordProxy<C>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = self.model.entity().new_record();
        record.reset(self.defaults.clone());
        if let Some(filter) = &self.query.filter {
            for (field, value) in filter.equalities() {
                if field != self.primary_key() && !self.defaults.contains_key(&field) {
                    record.set(field, value);
                }
            }
        }
        record.assign(attributes);
        for (field, value) in self.table.fixtures_for(&Action::Create) {
            record.set(field, value);
        }
        RecordProxy::new(
            self.guard.clone(),
            Arc::clone(&self.model),
            record,
            self.context.clone(),
            self.options.without_eager_loaded(),
        )
    }

    /// Build and save. The returned proxy carries any validation errors.
    pub fn create<I, K, V>(&self, attributes: I) -> GuardResult<RecordProxy<C>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = self.build(attributes)?;
        record.save()?;
        Ok(record)
    }

    /// Build and save, failing on validation errors.
    pub fn create_strict<I, K, V>(&self, attributes: I) -> GuardResult<RecordProxy<C>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = self.build(attributes)?;
        record.save_strict()?;
        Ok(record)
    }

    /// Check whether creating records is permitted at all.
    pub fn creatable(&self) -> bool {
        self.table.can(&Action::Create)
    }

    fn delete_query(&self) -> Query {
        if !self.table.has_scope(DELETE) {
            warn!(
                entity = self.entity(),
                "no delete scope defined, deletion is limited by the fetch scope only"
            );
        }
        self.table
            .request_scope(DELETE, Some(self.query.clone().without_includes()))
    }

    /// Delete every row of the current query that lies within the delete
    /// scope. Returns the number of deleted rows.
    pub fn delete_all(&self) -> GuardResult<u64> {
        let query = self.delete_query();
        Ok(self.guard.store().delete_all(&query)?)
    }

    /// Delete deletable rows one by one. Returns the number of deleted rows.
    pub fn destroy_all(&self) -> GuardResult<u64> {
        let query = self.delete_query();
        let store = self.guard.store();
        let mut removed = 0;
        for record in store.select(&query)? {
            if let Some(id) = record.id() {
                if store.delete(self.entity(), id)? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Delete one row by primary key if it lies within the delete scope.
    /// Returns the number of deleted rows.
    pub fn delete(&self, id: impl Into<Value>) -> GuardResult<u64> {
        let query = self.delete_query().where_eq(self.primary_key(), id);
        Ok(self.guard.store().delete_all(&query)?)
    }

    /// Find a visible row by primary key and destroy it through its record
    /// proxy.
    pub fn destroy(&self, id: impl Into<Value>) -> GuardResult<()> {
        self.find(id)?.destroy()
    }

    fn wrap(&self, record: Record) -> GuardResult<RecordProxy<C>> {
        RecordProxy::new(
            self.guard.clone(),
            Arc::clone(&self.model),
            record,
            self.context.clone(),
            self.options.clone(),
        )
    }

    fn rows(&self) -> GuardResult<Arc<Vec<Record>>> {
        match &self.loaded {
            Some(rows) => Ok(Arc::clone(rows)),
            None => Ok(Arc::new(self.guard.store().select(&self.query)?)),
        }
    }

    /// Every row, wrapped.
    pub fn to_vec(&self) -> GuardResult<Vec<RecordProxy<C>>> {
        self.rows()?
            .iter()
            .cloned()
            .map(|record| self.wrap(record))
            .collect()
    }

    /// First row by the current ordering (primary key when unordered).
    pub fn first(&self) -> GuardResult<Option<RecordProxy<C>>> {
        if let Some(rows) = &self.loaded {
            return rows.first().cloned().map(|r| self.wrap(r)).transpose();
        }
        let mut query = self.query.clone();
        if query.order_by.is_empty() {
            query = query.order_by(OrderSpec::asc(self.primary_key()));
        }
        let rows = self.guard.store().select(&query.limit(1))?;
        rows.into_iter().next().map(|r| self.wrap(r)).transpose()
    }

    /// Last row by the current ordering (primary key when unordered).
    pub fn last(&self) -> GuardResult<Option<RecordProxy<C>>> {
        if let Some(rows) = &self.loaded {
            return rows.last().cloned().map(|r| self.wrap(r)).transpose();
        }
        let mut query = self.query.clone();
        if query.order_by.is_empty() {
            query = query.order_by(OrderSpec::asc(self.primary_key()));
        }
        if query.limit.is_some() || query.offset.is_some() {
            let rows = self.guard.store().select(&query)?;
            return rows.into_iter().last().map(|r| self.wrap(r)).transpose();
        }
        let rows = self.guard.store().select(&query.reverse_order().limit(1))?;
        rows.into_iter().next().map(|r| self.wrap(r)).transpose()
    }

    /// Row with the given primary key.
    pub fn find(&self, id: impl Into<Value>) -> GuardResult<RecordProxy<C>> {
        let id = id.into();
        let primary_key = self.primary_key().to_string();
        self.find_by(&primary_key, id.clone())?
            .ok_or_else(|| GuardError::RecordNotFound {
                entity: self.entity().to_string(),
                field: primary_key,
                id,
            })
    }

    /// First row whose `field` equals `value`.
    pub fn find_by(
        &self,
        field: &str,
        value: impl Into<Value>,
    ) -> GuardResult<Option<RecordProxy<C>>> {
        let value = value.into();
        if let Some(rows) = &self.loaded {
            return rows
                .iter()
                .find(|r| r.get(field).is_some_and(|v| v.loose_eq(&value)))
                .cloned()
                .map(|r| self.wrap(r))
                .transpose();
        }
        let query = self.query.clone().where_eq(field, value).limit(1);
        let rows = self.guard.store().select(&query)?;
        rows.into_iter().next().map(|r| self.wrap(r)).transpose()
    }

    /// Number of rows.
    pub fn count(&self) -> GuardResult<u64> {
        match &self.loaded {
            Some(rows) => Ok(rows.len() as u64),
            None => Ok(self.guard.store().count(&self.query)?),
        }
    }

    /// Check whether there is any row.
    pub fn exists(&self) -> GuardResult<bool> {
        match &self.loaded {
            Some(rows) => Ok(!rows.is_empty()),
            None => Ok(self.guard.store().exists(&self.query)?),
        }
    }

    /// Raw values of one field.
    ///
    /// Not checked against the view whitelist: any field of a fetchable row
    /// can be read this way.
    pub fn pluck(&self, field: &str) -> GuardResult<Vec<Value>> {
        match &self.loaded {
            Some(rows) => Ok(rows.iter().map(|r| r.value(field)).collect()),
            None => Ok(self.guard.store().pluck(&self.query, field)?),
        }
    }

    /// Primary keys of every row.
    pub fn ids(&self) -> GuardResult<Vec<Value>> {
        self.pluck(self.primary_key())
    }

    fn aggregate(&self, function: AggregateFunction, field: &str) -> GuardResult<Value> {
        match &self.loaded {
            Some(rows) => Ok(fold_aggregate(
                function,
                rows.iter().map(|r| r.value(field)).collect(),
            )),
            None => Ok(self.guard.store().aggregate(
                &self.query.clone().without_includes(),
                function,
                field,
            )?),
        }
    }

    /// Sum of a field.
    pub fn sum(&self, field: &str) -> GuardResult<Value> {
        self.aggregate(AggregateFunction::Sum, field)
    }

    /// Smallest value of a field.
    pub fn minimum(&self, field: &str) -> GuardResult<Value> {
        self.aggregate(AggregateFunction::Min, field)
    }

    /// Largest value of a field.
    pub fn maximum(&self, field: &str) -> GuardResult<Value> {
        self.aggregate(AggregateFunction::Max, field)
    }

    /// Mean of a field.
    pub fn average(&self, field: &str) -> GuardResult<Value> {
        self.aggregate(AggregateFunction::Avg, field)
    }

    /// Same rows, denied reads on produced records return `Null`.
    pub fn implicit(mut self) -> Self {
        self.options.implicit = true;
        self
    }

    /// Same rows, denied reads on produced records fail.
    pub fn explicit(mut self) -> Self {
        self.options.implicit = false;
        self
    }

    /// Re-restrict. Identical context and options give back an equivalent
    /// proxy; anything else is an error.
    pub fn restrict(&self, context: &C, options: &ProxyOptions) -> GuardResult<Self> {
        if self.context == *context && self.options == *options {
            return Ok(self.clone());
        }
        Err(GuardError::AlreadyRestricted(format!(
            "collection of {}",
            self.entity()
        )))
    }
}

impl<C: SecurityContext> fmt::Debug for CollectionProxy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionProxy")
            .field("query", &self.query)
            .field("options", &self.options)
            .field("loaded", &self.loaded.as_ref().map(|rows| rows.len()))
            .finish()
    }
}
