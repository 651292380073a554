//! Frozen decision tables.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use heimdall_proto::{FilterExpr, Query, ScopeFn, Value};

use super::action::Action;
use crate::validation::Validator;

/// Name of the mandatory base scope.
pub const FETCH: &str = "fetch";

/// Name of the scope that gates deletion.
pub const DELETE: &str = "delete";

/// The compiled result of one rule block evaluation.
///
/// Immutable once built; shared between proxies behind an `Arc`.
#[derive(Clone)]
pub struct DecisionTable {
    pub(crate) entity: String,
    pub(crate) primary_key: String,
    pub(crate) allowed: HashMap<Action, BTreeSet<String>>,
    pub(crate) fixtures: HashMap<Action, BTreeMap<String, Value>>,
    pub(crate) validators: HashMap<Action, Vec<Arc<dyn Validator>>>,
    pub(crate) fetch: ScopeFn,
    pub(crate) scopes: BTreeMap<String, ScopeFn>,
}

impl DecisionTable {
    /// Entity the table governs.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Check whether `field` may be used for `action`.
    pub fn is_allowed(&self, action: &Action, field: &str) -> bool {
        self.allowed
            .get(action)
            .is_some_and(|fields| fields.contains(field))
    }

    /// Fields allowed for an action, in name order.
    pub fn fields_for(&self, action: &Action) -> Vec<&str> {
        self.allowed
            .get(action)
            .map(|fields| fields.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Fixture values for an action.
    pub fn fixtures_for(&self, action: &Action) -> BTreeMap<String, Value> {
        self.fixtures.get(action).cloned().unwrap_or_default()
    }

    /// Fixture value of one field for an action.
    pub fn fixture(&self, action: &Action, field: &str) -> Option<&Value> {
        self.fixtures.get(action).and_then(|f| f.get(field))
    }

    /// Validators that run when saving with `action`.
    pub fn validators(&self, action: &Action) -> &[Arc<dyn Validator>] {
        self.validators
            .get(action)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Check whether the action is granted at all: some field is allowed,
    /// or a fixture or validator is defined for it.
    pub fn can(&self, action: &Action) -> bool {
        self.allowed.get(action).is_some_and(|f| !f.is_empty())
            || self.fixtures.get(action).is_some_and(|f| !f.is_empty())
            || self.validators.get(action).is_some_and(|v| !v.is_empty())
    }

    /// Check whether a named scope is defined. `fetch` always is.
    pub fn has_scope(&self, name: &str) -> bool {
        name == FETCH || self.scopes.contains_key(name)
    }

    /// Resolve a named scope to a query.
    ///
    /// `fetch` applies to `base`, or to an unfiltered query over the entity.
    /// Any other scope applies on top of `base`, which defaults to the fetch
    /// result. An undefined scope adds no restriction.
    pub fn request_scope(&self, name: &str, base: Option<Query>) -> Query {
        if name == FETCH {
            let base = base.unwrap_or_else(|| Query::new(&self.entity));
            return (self.fetch)(base);
        }
        let base = base.unwrap_or_else(|| self.request_scope(FETCH, None));
        match self.scopes.get(name) {
            Some(scope) => scope(base),
            None => base,
        }
    }

    /// The filter the fetch scope adds to an unfiltered query.
    pub fn fetch_filter(&self) -> Option<FilterExpr> {
        self.request_scope(FETCH, None).filter
    }
}

impl fmt::Debug for DecisionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionTable")
            .field("entity", &self.entity)
            .field("primary_key", &self.primary_key)
            .field("allowed", &self.allowed)
            .field("fixtures", &self.fixtures)
            .field("validators", &self.validators)
            .field("scopes", &self.scopes.keys().collect::<Vec<_>>())
            .finish()
    }
}
