//! The rule-block DSL.
//!
//! A rule block receives a fresh [`Rules`] builder together with the
//! security context and an optional sample record, and describes what that
//! context may do:
//!
//! ```ignore
//! rules.scope("fetch", move |q| q.filter(FilterExpr::le("secrecy_level", level)));
//! rules.can("view", ["content", "secrecy_level"]);
//! rules.can("create", vec![
//!     FieldGrant::allow("content"),
//!     FieldGrant::fixture("owner_id", user_id),
//!     FieldGrant::validated("secrecy_level", "inclusion", 0..=level),
//! ]);
//! rules.cannot("update", "owner_id");
//! ```
//!
//! [`Rules::compile`] freezes the builder into a [`DecisionTable`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use heimdall_proto::{EntityDef, Query, ScopeFn, Value};

use super::action::{Action, IntoActions};
use super::table::{DecisionTable, FETCH};
use crate::error::ConfigError;
use crate::validation::{Validator, ValidatorCatalog, ValidatorOptions};

/// One entry of a `can` grant.
#[derive(Debug, Clone)]
pub enum FieldGrant {
    /// Field may be written freely.
    Allow(String),
    /// Field must hold exactly this value.
    Fixture(String, Value),
    /// Field may be written and is checked by named validators.
    Validate(String, Vec<(String, ValidatorOptions)>),
}

impl FieldGrant {
    /// Plain field grant.
    pub fn allow(field: impl Into<String>) -> Self {
        FieldGrant::Allow(field.into())
    }

    /// Fixed value grant.
    pub fn fixture(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldGrant::Fixture(field.into(), value.into())
    }

    /// Validated field grant with one named validator.
    pub fn validated(
        field: impl Into<String>,
        validator: impl Into<String>,
        options: impl Into<ValidatorOptions>,
    ) -> Self {
        FieldGrant::Validate(field.into(), vec![(validator.into(), options.into())])
    }

    /// Add another named validator to a validated grant. Turns a plain grant
    /// into a validated one; fixtures are left untouched.
    pub fn and_validates(
        self,
        validator: impl Into<String>,
        options: impl Into<ValidatorOptions>,
    ) -> Self {
        match self {
            FieldGrant::Allow(field) => FieldGrant::validated(field, validator, options),
            FieldGrant::Validate(field, mut rules) => {
                rules.push((validator.into(), options.into()));
                FieldGrant::Validate(field, rules)
            }
            fixture @ FieldGrant::Fixture(..) => fixture,
        }
    }

    /// Field the grant applies to.
    pub fn field(&self) -> &str {
        match self {
            FieldGrant::Allow(field)
            | FieldGrant::Fixture(field, _)
            | FieldGrant::Validate(field, _) => field,
        }
    }
}

impl From<&str> for FieldGrant {
    fn from(field: &str) -> Self {
        FieldGrant::allow(field)
    }
}

impl From<String> for FieldGrant {
    fn from(field: String) -> Self {
        FieldGrant::Allow(field)
    }
}

/// One or several field grants.
pub trait IntoFieldGrants {
    /// Convert into a list of grants.
    fn into_grants(self) -> Vec<FieldGrant>;
}

impl IntoFieldGrants for FieldGrant {
    fn into_grants(self) -> Vec<FieldGrant> {
        vec![self]
    }
}

impl IntoFieldGrants for &str {
    fn into_grants(self) -> Vec<FieldGrant> {
        vec![FieldGrant::allow(self)]
    }
}

impl<G: Into<FieldGrant>, const N: usize> IntoFieldGrants for [G; N] {
    fn into_grants(self) -> Vec<FieldGrant> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<G: Into<FieldGrant>> IntoFieldGrants for Vec<G> {
    fn into_grants(self) -> Vec<FieldGrant> {
        self.into_iter().map(Into::into).collect()
    }
}

#[derive(Debug, Clone)]
enum ValidatorSpec {
    Named {
        field: String,
        name: String,
        options: ValidatorOptions,
    },
    Instance(Arc<dyn Validator>),
}

/// Mutable rule builder handed to a rule block.
pub struct Rules {
    entity: Arc<EntityDef>,
    allowed: HashMap<Action, BTreeSet<String>>,
    fixtures: HashMap<Action, BTreeMap<String, Value>>,
    validators: HashMap<Action, Vec<ValidatorSpec>>,
    scopes: BTreeMap<String, ScopeFn>,
}

impl Rules {
    /// Start from empty maps.
    pub fn new(entity: Arc<EntityDef>) -> Self {
        Self {
            entity,
            allowed: HashMap::new(),
            fixtures: HashMap::new(),
            validators: HashMap::new(),
            scopes: BTreeMap::new(),
        }
    }

    /// Entity the rules are written for.
    pub fn entity(&self) -> &EntityDef {
        &self.entity
    }

    /// Register a named scope. `fetch` is the base filter of every
    /// collection and must be defined.
    pub fn scope<F>(&mut self, name: impl Into<String>, transform: F) -> &mut Self
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        self.scopes.insert(name.into(), Arc::new(transform));
        self
    }

    /// Grant fields for one or more actions.
    pub fn can(&mut self, actions: impl IntoActions, fields: impl IntoFieldGrants) -> &mut Self {
        let grants = fields.into_grants();
        for action in actions.into_actions() {
            for grant in &grants {
                self.grant(&action, grant.clone());
            }
        }
        self
    }

    /// Grant every declared field of the entity for one or more actions.
    ///
    /// The primary key is left out of `create` and `update`; grant it with
    /// [`Rules::can`] if callers may choose it.
    pub fn can_all(&mut self, actions: impl IntoActions) -> &mut Self {
        let entity = Arc::clone(&self.entity);
        for action in actions.into_actions() {
            let writes = matches!(action, Action::Create | Action::Update);
            for field in &entity.fields {
                if writes && *field == entity.primary_key {
                    continue;
                }
                self.grant(&action, FieldGrant::allow(field.clone()));
            }
        }
        self
    }

    /// Revoke fields for one or more actions, clearing matching fixtures.
    pub fn cannot(&mut self, actions: impl IntoActions, fields: impl IntoFieldGrants) -> &mut Self {
        let grants = fields.into_grants();
        for action in actions.into_actions() {
            for grant in &grants {
                let field = grant.field();
                if let Some(allowed) = self.allowed.get_mut(&action) {
                    allowed.remove(field);
                }
                if let Some(fixtures) = self.fixtures.get_mut(&action) {
                    fixtures.remove(field);
                }
            }
        }
        self
    }

    /// Attach a validator instance to one or more actions.
    pub fn validates(
        &mut self,
        actions: impl IntoActions,
        validator: Arc<dyn Validator>,
    ) -> &mut Self {
        for action in actions.into_actions() {
            self.validators
                .entry(action)
                .or_default()
                .push(ValidatorSpec::Instance(Arc::clone(&validator)));
        }
        self
    }

    fn grant(&mut self, action: &Action, grant: FieldGrant) {
        match grant {
            FieldGrant::Allow(field) => {
                self.allowed.entry(action.clone()).or_default().insert(field);
            }
            FieldGrant::Fixture(field, value) => {
                if let Some(allowed) = self.allowed.get_mut(action) {
                    allowed.remove(&field);
                }
                self.fixtures
                    .entry(action.clone())
                    .or_default()
                    .insert(field, value);
            }
            FieldGrant::Validate(field, rules) => {
                self.allowed
                    .entry(action.clone())
                    .or_default()
                    .insert(field.clone());
                let specs = self.validators.entry(action.clone()).or_default();
                for (name, options) in rules {
                    specs.push(ValidatorSpec::Named {
                        field: field.clone(),
                        name,
                        options,
                    });
                }
            }
        }
    }

    /// Freeze into a decision table.
    ///
    /// Fails when no fetch scope was defined or a named validator cannot be
    /// built. The primary key is always viewable.
    pub fn compile(mut self, catalog: &ValidatorCatalog) -> Result<DecisionTable, ConfigError> {
        let fetch = self
            .scopes
            .remove(FETCH)
            .ok_or_else(|| ConfigError::MissingFetchScope {
                entity: self.entity.name.clone(),
            })?;

        self.allowed
            .entry(Action::View)
            .or_default()
            .insert(self.entity.primary_key.clone());

        let mut validators: HashMap<Action, Vec<Arc<dyn Validator>>> = HashMap::new();
        for (action, specs) in self.validators {
            let mut built = Vec::with_capacity(specs.len());
            for spec in specs {
                match spec {
                    ValidatorSpec::Named { options, .. }
                        if options == ValidatorOptions::Disabled => {}
                    ValidatorSpec::Named {
                        field,
                        name,
                        options,
                    } => built.push(catalog.build(&name, &field, &options)?),
                    ValidatorSpec::Instance(validator) => built.push(validator),
                }
            }
            validators.insert(action, built);
        }

        Ok(DecisionTable {
            entity: self.entity.name.clone(),
            primary_key: self.entity.primary_key.clone(),
            allowed: self.allowed,
            fixtures: self.fixtures,
            validators,
            fetch,
            scopes: self.scopes,
        })
    }
}
