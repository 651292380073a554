//! Per-entity registration: rule block plus declared pass-through names.

use std::collections::BTreeSet;
use std::sync::Arc;

use heimdall_proto::{EntityDef, Record};
use parking_lot::RwLock;

use crate::error::ConfigError;
use crate::policy::{DecisionTable, Policy, SecurityContext};

/// Host-defined scopes and relations declared safe to pass through.
#[derive(Debug, Default)]
pub(crate) struct Declarations {
    scopes: RwLock<BTreeSet<String>>,
    relations: RwLock<BTreeSet<String>>,
}

/// A governed entity type.
#[derive(Debug)]
pub struct Model<C> {
    policy: Policy<C>,
    declarations: Arc<Declarations>,
}

impl<C: SecurityContext> Model<C> {
    pub(crate) fn new(policy: Policy<C>, declarations: Arc<Declarations>) -> Self {
        Self {
            policy,
            declarations,
        }
    }

    /// Entity definition.
    pub fn entity(&self) -> &Arc<EntityDef> {
        self.policy.entity()
    }

    /// Entity name.
    pub fn name(&self) -> &str {
        &self.policy.entity().name
    }

    /// The registered policy.
    pub fn policy(&self) -> &Policy<C> {
        &self.policy
    }

    /// Decision table for a context and optional sample record.
    pub fn restrictions(
        &self,
        context: &C,
        sample: Option<&Record>,
    ) -> Result<Arc<DecisionTable>, ConfigError> {
        self.policy.evaluate(context, sample)
    }

    /// Mark a host-defined named scope as safe.
    pub fn declare_scope(&self, name: impl Into<String>) {
        self.declarations.scopes.write().insert(name.into());
    }

    /// Mark a host-defined relation as safe.
    pub fn declare_relation(&self, name: impl Into<String>) {
        self.declarations.relations.write().insert(name.into());
    }

    /// Check whether a named scope was declared safe.
    pub fn is_declared_scope(&self, name: &str) -> bool {
        self.declarations.scopes.read().contains(name)
    }

    /// Check whether a relation was declared safe.
    pub fn is_declared_relation(&self, name: &str) -> bool {
        self.declarations.relations.read().contains(name)
    }

    pub(crate) fn declarations(&self) -> &Arc<Declarations> {
        &self.declarations
    }
}
