//! Model registry and entry point for restricted access.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use heimdall_proto::Record;
use tracing::debug;

use crate::config::GuardConfig;
use crate::error::{ConfigError, GuardError, GuardResult, StoreError};
use crate::model::Model;
use crate::policy::{DecisionTable, Policy, Rules, SecurityContext};
use crate::proxy::{CollectionProxy, ProxyOptions, RecordProxy};
use crate::store::Store;
use crate::validation::{Validator, ValidatorCatalog, ValidatorOptions};

struct GuardInner<C> {
    store: Arc<dyn Store>,
    config: GuardConfig,
    catalog: Arc<ValidatorCatalog>,
    models: DashMap<String, Arc<Model<C>>>,
}

/// Registry of governed entity types over one storage host.
///
/// Cheap to clone; clones share the registry.
pub struct Guard<C> {
    inner: Arc<GuardInner<C>>,
}

impl<C> Clone for Guard<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: SecurityContext> Guard<C> {
    /// Guard with default configuration and the built-in validators.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::builder(store).build()
    }

    /// Guard with custom configuration.
    pub fn with_config(store: Arc<dyn Store>, config: GuardConfig) -> Self {
        Self::builder(store).with_config(config).build()
    }

    /// Start building a guard.
    pub fn builder(store: Arc<dyn Store>) -> GuardBuilder<C> {
        GuardBuilder {
            store,
            config: GuardConfig::default(),
            catalog: ValidatorCatalog::builtin(),
            _context: std::marker::PhantomData,
        }
    }

    /// The storage host.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Active configuration.
    pub fn config(&self) -> &GuardConfig {
        &self.inner.config
    }

    /// Named validators available to rule blocks.
    pub fn catalog(&self) -> &Arc<ValidatorCatalog> {
        &self.inner.catalog
    }

    /// Attach or replace the rule block of an entity type.
    ///
    /// The block runs lazily, the first time a decision table is needed.
    /// Declared scopes and relations survive re-registration.
    pub fn register<F>(&self, entity: &str, block: F) -> GuardResult<()>
    where
        F: Fn(&mut Rules, &C, Option<&Record>) + Send + Sync + 'static,
    {
        let def = self
            .inner
            .store
            .entity(entity)
            .ok_or_else(|| StoreError::UnknownEntity(entity.to_string()))?;
        let declarations = self
            .inner
            .models
            .get(entity)
            .map(|m| Arc::clone(m.declarations()))
            .unwrap_or_default();
        let policy = Policy::new(def, Arc::new(block), Arc::clone(&self.inner.catalog));
        self.inner
            .models
            .insert(entity.to_string(), Arc::new(Model::new(policy, declarations)));
        debug!(entity, "registered policy");
        Ok(())
    }

    /// Check whether an entity type has a registered policy.
    pub fn is_governed(&self, entity: &str) -> bool {
        self.inner.models.contains_key(entity)
    }

    /// Registered model of an entity type.
    pub fn model(&self, entity: &str) -> GuardResult<Arc<Model<C>>> {
        self.find_model(entity)
            .ok_or_else(|| GuardError::Unregistered(entity.to_string()))
    }

    /// Registered model of an entity type, if any.
    pub fn find_model(&self, entity: &str) -> Option<Arc<Model<C>>> {
        self.inner.models.get(entity).map(|m| Arc::clone(m.value()))
    }

    /// Declare a host-defined named scope safe to pass through.
    pub fn declare_scope(&self, entity: &str, name: impl Into<String>) -> GuardResult<()> {
        self.model(entity)?.declare_scope(name);
        Ok(())
    }

    /// Declare a host-defined relation safe to pass through.
    pub fn declare_relation(&self, entity: &str, name: impl Into<String>) -> GuardResult<()> {
        self.model(entity)?.declare_relation(name);
        Ok(())
    }

    /// Default proxy options for this guard.
    pub fn default_options(&self) -> ProxyOptions {
        ProxyOptions::new().with_implicit(self.inner.config.default_strategy.is_implicit())
    }

    /// Every row of `entity` that `context` may fetch.
    pub fn restrict(&self, entity: &str, context: &C) -> GuardResult<CollectionProxy<C>> {
        self.restrict_with(entity, context, self.default_options())
    }

    /// Like [`restrict`](Self::restrict), with explicit proxy options.
    pub fn restrict_with(
        &self,
        entity: &str,
        context: &C,
        options: ProxyOptions,
    ) -> GuardResult<CollectionProxy<C>> {
        let model = self.model(entity)?;
        CollectionProxy::new(self.clone(), model, context.clone(), options, None)
    }

    /// Wrap a single record.
    pub fn restrict_record(
        &self,
        record: Record,
        context: &C,
        options: ProxyOptions,
    ) -> GuardResult<RecordProxy<C>> {
        let model = self.model(record.entity())?;
        RecordProxy::new(self.clone(), model, record, context.clone(), options)
    }

    /// Decision table of an entity type for a context and optional sample.
    pub fn restrictions(
        &self,
        entity: &str,
        context: &C,
        sample: Option<&Record>,
    ) -> GuardResult<Arc<DecisionTable>> {
        Ok(self.model(entity)?.restrictions(context, sample)?)
    }
}

impl<C> fmt::Debug for Guard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("config", &self.inner.config)
            .field("catalog", &self.inner.catalog)
            .field(
                "models",
                &self
                    .inner
                    .models
                    .iter()
                    .map(|m| m.key().clone())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`Guard`].
pub struct GuardBuilder<C> {
    store: Arc<dyn Store>,
    config: GuardConfig,
    catalog: ValidatorCatalog,
    _context: std::marker::PhantomData<fn() -> C>,
}

impl<C: SecurityContext> GuardBuilder<C> {
    /// Set the configuration.
    pub fn with_config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the validator catalog.
    pub fn with_catalog(mut self, catalog: ValidatorCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Register a named validator factory.
    pub fn with_validator<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str, &ValidatorOptions) -> Result<Arc<dyn Validator>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.catalog.register(name, factory);
        self
    }

    /// Build the guard.
    pub fn build(self) -> Guard<C> {
        Guard {
            inner: Arc::new(GuardInner {
                store: self.store,
                config: self.config,
                catalog: Arc::new(self.catalog),
                models: DashMap::new(),
            }),
        }
    }
}
