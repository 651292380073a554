//! Field validators and the save-time validator adapter.
//!
//! Validators are external objects with a single `validate(record)`
//! contract: they inspect the record and append failures to its error
//! collector. Rule blocks name validators (`inclusion`, `length`, ...) and
//! the [`ValidatorCatalog`] turns a `(field, name, options)` triple into an
//! instance when the decision table is compiled.

mod builtin;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use heimdall_proto::{Record, Value};
use tracing::debug;

use crate::error::ConfigError;

pub use builtin::{Absence, Exclusion, Inclusion, Length, Numericality, Presence};

/// A record validator.
pub trait Validator: Send + Sync + fmt::Debug {
    /// Inspect the record and add any failures to `record.errors_mut()`.
    fn validate(&self, record: &mut Record);
}

/// Run validators against a record. Returns `true` when no errors were added.
pub fn run_validators(record: &mut Record, validators: &[Arc<dyn Validator>]) -> bool {
    let before = record.errors().len();
    for validator in validators {
        validator.validate(record);
    }
    let added = record.errors().len() - before;
    if added > 0 {
        debug!(
            entity = record.entity(),
            errors = added,
            "record failed validation"
        );
    }
    added == 0
}

/// Options attached to a named validator in a rule block.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatorOptions {
    /// `true`: run with default options.
    Enabled,
    /// `false`: do not run.
    Disabled,
    /// An explicit list of allowed values.
    In(Vec<Value>),
    /// Inclusive bounds, checked by comparison.
    Range { min: Value, max: Value },
    /// A single comparison argument.
    With(Value),
    /// Named options passed through to the validator.
    Map(BTreeMap<String, Value>),
}

impl ValidatorOptions {
    /// Named options as a map view; non-map forms have none.
    pub fn option(&self, key: &str) -> Option<&Value> {
        match self {
            ValidatorOptions::Map(map) => map.get(key).filter(|v| !v.is_null()),
            _ => None,
        }
    }

    /// `allow_nil` flag from named options.
    pub fn allow_nil(&self) -> bool {
        self.option("allow_nil")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl From<bool> for ValidatorOptions {
    fn from(enabled: bool) -> Self {
        if enabled {
            ValidatorOptions::Enabled
        } else {
            ValidatorOptions::Disabled
        }
    }
}

impl<T: Into<Value>> From<RangeInclusive<T>> for ValidatorOptions {
    fn from(range: RangeInclusive<T>) -> Self {
        let (min, max) = range.into_inner();
        ValidatorOptions::Range {
            min: min.into(),
            max: max.into(),
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for ValidatorOptions {
    fn from(values: Vec<T>) -> Self {
        ValidatorOptions::In(values.into_iter().map(Into::into).collect())
    }
}

impl From<Value> for ValidatorOptions {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(enabled) => enabled.into(),
            Value::List(values) => ValidatorOptions::In(values),
            other => ValidatorOptions::With(other),
        }
    }
}

impl From<&str> for ValidatorOptions {
    fn from(value: &str) -> Self {
        ValidatorOptions::With(Value::from(value))
    }
}

impl From<i32> for ValidatorOptions {
    fn from(value: i32) -> Self {
        ValidatorOptions::With(Value::from(value))
    }
}

impl From<i64> for ValidatorOptions {
    fn from(value: i64) -> Self {
        ValidatorOptions::With(Value::Int(value))
    }
}

impl From<BTreeMap<String, Value>> for ValidatorOptions {
    fn from(map: BTreeMap<String, Value>) -> Self {
        ValidatorOptions::Map(map)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for ValidatorOptions {
    fn from(pairs: [(K, V); N]) -> Self {
        ValidatorOptions::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Builds a validator bound to a field.
pub type ValidatorFactory =
    Arc<dyn Fn(&str, &ValidatorOptions) -> Result<Arc<dyn Validator>, ConfigError> + Send + Sync>;

/// Named validator factories.
#[derive(Clone)]
pub struct ValidatorCatalog {
    factories: BTreeMap<String, ValidatorFactory>,
}

impl ValidatorCatalog {
    /// Catalog with no validators.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Catalog with the built-in validators.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register("presence", builtin::presence);
        catalog.register("absence", builtin::absence);
        catalog.register("inclusion", builtin::inclusion);
        catalog.register("exclusion", builtin::exclusion);
        catalog.register("length", builtin::length);
        catalog.register("numericality", builtin::numericality);
        catalog
    }

    /// Register or replace a named validator factory.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str, &ValidatorOptions) -> Result<Arc<dyn Validator>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Check whether a validator name is known.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the named validator for `field`.
    pub fn build(
        &self,
        name: &str,
        field: &str,
        options: &ValidatorOptions,
    ) -> Result<Arc<dyn Validator>, ConfigError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownValidator {
                name: name.to_string(),
                field: field.to_string(),
            })?;
        factory(field, options)
    }
}

impl Default for ValidatorCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ValidatorCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorCatalog")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
