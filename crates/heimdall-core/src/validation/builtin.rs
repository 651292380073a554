//! Built-in validators.

use std::cmp::Ordering;
use std::sync::Arc;

use heimdall_proto::{Record, Value};

use super::{Validator, ValidatorOptions};
use crate::error::ConfigError;

fn invalid(name: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValidatorOptions {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Field must not be blank.
#[derive(Debug, Clone)]
pub struct Presence {
    field: String,
}

impl Presence {
    /// Presence check for a field.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Validator for Presence {
    fn validate(&self, record: &mut Record) {
        if record.value(&self.field).is_blank() {
            record.errors_mut().add(&self.field, "can't be blank");
        }
    }
}

pub(super) fn presence(
    field: &str,
    options: &ValidatorOptions,
) -> Result<Arc<dyn Validator>, ConfigError> {
    match options {
        ValidatorOptions::Enabled | ValidatorOptions::Map(_) => Ok(Arc::new(Presence::new(field))),
        _ => Err(invalid("presence", "expected true or named options")),
    }
}

/// Field must be blank.
#[derive(Debug, Clone)]
pub struct Absence {
    field: String,
}

impl Absence {
    /// Absence check for a field.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Validator for Absence {
    fn validate(&self, record: &mut Record) {
        if !record.value(&self.field).is_blank() {
            record.errors_mut().add(&self.field, "must be blank");
        }
    }
}

pub(super) fn absence(
    field: &str,
    options: &ValidatorOptions,
) -> Result<Arc<dyn Validator>, ConfigError> {
    match options {
        ValidatorOptions::Enabled | ValidatorOptions::Map(_) => Ok(Arc::new(Absence::new(field))),
        _ => Err(invalid("absence", "expected true or named options")),
    }
}

/// A set of values: an explicit list or inclusive bounds.
#[derive(Debug, Clone, PartialEq)]
enum ValueSet {
    List(Vec<Value>),
    Range { min: Value, max: Value },
}

impl ValueSet {
    fn contains(&self, value: &Value) -> bool {
        match self {
            ValueSet::List(values) => values.iter().any(|v| v.loose_eq(value)),
            ValueSet::Range { min, max } => {
                matches!(min.compare(value), Some(Ordering::Less | Ordering::Equal))
                    && matches!(value.compare(max), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }
}

/// Allowed values from `In`, `Range`, `With` or an `in`/`within` named option.
fn value_set(name: &str, options: &ValidatorOptions) -> Result<ValueSet, ConfigError> {
    match options {
        ValidatorOptions::In(values) => Ok(ValueSet::List(values.clone())),
        ValidatorOptions::Range { min, max } => Ok(ValueSet::Range {
            min: min.clone(),
            max: max.clone(),
        }),
        ValidatorOptions::With(Value::List(values)) => Ok(ValueSet::List(values.clone())),
        ValidatorOptions::With(value) => Ok(ValueSet::List(vec![value.clone()])),
        ValidatorOptions::Map(_) => match options.option("in").or_else(|| options.option("within")) {
            Some(Value::List(values)) => Ok(ValueSet::List(values.clone())),
            Some(value) => Ok(ValueSet::List(vec![value.clone()])),
            None => Err(invalid(name, "missing 'in' option")),
        },
        ValidatorOptions::Enabled | ValidatorOptions::Disabled => {
            Err(invalid(name, "a list of values is required"))
        }
    }
}

/// Field value must be one of a set.
#[derive(Debug, Clone)]
pub struct Inclusion {
    field: String,
    values: ValueSet,
    allow_nil: bool,
}

impl Inclusion {
    /// Inclusion check against a list of values.
    pub fn new(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            values: ValueSet::List(values),
            allow_nil: false,
        }
    }

    /// Inclusion check against inclusive bounds.
    pub fn within(field: impl Into<String>, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            values: ValueSet::Range {
                min: min.into(),
                max: max.into(),
            },
            allow_nil: false,
        }
    }

    /// Skip the check when the field is null.
    pub fn allow_nil(mut self, allow: bool) -> Self {
        self.allow_nil = allow;
        self
    }
}

impl Validator for Inclusion {
    fn validate(&self, record: &mut Record) {
        let value = record.value(&self.field);
        if value.is_null() && self.allow_nil {
            return;
        }
        if !self.values.contains(&value) {
            record
                .errors_mut()
                .add(&self.field, "is not included in the list");
        }
    }
}

pub(super) fn inclusion(
    field: &str,
    options: &ValidatorOptions,
) -> Result<Arc<dyn Validator>, ConfigError> {
    let values = value_set("inclusion", options)?;
    Ok(Arc::new(Inclusion {
        field: field.to_string(),
        values,
        allow_nil: options.allow_nil(),
    }))
}

/// Field value must not be one of a set.
#[derive(Debug, Clone)]
pub struct Exclusion {
    field: String,
    values: ValueSet,
    allow_nil: bool,
}

impl Exclusion {
    /// Exclusion check against a list of values.
    pub fn new(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            values: ValueSet::List(values),
            allow_nil: false,
        }
    }

    /// Exclusion check against inclusive bounds.
    pub fn within(field: impl Into<String>, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            values: ValueSet::Range {
                min: min.into(),
                max: max.into(),
            },
            allow_nil: false,
        }
    }

    /// Skip the check when the field is null.
    pub fn allow_nil(mut self, allow: bool) -> Self {
        self.allow_nil = allow;
        self
    }
}

impl Validator for Exclusion {
    fn validate(&self, record: &mut Record) {
        let value = record.value(&self.field);
        if value.is_null() && self.allow_nil {
            return;
        }
        if self.values.contains(&value) {
            record.errors_mut().add(&self.field, "is reserved");
        }
    }
}

pub(super) fn exclusion(
    field: &str,
    options: &ValidatorOptions,
) -> Result<Arc<dyn Validator>, ConfigError> {
    let values = value_set("exclusion", options)?;
    Ok(Arc::new(Exclusion {
        field: field.to_string(),
        values,
        allow_nil: options.allow_nil(),
    }))
}

/// String or list length bounds.
#[derive(Debug, Clone, Default)]
pub struct Length {
    field: String,
    minimum: Option<usize>,
    maximum: Option<usize>,
    exact: Option<usize>,
    allow_nil: bool,
}

impl Length {
    /// Length check for a field with no bounds yet.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..Self::default()
        }
    }

    /// Lower bound.
    pub fn minimum(mut self, minimum: usize) -> Self {
        self.minimum = Some(minimum);
        self
    }

    /// Upper bound.
    pub fn maximum(mut self, maximum: usize) -> Self {
        self.maximum = Some(maximum);
        self
    }

    /// Exact length.
    pub fn exactly(mut self, length: usize) -> Self {
        self.exact = Some(length);
        self
    }

    /// Skip the check when the field is null.
    pub fn allow_nil(mut self, allow: bool) -> Self {
        self.allow_nil = allow;
        self
    }
}

impl Validator for Length {
    fn validate(&self, record: &mut Record) {
        let value = record.value(&self.field);
        if value.is_null() && self.allow_nil {
            return;
        }
        let length = value.length().unwrap_or(0);
        let errors = record.errors_mut();
        if let Some(exact) = self.exact {
            if length != exact {
                errors.add(
                    &self.field,
                    format!("is the wrong length (should be {exact} characters)"),
                );
            }
        }
        if let Some(minimum) = self.minimum {
            if length < minimum {
                errors.add(
                    &self.field,
                    format!("is too short (minimum is {minimum} characters)"),
                );
            }
        }
        if let Some(maximum) = self.maximum {
            if length > maximum {
                errors.add(
                    &self.field,
                    format!("is too long (maximum is {maximum} characters)"),
                );
            }
        }
    }
}

fn as_length(name: &str, value: &Value) -> Result<usize, ConfigError> {
    value
        .as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| invalid(name, format!("expected a non-negative integer, got {value}")))
}

pub(super) fn length(
    field: &str,
    options: &ValidatorOptions,
) -> Result<Arc<dyn Validator>, ConfigError> {
    let mut validator = Length::new(field).allow_nil(options.allow_nil());
    match options {
        ValidatorOptions::Range { min, max } => {
            validator = validator
                .minimum(as_length("length", min)?)
                .maximum(as_length("length", max)?);
        }
        ValidatorOptions::In(bounds) => {
            let bounds = bounds
                .iter()
                .map(|v| as_length("length", v))
                .collect::<Result<Vec<_>, _>>()?;
            let (Some(min), Some(max)) = (bounds.iter().min(), bounds.iter().max()) else {
                return Err(invalid("length", "empty range"));
            };
            validator = validator.minimum(*min).maximum(*max);
        }
        ValidatorOptions::With(value) => {
            validator = validator.exactly(as_length("length", value)?);
        }
        ValidatorOptions::Map(_) => {
            if let Some(min) = options.option("minimum") {
                validator = validator.minimum(as_length("length", min)?);
            }
            if let Some(max) = options.option("maximum") {
                validator = validator.maximum(as_length("length", max)?);
            }
            if let Some(exact) = options.option("is") {
                validator = validator.exactly(as_length("length", exact)?);
            }
        }
        ValidatorOptions::Enabled | ValidatorOptions::Disabled => {
            return Err(invalid("length", "bounds are required"));
        }
    }
    Ok(Arc::new(validator))
}

/// Numeric value checks.
#[derive(Debug, Clone, Default)]
pub struct Numericality {
    field: String,
    only_integer: bool,
    allow_nil: bool,
    greater_than: Option<f64>,
    greater_than_or_equal_to: Option<f64>,
    less_than: Option<f64>,
    less_than_or_equal_to: Option<f64>,
    equal_to: Option<f64>,
}

impl Numericality {
    /// Numericality check for a field.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..Self::default()
        }
    }

    /// Require an integer.
    pub fn only_integer(mut self, only: bool) -> Self {
        self.only_integer = only;
        self
    }

    /// Skip the check when the field is null.
    pub fn allow_nil(mut self, allow: bool) -> Self {
        self.allow_nil = allow;
        self
    }

    /// Exclusive lower bound.
    pub fn greater_than(mut self, bound: f64) -> Self {
        self.greater_than = Some(bound);
        self
    }

    /// Inclusive lower bound.
    pub fn greater_than_or_equal_to(mut self, bound: f64) -> Self {
        self.greater_than_or_equal_to = Some(bound);
        self
    }

    /// Exclusive upper bound.
    pub fn less_than(mut self, bound: f64) -> Self {
        self.less_than = Some(bound);
        self
    }

    /// Inclusive upper bound.
    pub fn less_than_or_equal_to(mut self, bound: f64) -> Self {
        self.less_than_or_equal_to = Some(bound);
        self
    }

    /// Required value.
    pub fn equal_to(mut self, value: f64) -> Self {
        self.equal_to = Some(value);
        self
    }
}

/// Render a bound the way it was most likely written.
fn bound(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

impl Validator for Numericality {
    fn validate(&self, record: &mut Record) {
        let value = record.value(&self.field);
        if value.is_null() && self.allow_nil {
            return;
        }
        let number = match &value {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        let errors = record.errors_mut();
        let Some(number) = number else {
            errors.add(&self.field, "is not a number");
            return;
        };
        if self.only_integer && number.fract() != 0.0 {
            errors.add(&self.field, "must be an integer");
            return;
        }

        let checks: [(Option<f64>, fn(f64, f64) -> bool, &str); 5] = [
            (self.greater_than, |n, l| n > l, "greater than"),
            (self.greater_than_or_equal_to, |n, l| n >= l, "greater than or equal to"),
            (self.less_than, |n, l| n < l, "less than"),
            (self.less_than_or_equal_to, |n, l| n <= l, "less than or equal to"),
            (self.equal_to, |n, l| n == l, "equal to"),
        ];
        for (limit, check, phrase) in checks {
            if let Some(limit) = limit {
                if !check(number, limit) {
                    errors.add(&self.field, format!("must be {phrase} {}", bound(limit)));
                }
            }
        }
    }
}

pub(super) fn numericality(
    field: &str,
    options: &ValidatorOptions,
) -> Result<Arc<dyn Validator>, ConfigError> {
    let number = |key: &str| -> Result<Option<f64>, ConfigError> {
        match options.option(key) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| invalid("numericality", format!("'{key}' must be a number"))),
        }
    };

    let mut validator = Numericality::new(field).allow_nil(options.allow_nil());
    match options {
        ValidatorOptions::Enabled => {}
        ValidatorOptions::With(value) => {
            let target = value
                .as_f64()
                .ok_or_else(|| invalid("numericality", "expected a number"))?;
            validator = validator.equal_to(target);
        }
        ValidatorOptions::Map(_) => {
            validator = validator.only_integer(
                options
                    .option("only_integer")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            );
            if let Some(n) = number("greater_than")? {
                validator = validator.greater_than(n);
            }
            if let Some(n) = number("greater_than_or_equal_to")? {
                validator = validator.greater_than_or_equal_to(n);
            }
            if let Some(n) = number("less_than")? {
                validator = validator.less_than(n);
            }
            if let Some(n) = number("less_than_or_equal_to")? {
                validator = validator.less_than_or_equal_to(n);
            }
            if let Some(n) = number("equal_to")? {
                validator = validator.equal_to(n);
            }
        }
        ValidatorOptions::Range { min, max } => {
            let (Some(min), Some(max)) = (min.as_f64(), max.as_f64()) else {
                return Err(invalid("numericality", "range bounds must be numbers"));
            };
            validator = validator
                .greater_than_or_equal_to(min)
                .less_than_or_equal_to(max);
        }
        ValidatorOptions::In(_) | ValidatorOptions::Disabled => {
            return Err(invalid("numericality", "expected true or named options"));
        }
    }
    Ok(Arc::new(validator))
}
