//! Filter expressions and their in-memory evaluation.
//!
//! Filters are plain data so that the policy layer can inspect them (for
//! example to pull a fetch predicate into an eager-loaded include) and the
//! storage host can execute them however it likes.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Filter expression over a single entity's attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterExpr {
    /// Always matches.
    True,
    /// Never matches.
    False,
    /// Field equals value.
    Eq { field: String, value: Value },
    /// Field not equals value.
    Ne { field: String, value: Value },
    /// Field less than value.
    Lt { field: String, value: Value },
    /// Field less than or equal to value.
    Le { field: String, value: Value },
    /// Field greater than value.
    Gt { field: String, value: Value },
    /// Field greater than or equal to value.
    Ge { field: String, value: Value },
    /// Field is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Field is not in a set of values.
    NotIn { field: String, values: Vec<Value> },
    /// Field is null or missing.
    IsNull { field: String },
    /// Field is present and not null.
    IsNotNull { field: String },
    /// Field matches a LIKE pattern.
    Like { field: String, pattern: String },
    /// Field does not match a LIKE pattern.
    NotLike { field: String, pattern: String },
    /// All conditions must hold.
    And(Vec<FilterExpr>),
    /// At least one condition must hold.
    Or(Vec<FilterExpr>),
    /// Negation.
    Not(Box<FilterExpr>),
}

impl FilterExpr {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than-or-equal filter.
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Le {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than-or-equal filter.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Ge {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an IN filter.
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        FilterExpr::In {
            field: field.into(),
            values,
        }
    }

    /// Create a NOT IN filter.
    pub fn not_in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        FilterExpr::NotIn {
            field: field.into(),
            values,
        }
    }

    /// Create an IS NULL filter.
    pub fn is_null(field: impl Into<String>) -> Self {
        FilterExpr::IsNull {
            field: field.into(),
        }
    }

    /// Create an IS NOT NULL filter.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        FilterExpr::IsNotNull {
            field: field.into(),
        }
    }

    /// Create a LIKE filter.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        FilterExpr::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Negate a filter.
    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: FilterExpr) -> Self {
        FilterExpr::Not(Box::new(expr))
    }

    /// Conjoin two filters, flattening nested `And`s and dropping `True`.
    pub fn and(self, other: FilterExpr) -> Self {
        match (self, other) {
            (FilterExpr::True, other) | (other, FilterExpr::True) => other,
            (FilterExpr::False, _) | (_, FilterExpr::False) => FilterExpr::False,
            (FilterExpr::And(mut left), FilterExpr::And(right)) => {
                left.extend(right);
                FilterExpr::And(left)
            }
            (FilterExpr::And(mut left), other) => {
                left.push(other);
                FilterExpr::And(left)
            }
            (this, FilterExpr::And(mut right)) => {
                right.insert(0, this);
                FilterExpr::And(right)
            }
            (this, other) => FilterExpr::And(vec![this, other]),
        }
    }

    /// Disjoin two filters.
    pub fn or(self, other: FilterExpr) -> Self {
        match (self, other) {
            (FilterExpr::False, other) | (other, FilterExpr::False) => other,
            (FilterExpr::True, _) | (_, FilterExpr::True) => FilterExpr::True,
            (FilterExpr::Or(mut left), other) => {
                left.push(other);
                FilterExpr::Or(left)
            }
            (this, other) => FilterExpr::Or(vec![this, other]),
        }
    }

    /// Equality conditions that every matching row must satisfy.
    ///
    /// Only top-level `Eq` terms and `Eq` terms of a top-level `And` count;
    /// anything under `Or`/`Not` is ignored.
    pub fn equalities(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        match self {
            FilterExpr::Eq { field, value } => {
                out.insert(field.clone(), value.clone());
            }
            FilterExpr::And(items) => {
                for item in items {
                    out.extend(item.equalities());
                }
            }
            _ => {}
        }
        out
    }

    /// All field names referenced by this filter.
    pub fn fields(&self) -> HashSet<String> {
        let mut fields = HashSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, fields: &mut HashSet<String>) {
        match self {
            FilterExpr::True | FilterExpr::False => {}
            FilterExpr::Eq { field, .. }
            | FilterExpr::Ne { field, .. }
            | FilterExpr::Lt { field, .. }
            | FilterExpr::Le { field, .. }
            | FilterExpr::Gt { field, .. }
            | FilterExpr::Ge { field, .. }
            | FilterExpr::In { field, .. }
            | FilterExpr::NotIn { field, .. }
            | FilterExpr::IsNull { field }
            | FilterExpr::IsNotNull { field }
            | FilterExpr::Like { field, .. }
            | FilterExpr::NotLike { field, .. } => {
                fields.insert(field.clone());
            }
            FilterExpr::And(items) | FilterExpr::Or(items) => {
                for item in items {
                    item.collect_fields(fields);
                }
            }
            FilterExpr::Not(inner) => inner.collect_fields(fields),
        }
    }

    /// Evaluate the filter against a row of attributes.
    pub fn matches(&self, row: &BTreeMap<String, Value>) -> bool {
        match self {
            FilterExpr::True => true,
            FilterExpr::False => false,
            FilterExpr::Eq { field, value } => {
                compare_field(row, field, |fv| fv.loose_eq(value))
            }
            FilterExpr::Ne { field, value } => {
                compare_field(row, field, |fv| !fv.loose_eq(value))
            }
            FilterExpr::Lt { field, value } => {
                compare_field(row, field, |fv| fv.compare(value).is_some_and(|o| o.is_lt()))
            }
            FilterExpr::Le { field, value } => {
                compare_field(row, field, |fv| fv.compare(value).is_some_and(|o| o.is_le()))
            }
            FilterExpr::Gt { field, value } => {
                compare_field(row, field, |fv| fv.compare(value).is_some_and(|o| o.is_gt()))
            }
            FilterExpr::Ge { field, value } => {
                compare_field(row, field, |fv| fv.compare(value).is_some_and(|o| o.is_ge()))
            }
            FilterExpr::In { field, values } => {
                compare_field(row, field, |fv| values.iter().any(|v| fv.loose_eq(v)))
            }
            FilterExpr::NotIn { field, values } => match present(row, field) {
                Some(fv) => !values.iter().any(|v| fv.loose_eq(v)),
                // NULL is not in any set
                None => true,
            },
            FilterExpr::IsNull { field } => present(row, field).is_none(),
            FilterExpr::IsNotNull { field } => present(row, field).is_some(),
            FilterExpr::Like { field, pattern } => match present(row, field) {
                Some(Value::String(s)) => like_match(s, pattern),
                _ => false,
            },
            FilterExpr::NotLike { field, pattern } => match present(row, field) {
                Some(Value::String(s)) => !like_match(s, pattern),
                _ => true,
            },
            FilterExpr::And(items) => items.iter().all(|f| f.matches(row)),
            FilterExpr::Or(items) => items.iter().any(|f| f.matches(row)),
            FilterExpr::Not(inner) => !inner.matches(row),
        }
    }
}

/// Non-null value of a field, if any.
fn present<'a>(row: &'a BTreeMap<String, Value>, field: &str) -> Option<&'a Value> {
    row.get(field).filter(|v| !v.is_null())
}

/// Missing and null fields never satisfy a comparison.
fn compare_field<F>(row: &BTreeMap<String, Value>, field: &str, comparator: F) -> bool
where
    F: FnOnce(&Value) -> bool,
{
    present(row, field).is_some_and(comparator)
}

/// Match a string against a SQL LIKE pattern.
///
/// `%` matches any run of characters, `_` exactly one, and a backslash
/// escapes the following character.
pub fn like_match(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_match_from(&value, &pattern)
}

fn like_match_from(value: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some(('%', rest)) => {
            if rest.is_empty() {
                return true;
            }
            (0..=value.len()).any(|skip| like_match_from(&value[skip..], rest))
        }
        Some(('_', rest)) => !value.is_empty() && like_match_from(&value[1..], rest),
        Some(('\\', rest)) => match (rest.split_first(), value.split_first()) {
            (Some((p, rest)), Some((c, tail))) if p == c => like_match_from(tail, rest),
            _ => false,
        },
        Some((p, rest)) => match value.split_first() {
            Some((c, tail)) if c == p => like_match_from(tail, rest),
            _ => false,
        },
    }
}
