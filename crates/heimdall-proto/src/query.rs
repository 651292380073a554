//! Query IR handed to the storage host.
//!
//! A [`Query`] is an immutable description of "which rows of which entity":
//! every refinement returns a new value, so named scopes can be expressed as
//! plain `Query -> Query` functions and composed freely.

use serde::{Deserialize, Serialize};

use crate::filter::FilterExpr;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

impl OrderDirection {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            OrderDirection::Asc => OrderDirection::Desc,
            OrderDirection::Desc => OrderDirection::Asc,
        }
    }
}

/// Order specification for sorting results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Field to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Create an ascending order spec.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order spec.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Aggregate function types for value-returning queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// Sum of numeric values.
    Sum,
    /// Average of numeric values.
    Avg,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
}

/// An eagerly loaded relation.
///
/// `filter` restricts which related rows are preloaded; nested includes load
/// relations of the related entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Include {
    /// Relation name on the parent entity.
    pub relation: String,
    /// Optional filter for the related rows.
    pub filter: Option<FilterExpr>,
    /// Relations to preload on the related rows.
    pub includes: Vec<Include>,
}

impl Include {
    /// Create a new include for a relation.
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            filter: None,
            includes: Vec::new(),
        }
    }

    /// Set a filter for this include.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add a nested include.
    pub fn with_include(mut self, include: Include) -> Self {
        self.includes.push(include);
        self
    }
}

/// A query against one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Entity type being queried.
    pub entity: String,
    /// Row filter; `None` means every row.
    pub filter: Option<FilterExpr>,
    /// Ordering specification.
    pub order_by: Vec<OrderSpec>,
    /// Maximum number of rows.
    pub limit: Option<u64>,
    /// Number of rows to skip.
    pub offset: Option<u64>,
    /// Eagerly loaded relations.
    pub includes: Vec<Include>,
}

impl Query {
    /// Create an unfiltered query for an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            includes: Vec::new(),
        }
    }

    /// Conjoin a filter onto the query.
    pub fn filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Shorthand for an equality filter.
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<crate::Value>) -> Self {
        self.filter(FilterExpr::eq(field, value))
    }

    /// Append an ordering.
    pub fn order_by(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Replace any existing ordering.
    pub fn reorder(mut self, order: OrderSpec) -> Self {
        self.order_by = vec![order];
        self
    }

    /// Flip every ordering direction.
    pub fn reverse_order(mut self) -> Self {
        for spec in &mut self.order_by {
            spec.direction = spec.direction.reverse();
        }
        self
    }

    /// Set a row limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set a row offset.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Add an include.
    pub fn include(mut self, include: Include) -> Self {
        self.includes.push(include);
        self
    }

    /// Drop all includes.
    pub fn without_includes(mut self) -> Self {
        self.includes.clear();
        self
    }

    /// The effective filter, `True` when unfiltered.
    pub fn predicate(&self) -> FilterExpr {
        self.filter.clone().unwrap_or(FilterExpr::True)
    }
}
