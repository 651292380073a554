//! Heimdall boundary types.
//!
//! This crate defines the data exchanged between the Heimdall policy layer
//! and a storage host: runtime values, filter expressions, the query IR,
//! records with change tracking, and entity/relation reflection.
//!
//! # Modules
//!
//! - [`value`] - Runtime value type
//! - [`filter`] - Filter expressions and in-memory evaluation
//! - [`query`] - Query IR (filters, ordering, pagination, includes)
//! - [`record`] - Records, change tracking and validation errors
//! - [`schema`] - Entity and relation definitions

pub mod filter;
pub mod query;
pub mod record;
pub mod schema;
pub mod value;

pub use filter::{like_match, FilterExpr};
pub use query::{AggregateFunction, Include, OrderDirection, OrderSpec, Query};
pub use record::{Errors, FieldError, Preloaded, Record};
pub use schema::{Cardinality, EntityDef, RelationDef, RelationFn, RelationSource, ScopeFn};
pub use value::Value;
