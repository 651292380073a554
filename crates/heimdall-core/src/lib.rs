//! Heimdall Core - Policy evaluation and enforcement proxies.
//!
//! Entity types are registered with a [`Guard`] together with a rule block.
//! For a security context (and optionally a sample record) the block is
//! compiled into a [`DecisionTable`]: field whitelists per action, create
//! fixtures, validators, and named query scopes.
//!
//! [`Guard::restrict`] hands out a [`CollectionProxy`] limited by the fetch
//! scope; the [`RecordProxy`] values it produces gate every field read, write,
//! save, delete and association traversal against that table.

pub mod config;
pub mod error;
pub mod guard;
pub mod model;
pub mod policy;
pub mod proxy;
pub mod store;
pub mod validation;

#[cfg(test)]
mod testing;

pub use config::{GuardConfig, Strategy};
pub use error::{ConfigError, GuardError, GuardResult, StoreError, StoreResult};
pub use guard::{Guard, GuardBuilder};
pub use model::Model;
pub use policy::{
    Action, DecisionTable, FieldGrant, IntoActions, IntoFieldGrants, Policy, RuleBlock, Rules,
    SecurityContext, DELETE, FETCH,
};
pub use proxy::{
    CollectionProxy, IncludeTree, ProxyOptions, RawRelated, RecordProxy, Related, SaveOptions,
};
pub use store::{fold_aggregate, preload, sort_and_page, Store};
pub use validation::{Validator, ValidatorCatalog, ValidatorFactory, ValidatorOptions};

/// Re-export boundary types.
pub use heimdall_proto as proto;
