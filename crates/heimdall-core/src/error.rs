//! Error types for policy evaluation and enforcement.

use heimdall_proto::{Errors, Value};
use thiserror::Error;

/// A malformed rule block. Raised at evaluation time and never recovered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The rule block did not define the mandatory `fetch` scope.
    #[error("a fetch scope must be defined for '{entity}'")]
    MissingFetchScope {
        /// Entity whose rule block is incomplete.
        entity: String,
    },

    /// A validator name could not be resolved.
    #[error("unknown validator '{name}' on field '{field}'")]
    UnknownValidator {
        /// Validator name as written in the rule block.
        name: String,
        /// Field the validator was bound to.
        field: String,
    },

    /// Validator options could not be interpreted.
    #[error("invalid options for validator '{name}': {reason}")]
    InvalidValidatorOptions {
        /// Validator name.
        name: String,
        /// What was wrong with the options.
        reason: String,
    },
}

/// Errors reported by a storage host.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The host does not know the entity type.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// The host does not know the relation.
    #[error("unknown relation '{relation}' on '{entity}'")]
    UnknownRelation {
        /// Source entity.
        entity: String,
        /// Relation name.
        relation: String,
    },

    /// Stored data could not be decoded or is inconsistent.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Result type for storage host operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the enforcement layer.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The operation was attempted but the policy disallows it.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The policy layer cannot tell whether the operation is safe.
    #[error("insecure operation: {0}")]
    InsecureOperation(String),

    /// The rule block is malformed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A strict save failed validation.
    #[error("record invalid: {0}")]
    RecordInvalid(Errors),

    /// No visible record matched a lookup.
    #[error("couldn't find {entity} with {field} = {id}")]
    RecordNotFound {
        /// Entity type searched.
        entity: String,
        /// Lookup field.
        field: String,
        /// Lookup value.
        id: Value,
    },

    /// The requested operation does not exist on the entity.
    #[error("undefined method '{method}' for {entity}")]
    NoSuchMethod {
        /// Entity type.
        entity: String,
        /// Requested method name.
        method: String,
    },

    /// A proxy was re-restricted with a different context or options.
    #[error("{0} is already restricted with a different context or options")]
    AlreadyRestricted(String),

    /// The entity has no registered rule block.
    #[error("entity '{0}' has no registered policy")]
    Unregistered(String),

    /// The storage host failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl GuardError {
    /// Check whether this is a policy denial.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, GuardError::PermissionDenied(_))
    }

    /// Check whether this is an insecure-operation refusal.
    pub fn is_insecure_operation(&self) -> bool {
        matches!(self, GuardError::InsecureOperation(_))
    }
}

/// Result type for enforcement operations.
pub type GuardResult<T> = Result<T, GuardError>;
