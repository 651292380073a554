//! Sled host errors.

use heimdall_core::StoreError;
use thiserror::Error;

/// Errors raised by the sled storage host.
#[derive(Debug, Error)]
pub enum SledError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key decoding error.
    #[error("invalid key format")]
    InvalidKey,
}

/// Result type for sled host operations.
pub type SledResult<T> = Result<T, SledError>;

impl From<SledError> for StoreError {
    fn from(err: SledError) -> Self {
        StoreError::Backend(Box::new(err))
    }
}
