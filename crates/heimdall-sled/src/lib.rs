//! Heimdall Sled - Embedded storage host.
//!
//! A [`Store`](heimdall_core::Store) implementation over sled, for embedders
//! without their own data layer and for exercising policies end to end.

pub mod config;
pub mod error;
pub mod store;

pub use config::SledConfig;
pub use error::{SledError, SledResult};
pub use store::SledStore;
