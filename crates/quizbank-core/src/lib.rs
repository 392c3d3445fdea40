//! Quizbank Core Library
//!
//! Error taxonomy, configuration and the storage port traits every backend
//! adapter implements.

// Re-export record types
pub use quizbank_types::*;

pub mod config;
pub mod error;
pub mod ports;

pub use crate::config::{BackendConfig, BackendKind, CacheConfig};
pub use crate::error::{CacheError, ErrorKind};
pub use ports::StorageBackend;

/// Result type used across the storage layer.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
