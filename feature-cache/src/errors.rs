//! Error and result types shared by every cache component.

use std::io;
use thiserror::Error;

/// Errors that can occur in feature cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// A single batch holds more features than the cache may ever hold.
    /// Never retried by the cache itself.
    #[error("Cache capacity exceeded: batch of {requested} features, capacity is {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    #[error("Feature source error: {0}")]
    SourceFetch(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Node store error: {0}")]
    Store(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, CacheError::CapacityExceeded { .. })
    }
}

impl From<bincode::error::EncodeError> for CacheError {
    fn from(err: bincode::error::EncodeError) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for CacheError {
    fn from(err: bincode::error::DecodeError) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
