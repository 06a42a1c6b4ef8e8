//! Error types for the cadence-store crate.

use std::io;

use thiserror::Error;

use crate::UnitId;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Dispatch unit not found.
    #[error("Dispatch unit not found: {0}")]
    NotFound(UnitId),

    /// The unit has already been resolved and can no longer be edited.
    #[error("Dispatch unit {0} is no longer pending")]
    NotPending(UnitId),

    /// The store refused a new record.
    #[error("Store capacity exceeded: {used}/{capacity} units")]
    CapacityExceeded { used: usize, capacity: usize },

    /// Invalid store configuration.
    #[error("Invalid store configuration: {0}")]
    Configuration(String),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(e.into())
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(e.into())
    }
}
