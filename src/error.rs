//! Error types for the snapdex catalog

use thiserror::Error;

use crate::hash::ContentHash;
use crate::store::ContentRecord;

/// Result type alias for snapdex operations
pub type Result<T> = std::result::Result<T, SnapdexError>;

/// Error types that can occur in snapdex operations
#[derive(Error, Debug)]
pub enum SnapdexError {
    /// The embedding provider failed to produce a caption or embedding.
    #[error("Provider error: {0}")]
    Provider(String),

    /// A record with this content hash already exists with an embedding.
    #[error("Duplicate record: {id}")]
    DuplicateKey { id: ContentHash },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The record is stored but could not be indexed (or is missing from
    /// the index). The stored record travels with the error so callers can
    /// still use its caption; a rebuild repairs the index.
    #[error("Index out of sync for {}: {detail}", record.id)]
    IndexSync {
        record: Box<ContentRecord>,
        detail: String,
    },

    #[error("Record not found: {id}")]
    NotFound { id: ContentHash },

    #[error("Not a valid content hash: {value}")]
    InvalidHash { value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
