//! Error types for advanced filter operations.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Store not initialized at {0}")]
    NotInitialized(PathBuf),

    #[error("Store already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A dotted field path could not be followed on a model.
    #[error("{model} has no field named '{field}'")]
    FieldNotFound { model: String, field: String },

    /// A submitted filter row is malformed or names an unknown field.
    #[error("Invalid filter row {row}: {reason}")]
    InvalidFilterRow { row: usize, reason: String },

    /// Several rows failed validation; each entry is an `InvalidFilterRow`.
    #[error("{} invalid filter rows", .0.len())]
    InvalidFilterRows(Vec<Error>),

    /// A stored or transported query string could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The value handed to the encoder is not a well-formed expression tree.
    #[error("Serialization error: {0}")]
    SerializationType(String),
}

pub type Result<T> = std::result::Result<T, Error>;
