//! Crate-wide error type.
//!
//! Mirrors the recovery policy in the design doc: per-record and per-chunk
//! integrity problems (duplicate ids, missing tokens, counter drift) are
//! handled locally and never reach here. Only configuration and storage
//! failures propagate to callers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot reconfigure an existing store: {0}")]
    ConfigConflict(String),

    #[error("record is missing the configured id column '{0}'")]
    MissingIdColumn(String),

    #[error("column name '{0}' is not a valid SQL identifier")]
    InvalidColumnName(String),

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
