//! Error types for keypoint motion operations.
//!
//! Only conditions a caller must act on are errors. Interactive-analysis
//! misses (an absent keypoint, an empty time window, an unknown
//! normalization code) are logged and degrade to empty or passthrough
//! results instead.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A named column does not exist in the table.
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Input validation errors.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Two inputs that must line up have different lengths.
    #[error("Length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Not enough complete rows for the requested computation.
    #[error("Too few rows: need at least {min}, got {actual}")]
    TooFewRows { min: usize, actual: usize },

    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Linear algebra computation failed.
    #[error("Linear algebra error: {0}")]
    Linalg(String),

    /// A derived column name does not follow the `op(a-b,a-c)` contract.
    #[error("Invalid column name: {0}")]
    InvalidColumnName(String),

    /// A long-running computation was cancelled through its token.
    #[error("Computation cancelled")]
    Cancelled,

    /// Reading or writing an artifact failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An artifact could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Create a column not found error.
    #[must_use]
    pub fn column_not_found(name: impl Into<String>) -> Self {
        Self::ColumnNotFound(name.into())
    }

    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a length mismatch error.
    #[must_use]
    pub const fn length_mismatch(expected: usize, actual: usize) -> Self {
        Self::LengthMismatch { expected, actual }
    }

    /// Create a too-few-rows error.
    #[must_use]
    pub const fn too_few_rows(min: usize, actual: usize) -> Self {
        Self::TooFewRows { min, actual }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a linear algebra error.
    #[must_use]
    pub fn linalg(msg: impl Into<String>) -> Self {
        Self::Linalg(msg.into())
    }

    /// Create an invalid column name error.
    #[must_use]
    pub fn invalid_column_name(name: impl Into<String>) -> Self {
        Self::InvalidColumnName(name.into())
    }

    /// Wrap an I/O error with the path it happened on.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
