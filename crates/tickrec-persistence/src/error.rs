//! Persistence error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}: line {line}: {reason}")]
    Format {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("{path}: missing required field {field}")]
    MissingField { path: PathBuf, field: &'static str },

    #[error("{path}: token already loaded from another file")]
    DuplicateToken { path: PathBuf },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
