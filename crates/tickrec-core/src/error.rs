//! Error types for tickrec-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid account id: {0}")]
    InvalidAccountId(String),

    #[error("Invalid symbol id: {0}")]
    InvalidSymbolId(String),

    #[error("Invalid side: {0}")]
    InvalidSide(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
