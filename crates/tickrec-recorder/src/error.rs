//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wire error: {0}")]
    Wire(#[from] tickrec_wire::WireError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] tickrec_persistence::PersistenceError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tickrec_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No accounts found in {0}")]
    NoAccounts(String),

    #[error("Gave up reconnecting after {0} attempts")]
    ReconnectExhausted(u32),
}

pub type AppResult<T> = Result<T, AppError>;
