//! Wire error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    #[error("Connect to {host}:{port} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout_ms: u64,
    },

    #[error("Message length {length} is out of range (0 - {max})")]
    FrameTooLarge { length: usize, max: usize },

    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Outbound queue closed")]
    QueueClosed,
}

pub type WireResult<T> = Result<T, WireError>;
