//! Error types for shardkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Topology errors ===
    #[error("Server already registered: {0}")]
    ServerExists(u32),

    #[error("Server not registered: {0}")]
    ServerUnknown(u32),

    #[error("Shard not found: {0}")]
    ShardNotFound(u32),

    #[error("Invalid shard count: {0}")]
    InvalidShardCount(u32),

    // === Node state machine errors ===
    #[error("Invalid state transition: {0}")]
    StateTransition(String),

    #[error("Node is dead")]
    NodeDead,

    // === Protocol errors ===
    #[error("Phase failed: {0}")]
    PhaseFailed(String),

    #[error("Staged storage missing: {0}")]
    StagedMissing(String),

    // === Network errors ===
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Discovery errors ===
    #[error("Service not registered: {0}")]
    NotRegistered(String),

    // === Routing errors ===
    #[error("No server found for key: {0}")]
    NoServerForKey(String),

    #[error("Retries exhausted: {0}")]
    RetriesExhausted(String),

    // === Config errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::NotRegistered(_)
                | Error::Http(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::ServerExists(_) | Error::ServerUnknown(_) | Error::InvalidShardCount(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::ShardNotFound(_) | Error::NotRegistered(_) | Error::NoServerForKey(_) => {
                StatusCode::NOT_FOUND
            }
            Error::StateTransition(_) | Error::NodeDead => StatusCode::CONFLICT,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
