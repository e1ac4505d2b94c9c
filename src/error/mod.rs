use crate::api_error::ApiError;
use std::error::Error as _;
use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    /// The circuit breaker is open; no network call was made
    #[error("circuit breaker open: API experiencing issues, retry later")]
    CircuitOpen,

    /// The caller cancelled the call, possibly mid-backoff
    #[error("request cancelled")]
    Cancelled,

    /// The request body could not be regenerated for a retry attempt
    #[error("failed to replay request body: {0}")]
    BodyReplay(String),

    /// Network-level failure (connection refused, DNS, I/O, timeout)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ClientError {
    /// Whether the caller should treat this as "temporarily unavailable"
    pub fn is_retry_later(&self) -> bool {
        matches!(self, ClientError::CircuitOpen)
    }

    /// Whether the underlying failure was a refused connection.
    ///
    /// DNS failures and connect timeouts are connect errors too, but not
    /// refusals, so only the io error kind or its message decides.
    pub fn is_connection_refused(&self) -> bool {
        match self {
            ClientError::Transport(e) => {
                let mut source = e.source();
                while let Some(err) = source {
                    if let Some(io) = err.downcast_ref::<std::io::Error>() {
                        if io.kind() == std::io::ErrorKind::ConnectionRefused {
                            return true;
                        }
                    }
                    source = err.source();
                }
                e.to_string().to_lowercase().contains("connection refused")
            }
            _ => false,
        }
    }
}

impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}
