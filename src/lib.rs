pub mod api_error;
pub mod circuit_breaker;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod observability;
pub mod transport;

pub use client::{ApiResponse, BeeperClient};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use transport::{OutboundRequest, RequestBody, Transport};

/// Re-exported so callers can cancel in-flight requests
pub use tokio_util::sync::CancellationToken;
