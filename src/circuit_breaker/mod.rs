pub mod breaker;
pub mod retry;
pub mod types;

pub use breaker::CircuitBreaker;
pub use retry::{
    is_idempotent, parse_retry_after, BreakerSignal, Classification, Disposition, RetryContext,
    RetryReason,
};
pub use types::{
    CircuitBreakerConfig, CircuitBreakerMetrics, CircuitSnapshot, CircuitState, RetryPolicy,
};
