use std::time::{Duration, Instant};

/// Maximum attempts for a logical request that keeps getting 429
pub const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// First delay of the rate-limit exponential backoff
pub const RATE_LIMIT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Maximum retries for a 5xx on an idempotent request
pub const MAX_SERVER_ERROR_RETRIES: u32 = 1;

/// Fixed delay before retrying a 5xx
pub const SERVER_ERROR_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Consecutive failures that open the circuit
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

/// How long an open circuit stays open after the last failure
pub const CIRCUIT_BREAKER_RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests fail fast
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time after the last failure before an open circuit resets
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: CIRCUIT_BREAKER_THRESHOLD,
            reset_timeout: CIRCUIT_BREAKER_RESET_TIMEOUT,
        }
    }
}

/// Retry budgets and delays applied by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed while the server answers 429
    pub max_rate_limit_retries: u32,
    /// Initial delay for the 429 exponential fallback
    pub rate_limit_base_delay: Duration,
    /// Multiplier for the 429 exponential fallback
    pub rate_limit_multiplier: f64,
    /// Retries allowed for a 5xx on an idempotent method
    pub max_server_error_retries: u32,
    /// Delay before a 5xx retry
    pub server_error_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: MAX_RATE_LIMIT_RETRIES,
            rate_limit_base_delay: RATE_LIMIT_BASE_DELAY,
            rate_limit_multiplier: 2.0,
            max_server_error_retries: MAX_SERVER_ERROR_RETRIES,
            server_error_retry_delay: SERVER_ERROR_RETRY_DELAY,
        }
    }
}

/// Point-in-time view of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}

/// Circuit breaker counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    /// Number of recorded successes
    pub successes: u64,
    /// Number of recorded failures
    pub failures: u64,
    /// Number of closed-to-open transitions
    pub circuit_opened_count: u64,
    /// Number of lazy resets after the reset timeout
    pub circuit_reset_count: u64,
}
