use super::types::RetryPolicy;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use http::{Method, StatusCode};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for a single step of the 429 exponential fallback
const MAX_RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(60);

/// Why an attempt is being retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// 429 Too Many Requests
    RateLimited,
    /// 5xx on an idempotent method
    ServerError,
}

/// What the transport does after an attempt returned a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 2xx; hand the response back
    Success,
    /// Wait `delay`, then attempt again. `attempt` counts responses of this
    /// kind seen so far and `max` is the budget it is measured against.
    Retry {
        delay: Duration,
        reason: RetryReason,
        attempt: u32,
        max: u32,
    },
    /// Non-retryable status or exhausted budget; hand the response back
    Terminal,
}

/// Effect an attempt has on the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerSignal {
    RecordSuccess,
    RecordFailure,
    Untouched,
}

/// Outcome of classifying one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub disposition: Disposition,
    pub breaker: BreakerSignal,
}

/// Per-call retry bookkeeping.
///
/// Created at the start of a logical send and dropped when it completes;
/// never shared between calls.
pub struct RetryContext {
    policy: RetryPolicy,
    rate_limit_attempts: u32,
    server_error_attempts: u32,
    rate_limit_backoff: ExponentialBackoff,
}

impl RetryContext {
    pub fn new(policy: &RetryPolicy) -> Self {
        let rate_limit_backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(policy.rate_limit_base_delay)
            .with_randomization_factor(0.0)
            .with_multiplier(policy.rate_limit_multiplier)
            .with_max_interval(MAX_RATE_LIMIT_INTERVAL)
            .with_max_elapsed_time(None) // Budget is enforced by attempt count
            .build();

        Self {
            policy: policy.clone(),
            rate_limit_attempts: 0,
            server_error_attempts: 0,
            rate_limit_backoff,
        }
    }

    /// Decide what to do with a response and how it affects the breaker
    pub fn classify(
        &mut self,
        method: &Method,
        status: StatusCode,
        retry_after: Option<&str>,
    ) -> Classification {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return self.classify_rate_limited(retry_after);
        }

        if status.is_server_error() && is_idempotent(method) {
            return self.classify_server_error();
        }

        if status.is_success() {
            return Classification {
                disposition: Disposition::Success,
                breaker: BreakerSignal::RecordSuccess,
            };
        }

        Classification {
            disposition: Disposition::Terminal,
            breaker: BreakerSignal::Untouched,
        }
    }

    fn classify_rate_limited(&mut self, retry_after: Option<&str>) -> Classification {
        self.rate_limit_attempts += 1;
        // Advanced on every 429 so the exponent follows the attempt number.
        let fallback = self
            .rate_limit_backoff
            .next_backoff()
            .unwrap_or(self.policy.rate_limit_base_delay);

        if self.rate_limit_attempts >= self.policy.max_rate_limit_retries {
            warn!(
                attempts = self.rate_limit_attempts,
                "Rate limit retries exhausted"
            );
            return Classification {
                disposition: Disposition::Terminal,
                breaker: BreakerSignal::Untouched,
            };
        }

        let delay = retry_after.and_then(parse_retry_after).unwrap_or(fallback);
        debug!(
            attempt = self.rate_limit_attempts,
            delay_ms = delay.as_millis() as u64,
            "Rate limited, scheduling retry"
        );

        Classification {
            disposition: Disposition::Retry {
                delay,
                reason: RetryReason::RateLimited,
                attempt: self.rate_limit_attempts,
                max: self.policy.max_rate_limit_retries,
            },
            breaker: BreakerSignal::Untouched,
        }
    }

    fn classify_server_error(&mut self) -> Classification {
        self.server_error_attempts += 1;

        if self.server_error_attempts > self.policy.max_server_error_retries {
            warn!(
                attempts = self.server_error_attempts,
                "Server error retries exhausted"
            );
            return Classification {
                disposition: Disposition::Terminal,
                breaker: BreakerSignal::RecordFailure,
            };
        }

        Classification {
            disposition: Disposition::Retry {
                delay: self.policy.server_error_retry_delay,
                reason: RetryReason::ServerError,
                attempt: self.server_error_attempts,
                max: self.policy.max_server_error_retries,
            },
            breaker: BreakerSignal::RecordFailure,
        }
    }

    pub fn rate_limit_attempts(&self) -> u32 {
        self.rate_limit_attempts
    }

    pub fn server_error_attempts(&self) -> u32 {
        self.server_error_attempts
    }
}

impl fmt::Debug for RetryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryContext")
            .field("rate_limit_attempts", &self.rate_limit_attempts)
            .field("server_error_attempts", &self.server_error_attempts)
            .finish()
    }
}

/// GET, HEAD, OPTIONS, DELETE and PUT may be repeated safely
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::DELETE | Method::PUT
    )
}

/// Parse a `Retry-After` value given in whole seconds.
///
/// Negative values mean "retry now". HTTP-date values are not supported.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: i64 = value.parse().ok()?;
    Some(Duration::from_secs(seconds.max(0) as u64))
}
