use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitSnapshot, CircuitState};
use crate::clock::{Clock, SystemClock};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Consecutive-failure circuit breaker with lazy timed reset.
///
/// A single lock guards the whole state; every operation holds it only for
/// the state check or mutation, never across I/O.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Configuration
    config: CircuitBreakerConfig,
    /// Current state
    state: Mutex<State>,
    /// Time source for failure stamps and the reset timeout
    clock: Arc<dyn Clock>,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Failures since the last success or reset
    failure_count: u32,
    /// Time of the most recent failure
    last_failure: Option<Instant>,
    /// Metrics
    metrics: CircuitBreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker on the system clock
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a new circuit breaker on the given clock
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        debug!(
            failure_threshold = config.failure_threshold,
            reset_timeout = ?config.reset_timeout,
            "Creating circuit breaker"
        );

        Self {
            config,
            state: Mutex::new(State {
                circuit_state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                metrics: CircuitBreakerMetrics::default(),
            }),
            clock,
        }
    }

    /// Reset the failure count and close the circuit
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.metrics.successes += 1;

        if state.circuit_state == CircuitState::Open {
            info!("Circuit breaker closing after success");
        }
        state.failure_count = 0;
        state.circuit_state = CircuitState::Closed;
    }

    /// Record a failure. Returns true when this call reached the threshold.
    ///
    /// Recording while already open keeps counting and re-stamps the failure
    /// time, which extends the open window.
    pub fn record_failure(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        state.metrics.failures += 1;
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure = Some(now);

        debug!(
            failure_count = state.failure_count,
            threshold = self.config.failure_threshold,
            "Recording failure"
        );

        if state.failure_count >= self.config.failure_threshold {
            if state.circuit_state == CircuitState::Closed {
                info!(
                    failure_count = state.failure_count,
                    "Circuit breaker opening"
                );
                state.metrics.circuit_opened_count += 1;
            }
            state.circuit_state = CircuitState::Open;
            return true;
        }
        false
    }

    /// Whether requests should fail fast.
    ///
    /// An open circuit whose last failure is older than the reset timeout
    /// is closed here with its failure count cleared.
    pub fn is_open(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();

        if state.circuit_state == CircuitState::Closed {
            return false;
        }

        let expired = match state.last_failure {
            Some(last) => now.saturating_duration_since(last) > self.config.reset_timeout,
            None => {
                warn!("Circuit open but no failure timestamp");
                true
            }
        };

        if expired {
            info!(reset_timeout = ?self.config.reset_timeout, "Circuit breaker reset");
            state.circuit_state = CircuitState::Closed;
            state.failure_count = 0;
            state.metrics.circuit_reset_count += 1;
            return false;
        }

        true
    }

    /// Current state without applying the reset timeout
    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.lock();
        CircuitSnapshot {
            state: state.circuit_state,
            failure_count: state.failure_count,
            last_failure: state.last_failure,
        }
    }

    /// Get metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.lock().metrics.clone()
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
