//! Resilient HTTP transport.
//!
//! [`Transport::send`] runs one logical request: it fails fast while the
//! circuit breaker is open, injects the bearer token, and retries 429s
//! (any method) and 5xxs (idempotent methods only) with cancellable
//! backoff. Exhausted budgets hand the last response back unchanged.

pub mod debug;
pub mod request;

pub use debug::DebugTracer;
pub use request::{OutboundRequest, RequestBody};

use crate::circuit_breaker::{
    BreakerSignal, CircuitBreaker, CircuitBreakerConfig, Disposition, RetryContext, RetryPolicy,
};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use http::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Response, Url};
use secrecy::{ExposeSecret, SecretString};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Authenticated HTTP transport with retry and circuit breaking.
///
/// Cheap to clone; clones share one circuit breaker.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderValue,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    tracer: DebugTracer,
}

/// Builder for [`Transport`]
pub struct TransportBuilder {
    config: ClientConfig,
    clock: Option<Arc<dyn Clock>>,
    breaker: Option<Arc<CircuitBreaker>>,
    policy: RetryPolicy,
    debug_writer: Option<Box<dyn Write + Send>>,
}

impl TransportBuilder {
    /// Time source for backoff sleeps and, unless a breaker is supplied,
    /// for the circuit breaker
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Destination of the debug trace when `debug` is enabled (stderr otherwise)
    pub fn debug_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.debug_writer = Some(Box::new(writer));
        self
    }

    pub fn build(self) -> Result<Transport> {
        let mut auth_header =
            HeaderValue::from_str(&format!("Bearer {}", self.config.token.expose_secret()))
                .map_err(|_| {
                    ClientError::Config("API token contains invalid characters".to_string())
                })?;
        auth_header.set_sensitive(true);

        let client = reqwest::Client::builder()
            .timeout(self.config.timeout())
            .build()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let breaker = self.breaker.unwrap_or_else(|| {
            Arc::new(CircuitBreaker::with_clock(
                CircuitBreakerConfig::default(),
                clock.clone(),
            ))
        });

        let tracer = match (self.config.debug, self.debug_writer) {
            (false, _) => DebugTracer::disabled(),
            (true, Some(writer)) => DebugTracer::to_writer(writer),
            (true, None) => DebugTracer::stderr(),
        }
        .redacting(SecretString::new(
            self.config.token.expose_secret().to_string(),
        ));

        debug!(
            base_url = %self.config.base_url,
            timeout = ?self.config.timeout(),
            debug = self.config.debug,
            "Creating transport"
        );

        Ok(Transport {
            client,
            base_url: self.config.base_url,
            auth_header,
            breaker,
            clock,
            policy: self.policy,
            tracer,
        })
    }
}

impl Transport {
    pub fn builder(config: ClientConfig) -> TransportBuilder {
        TransportBuilder {
            config,
            clock: None,
            breaker: None,
            policy: RetryPolicy::default(),
            debug_writer: None,
        }
    }

    /// Transport with the system clock and default policy
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute one logical request.
    ///
    /// Returns the final response, which may still carry a non-2xx status
    /// once retry budgets are spent. Errors are transport failures,
    /// cancellation, an open circuit, or an unreplayable body.
    pub async fn send(
        &self,
        mut request: OutboundRequest,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        if self.breaker.is_open() {
            debug!(path = request.path(), "Circuit breaker open, failing fast");
            return Err(ClientError::CircuitOpen);
        }

        let url = self.url_for(request.path())?;
        let mut retry = RetryContext::new(&self.policy);
        let mut body = request.body_mut().regenerate()?;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            attempt += 1;
            let outgoing = self.build_attempt(&request, &url, body.take())?;
            self.tracer.request(&outgoing);
            debug!(method = %request.method(), url = %url, attempt, "Sending request");

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                result = self.client.execute(outgoing) => result?,
            };

            let status = response.status();
            self.tracer.response(status);

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let classification = retry.classify(request.method(), status, retry_after.as_deref());

            match classification.breaker {
                BreakerSignal::RecordSuccess => self.breaker.record_success(),
                BreakerSignal::RecordFailure => {
                    if self.breaker.record_failure() {
                        warn!(status = status.as_u16(), "Circuit breaker open");
                    }
                }
                BreakerSignal::Untouched => {}
            }

            match classification.disposition {
                Disposition::Success | Disposition::Terminal => {
                    debug!(status = status.as_u16(), attempt, "Request finished");
                    return Ok(response);
                }
                Disposition::Retry {
                    delay,
                    reason,
                    attempt: retry_attempt,
                    max,
                } => {
                    drop(response);
                    self.tracer.retry(reason, retry_attempt, max, delay);
                    debug!(
                        reason = ?reason,
                        retry = retry_attempt,
                        max,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying request"
                    );

                    body = request.body_mut().regenerate()?;
                    self.wait(delay, cancel).await?;
                }
            }
        }
    }

    /// Backoff sleep that gives up as soon as `cancel` fires
    async fn wait(&self, delay: Duration, cancel: &CancellationToken) -> Result<()> {
        if delay.is_zero() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Cancelled during backoff");
                Err(ClientError::Cancelled)
            }
            _ = self.clock.sleep(delay) => Ok(()),
        }
    }

    fn build_attempt(
        &self,
        request: &OutboundRequest,
        url: &Url,
        body: Option<reqwest::Body>,
    ) -> Result<reqwest::Request> {
        let mut headers = request.headers().clone();
        headers.insert(AUTHORIZATION, self.auth_header.clone());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = self
            .client
            .request(request.method().clone(), url.clone())
            .headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        builder
            .build()
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        let base = self.base_url.trim_end_matches('/');
        let joined = if path.is_empty() || path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        };

        Url::parse(&joined).map_err(|e| ClientError::InvalidRequest(format!("{}: {}", joined, e)))
    }
}
