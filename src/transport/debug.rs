use crate::circuit_breaker::RetryReason;
use http::header::AUTHORIZATION;
use http::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Opt-in request/response trace.
///
/// Writes the request line and non-authorization headers of every attempt
/// plus the status line of every response. Bodies are never written, and a
/// registered secret is masked wherever it appears in a line.
#[derive(Clone, Default)]
pub struct DebugTracer {
    sink: Option<Sink>,
    secret: Option<Arc<SecretString>>,
}

const REDACTED: &str = "[REDACTED]";

impl DebugTracer {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn stderr() -> Self {
        Self::to_writer(std::io::stderr())
    }

    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Some(Arc::new(Mutex::new(Box::new(writer)))),
            secret: None,
        }
    }

    /// Mask every occurrence of `secret` in the trace
    pub fn redacting(mut self, secret: SecretString) -> Self {
        if !secret.expose_secret().is_empty() {
            self.secret = Some(Arc::new(secret));
        }
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// `→ METHOD URL` followed by one line per header
    pub fn request(&self, request: &reqwest::Request) {
        if !self.is_enabled() {
            return;
        }

        let mut out = format!("→ {} {}\n", request.method(), request.url());
        for (name, value) in request.headers() {
            if name == AUTHORIZATION || value.is_sensitive() {
                continue;
            }
            let value = value.to_str().unwrap_or("<non-utf8>");
            out.push_str(&format!("  {}: {}\n", name, value));
        }
        self.write(&out);
    }

    /// `← CODE REASON`
    pub fn response(&self, status: StatusCode) {
        if !self.is_enabled() {
            return;
        }
        self.write(&format!(
            "← {} {}\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        ));
    }

    pub fn retry(&self, reason: RetryReason, attempt: u32, max: u32, delay: Duration) {
        if !self.is_enabled() {
            return;
        }
        let what = match reason {
            RetryReason::RateLimited => "rate limited",
            RetryReason::ServerError => "server error",
        };
        self.write(&format!(
            "  {}, retry {}/{} in {:?}\n",
            what, attempt, max, delay
        ));
    }

    fn write(&self, text: &str) {
        if let Some(sink) = &self.sink {
            let text = match &self.secret {
                Some(secret) => text.replace(secret.expose_secret().as_str(), REDACTED),
                None => text.to_string(),
            };
            let mut writer = sink.lock().unwrap_or_else(PoisonError::into_inner);
            // Diagnostics only; a broken stderr must not fail the request.
            let _ = writer.write_all(text.as_bytes());
            let _ = writer.flush();
        }
    }
}

impl fmt::Debug for DebugTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugTracer")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
