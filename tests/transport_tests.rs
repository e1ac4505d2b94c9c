use beeper_cli::api_error::friendly_transport_error;
use beeper_cli::circuit_breaker::{CircuitBreaker, CircuitState};
use beeper_cli::clock::{Clock, ManualClock};
use beeper_cli::transport::{OutboundRequest, RequestBody, Transport};
use beeper_cli::{ClientConfig, ClientError};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const TOKEN: &str = "test-token";

/// Responds with `first` for the first `n` requests and `then` afterwards
struct Sequence {
    calls: AtomicUsize,
    n: usize,
    first: ResponseTemplate,
    then: ResponseTemplate,
}

impl Sequence {
    fn new(n: usize, first: ResponseTemplate, then: ResponseTemplate) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            n,
            first,
            then,
        }
    }
}

impl Respond for Sequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.n {
            self.first.clone()
        } else {
            self.then.clone()
        }
    }
}

/// Always answers 500 and notes the breaker state as each attempt arrives
struct StateRecorder {
    breaker: Arc<CircuitBreaker>,
    seen: Arc<Mutex<Vec<CircuitState>>>,
}

impl Respond for StateRecorder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.seen
            .lock()
            .unwrap()
            .push(self.breaker.snapshot().state);
        ResponseTemplate::new(500)
    }
}

#[derive(Clone, Default)]
struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedOutput {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(TOKEN).with_base_url(server.uri())
}

/// Transport on a virtual clock so backoff never really sleeps
fn manual_transport(server: &MockServer) -> (Transport, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let transport = Transport::builder(config(server))
        .clock(clock.clone())
        .build()
        .unwrap();
    (transport, clock)
}

async fn attempts(server: &MockServer) -> usize {
    server.received_requests().await.unwrap().len()
}

#[tokio::test]
async fn test_injects_auth_and_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/accounts"))
        .and(header("authorization", "Bearer test-token"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"accounts": []})))
        .expect(1)
        .mount(&server)
        .await;

    let (transport, _clock) = manual_transport(&server);
    let response = transport
        .send(OutboundRequest::get("/v1/accounts"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_rate_limit_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(Sequence::new(
            2,
            ResponseTemplate::new(429).insert_header("Retry-After", "0"),
            ResponseTemplate::new(200).set_body_string(r#"{"status":"ok"}"#),
        ))
        .mount(&server)
        .await;

    let (transport, clock) = manual_transport(&server);
    let response = transport
        .send(OutboundRequest::get("/test"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(attempts(&server).await, 3);
    // Retry-After: 0 means no sleep at all
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_rate_limit_exhausted_returns_last_429() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .mount(&server)
        .await;

    let (transport, _clock) = manual_transport(&server);
    let response = transport
        .send(OutboundRequest::get("/test"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 429);
    assert_eq!(attempts(&server).await, 3);
}

#[tokio::test]
async fn test_rate_limit_exponential_backoff_without_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let (transport, clock) = manual_transport(&server);
    let response = transport
        .send(
            OutboundRequest::post("/v1/messages").with_body(r#"{"text":"hi"}"#),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 429);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after_seconds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(Sequence::new(
            1,
            ResponseTemplate::new(429).insert_header("Retry-After", "7"),
            ResponseTemplate::new(204),
        ))
        .mount(&server)
        .await;

    let (transport, clock) = manual_transport(&server);
    let response = transport
        .send(OutboundRequest::get("/test"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 204);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(7)]);
}

#[tokio::test]
async fn test_retried_post_replays_identical_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(Sequence::new(
            1,
            ResponseTemplate::new(429).insert_header("Retry-After", "0"),
            ResponseTemplate::new(201),
        ))
        .mount(&server)
        .await;

    let (transport, _clock) = manual_transport(&server);
    let request = OutboundRequest::post("/v1/chats/123/messages")
        .with_json(&serde_json::json!({"text": "hello"}))
        .unwrap();
    let response = transport
        .send(request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].body, br#"{"text":"hello"}"#.to_vec());
    assert_eq!(received[1].body, received[0].body);
}

#[tokio::test]
async fn test_one_shot_body_cannot_be_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .mount(&server)
        .await;

    let (transport, _clock) = manual_transport(&server);
    let stream = futures::stream::iter(vec![Ok::<_, std::io::Error>(bytes::Bytes::from_static(
        b"streamed",
    ))]);
    let request = OutboundRequest::post("/upload")
        .with_body(RequestBody::one_shot(reqwest::Body::wrap_stream(stream)));

    let err = transport
        .send(request, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::BodyReplay(_)), "got {:?}", err);
    assert_eq!(attempts(&server).await, 1);
}

#[tokio::test]
async fn test_server_error_retried_once_for_get() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (transport, clock) = manual_transport(&server);
    let response = transport
        .send(OutboundRequest::get("/test"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    assert_eq!(attempts(&server).await, 2);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
    // Both 500s count against the breaker
    assert_eq!(transport.circuit_breaker().snapshot().failure_count, 2);
}

#[tokio::test]
async fn test_server_error_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(Sequence::new(
            1,
            ResponseTemplate::new(503),
            ResponseTemplate::new(200),
        ))
        .mount(&server)
        .await;

    let (transport, _clock) = manual_transport(&server);
    let response = transport
        .send(OutboundRequest::delete("/v1/reminders/1"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(attempts(&server).await, 2);
    // The success after the failure closes the books
    assert_eq!(transport.circuit_breaker().snapshot().failure_count, 0);
}

#[tokio::test]
async fn test_server_error_not_retried_for_post() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (transport, clock) = manual_transport(&server);
    let request = OutboundRequest::post("/test")
        .with_json(&serde_json::json!({"key": "value"}))
        .unwrap();
    let response = transport
        .send(request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    assert_eq!(attempts(&server).await, 1);
    assert!(clock.sleeps().is_empty());
    assert_eq!(transport.circuit_breaker().snapshot().failure_count, 0);
}

#[tokio::test]
async fn test_client_errors_returned_without_retry_or_breaker_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (transport, _clock) = manual_transport(&server);
    transport.circuit_breaker().record_failure();

    let response = transport
        .send(OutboundRequest::get("/v1/chats/missing"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(attempts(&server).await, 1);
    assert_eq!(transport.circuit_breaker().snapshot().failure_count, 1);
}

#[tokio::test]
async fn test_cancellation_during_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "10"))
        .mount(&server)
        .await;

    // Real clock: the 10s backoff must be cut short by the cancel
    let transport = Transport::new(config(&server)).unwrap();
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = transport
        .send(OutboundRequest::get("/test"), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Cancelled), "got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(attempts(&server).await, 1);
}

#[tokio::test]
async fn test_cancellation_during_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let transport = Transport::new(config(&server)).unwrap();
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = transport
        .send(OutboundRequest::get("/slow"), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Cancelled), "got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(transport.circuit_breaker().snapshot().failure_count, 0);
}

#[tokio::test]
async fn test_attempt_timeout_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::new());
    let transport = Transport::builder(config(&server).with_timeout_secs(1))
        .clock(clock.clone())
        .build()
        .unwrap();

    let err = transport
        .send(OutboundRequest::get("/slow"), &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        ClientError::Transport(e) => assert!(e.is_timeout(), "got {:?}", e),
        other => panic!("expected transport error, got {:?}", other),
    }
    assert!(!err.is_connection_refused());
    assert_eq!(attempts(&server).await, 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_circuit_opens_and_fails_fast() {
    let server = MockServer::start().await;
    let (transport, _clock) = manual_transport(&server);
    let seen = Arc::new(Mutex::new(Vec::new()));
    Mock::given(method("GET"))
        .respond_with(StateRecorder {
            breaker: transport.circuit_breaker().clone(),
            seen: seen.clone(),
        })
        .mount(&server)
        .await;

    // Each GET makes two attempts and records two failures
    for expected_failures in [2, 4] {
        let _ = transport
            .send(OutboundRequest::get("/test"), &CancellationToken::new())
            .await;
        let snapshot = transport.circuit_breaker().snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, expected_failures);
    }
    assert_eq!(attempts(&server).await, 4);

    // The 5th failure opens it; the in-flight retry still goes out
    let _ = transport
        .send(OutboundRequest::get("/test"), &CancellationToken::new())
        .await;
    assert_eq!(attempts(&server).await, 6);
    assert_eq!(
        transport.circuit_breaker().snapshot().state,
        CircuitState::Open
    );
    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            CircuitState::Closed,
            CircuitState::Closed,
            CircuitState::Closed,
            CircuitState::Closed,
            CircuitState::Closed,
            CircuitState::Open,
        ]
    );

    let err = transport
        .send(OutboundRequest::get("/test"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::CircuitOpen));
    assert_eq!(
        err.to_string(),
        "circuit breaker open: API experiencing issues, retry later"
    );
    assert_eq!(attempts(&server).await, 6);
}

#[tokio::test]
async fn test_circuit_recovers_after_reset_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(Sequence::new(
            6,
            ResponseTemplate::new(500),
            ResponseTemplate::new(200),
        ))
        .mount(&server)
        .await;

    let (transport, clock) = manual_transport(&server);
    for _ in 0..3 {
        let _ = transport
            .send(OutboundRequest::get("/test"), &CancellationToken::new())
            .await;
    }
    assert!(transport.circuit_breaker().is_open());

    clock.advance(Duration::from_secs(31));

    let response = transport
        .send(OutboundRequest::get("/test"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(!transport.circuit_breaker().is_open());
}

#[tokio::test]
async fn test_shared_breaker_across_clones() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let (transport, _clock) = manual_transport(&server);
    let other = transport.clone();
    for _ in 0..3 {
        let _ = other
            .send(OutboundRequest::get("/test"), &CancellationToken::new())
            .await;
    }

    let err = transport
        .send(OutboundRequest::get("/test"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_retry_later());
}

#[tokio::test]
async fn test_concurrent_sends() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (transport, _clock) = manual_transport(&server);
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .send(
                        OutboundRequest::get(format!("/v1/chats/{}", i)),
                        &CancellationToken::new(),
                    )
                    .await
                    .map(|r| r.status())
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 200);
    }
    assert_eq!(attempts(&server).await, 8);
    assert!(!transport.circuit_breaker().is_open());
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // Grab a free port, then close the listener so nothing is there
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let clock = Arc::new(ManualClock::new());
    let transport = Transport::builder(
        ClientConfig::new(TOKEN).with_base_url(format!("http://127.0.0.1:{}", port)),
    )
    .clock(clock.clone())
    .build()
    .unwrap();

    let err = transport
        .send(OutboundRequest::get("/v1/accounts"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Transport(_)), "got {:?}", err);
    assert!(err.is_connection_refused());
    assert!(friendly_transport_error(&err).starts_with("Beeper Desktop not running"));
    assert!(clock.sleeps().is_empty());
    assert_eq!(transport.circuit_breaker().snapshot().failure_count, 0);
}

#[tokio::test]
async fn test_unresolvable_host_is_not_connection_refused() {
    let transport = Transport::builder(
        ClientConfig::new(TOKEN).with_base_url("http://no-such-host.invalid:23373"),
    )
    .clock(Arc::new(ManualClock::new()))
    .build()
    .unwrap();

    let err = transport
        .send(OutboundRequest::get("/v1/accounts"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Transport(_)), "got {:?}", err);
    assert!(!err.is_connection_refused());
    assert!(!friendly_transport_error(&err).contains("Beeper Desktop not running"));
}

#[tokio::test]
async fn test_debug_trace_never_contains_token() {
    let server = MockServer::start().await;
    // The server echoes the token back; the trace must still not show it
    Mock::given(method("GET"))
        .respond_with(Sequence::new(
            1,
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .set_body_string(TOKEN),
            ResponseTemplate::new(200)
                .insert_header("x-echo", TOKEN)
                .set_body_string(format!(r#"{{"token":"{}"}}"#, TOKEN)),
        ))
        .mount(&server)
        .await;

    let output = CapturedOutput::default();
    let transport = Transport::builder(config(&server).with_debug(true))
        .clock(Arc::new(ManualClock::new()))
        .debug_writer(output.clone())
        .build()
        .unwrap();

    let response = transport
        .send(OutboundRequest::get("/test"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let trace = output.contents();
    assert!(trace.contains(&format!("→ GET {}/test", server.uri())));
    assert!(trace.contains("  content-type: application/json"));
    assert!(trace.contains("← 429 Too Many Requests"));
    assert!(trace.contains("  rate limited, retry 1/3 in 0ns"));
    assert!(trace.contains("← 200 OK"));
    assert!(!trace.contains(TOKEN));
}

#[tokio::test]
async fn test_debug_trace_masks_token_in_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let output = CapturedOutput::default();
    let transport = Transport::builder(config(&server).with_debug(true))
        .clock(Arc::new(ManualClock::new()))
        .debug_writer(output.clone())
        .build()
        .unwrap();

    transport
        .send(
            OutboundRequest::get(format!("/v1/search?q={}", TOKEN)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let trace = output.contents();
    assert!(trace.contains(&format!("→ GET {}/v1/search?q=[REDACTED]", server.uri())));
    assert!(!trace.contains(TOKEN));
}

#[tokio::test]
async fn test_debug_disabled_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let output = CapturedOutput::default();
    let transport = Transport::builder(config(&server))
        .debug_writer(output.clone())
        .build()
        .unwrap();

    transport
        .send(OutboundRequest::get("/test"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(output.contents().is_empty());
}

#[tokio::test]
async fn test_manual_clock_is_shared_with_breaker() {
    let clock = Arc::new(ManualClock::new());
    let server = MockServer::start().await;
    let transport = Transport::builder(config(&server))
        .clock(clock.clone())
        .build()
        .unwrap();

    transport.circuit_breaker().record_failure();
    let stamped = transport.circuit_breaker().snapshot().last_failure;
    assert_eq!(stamped, Some(clock.now()));
}
