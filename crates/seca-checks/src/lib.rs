//! Built-in checkers.
//!
//! Every checker here issues read-only network operations only: an HTTP
//! HEAD/GET observation and a bare TCP connect. Both honor the dispatcher's
//! cancellation context and classify transport failures into the result's
//! `error` field; receiving *any* HTTP response counts as a successful
//! observation, with the status code recorded for the report.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use seca_engine::{CheckContext, Checker};
use seca_proto::CheckResult;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!("seca/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ChecksError {
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Callback receiving `(target, headers, body)` for raw evidence capture.
pub type RawCaptureFn = Arc<dyn Fn(&str, &[(String, String)], &str) + Send + Sync>;

// ─── HTTP checker ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    Head,
    #[default]
    Get,
}

/// Read-only HTTP probe: records status code, `Server` header, and latency.
pub struct HttpChecker {
    client: reqwest::Client,
    method: HttpMethod,
    raw_capture: Option<RawCaptureFn>,
}

impl HttpChecker {
    pub fn new(method: HttpMethod) -> Result<Self, ChecksError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            method,
            raw_capture: None,
        })
    }

    /// Attach a raw-capture callback invoked with headers and body snippet
    /// of every response.
    pub fn with_raw_capture(mut self, capture: RawCaptureFn) -> Self {
        self.raw_capture = Some(capture);
        self
    }
}

#[async_trait]
impl Checker for HttpChecker {
    fn name(&self) -> &str {
        "http"
    }

    async fn check(&self, ctx: &CheckContext, target: &str) -> CheckResult {
        let started = Instant::now();
        let request = match self.method {
            HttpMethod::Head => self.client.head(target),
            HttpMethod::Get => self.client.get(target),
        }
        .timeout(ctx.timeout());

        let response = tokio::select! {
            _ = ctx.cancelled() => return CheckResult::error(target, ctx.abort_error()),
            response = request.send() => response,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                let headers: Vec<(String, String)> = response
                    .headers()
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.as_str().to_string(),
                            value.to_str().unwrap_or("<binary>").to_string(),
                        )
                    })
                    .collect();
                let server_header = headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("server"))
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default();

                // Body is only pulled when evidence capture asked for it.
                if let Some(capture) = &self.raw_capture {
                    let body = tokio::select! {
                        _ = ctx.cancelled() => String::new(),
                        body = response.text() => body.unwrap_or_default(),
                    };
                    capture(target, &headers, &body);
                }

                let mut result = CheckResult::ok(target);
                result.http_status = status;
                result.server_header = server_header;
                result.response_time_ms = elapsed_ms;
                if status >= 400 {
                    result.notes = format!("HTTP {status}");
                }
                debug!(url = target, status, elapsed_ms, "http check complete");
                result
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    "timeout".to_string()
                } else if e.is_connect() {
                    format!("connect: {e}")
                } else {
                    e.to_string()
                };
                let mut result = CheckResult::error(target, error);
                result.response_time_ms = elapsed_ms;
                result
            }
        }
    }
}

// ─── TCP connect checker ─────────────────────────────────────────────────────

/// Bare TCP reachability check against the target's host and port.
pub struct TcpChecker;

fn endpoint_of(target: &str) -> Option<(String, u16)> {
    let url = Url::parse(target).ok()?;
    let host = url.host_str()?.to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    Some((host, port))
}

#[async_trait]
impl Checker for TcpChecker {
    fn name(&self) -> &str {
        "network"
    }

    async fn check(&self, ctx: &CheckContext, target: &str) -> CheckResult {
        let Some((host, port)) = endpoint_of(target) else {
            return CheckResult::error(target, format!("no connectable endpoint in '{target}'"));
        };

        let started = Instant::now();
        let connect = tokio::net::TcpStream::connect((host.as_str(), port));
        let outcome = tokio::select! {
            _ = ctx.cancelled() => return CheckResult::error(target, ctx.abort_error()),
            outcome = connect => outcome,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(_stream) => {
                let mut result = CheckResult::ok(target);
                result.notes = format!("tcp connect {host}:{port}");
                result.response_time_ms = elapsed_ms;
                result
            }
            Err(e) => {
                let mut result = CheckResult::error(target, format!("connect: {e}"));
                result.response_time_ms = elapsed_ms;
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;

    fn ctx(timeout: Duration) -> CheckContext {
        let outer = CancellationToken::new();
        CheckContext::new(outer.child_token(), outer, timeout)
    }

    fn cancelled_ctx() -> CheckContext {
        let outer = CancellationToken::new();
        outer.cancel();
        CheckContext::new(outer.child_token(), outer, Duration::from_secs(1))
    }

    async fn one_shot_http_server(response: &'static str) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_http_checker_records_status_and_server() {
        let addr = one_shot_http_server(
            "HTTP/1.1 200 OK\r\nServer: testsrv\r\nContent-Length: 2\r\nConnection: close\r\n\r\nhi",
        )
        .await;
        let checker = HttpChecker::new(HttpMethod::Get).expect("client");
        let result = checker
            .check(&ctx(Duration::from_secs(2)), &format!("http://{addr}/"))
            .await;

        assert!(result.is_ok(), "error: {}", result.error);
        assert_eq!(result.http_status, 200);
        assert_eq!(result.server_header, "testsrv");
    }

    #[tokio::test]
    async fn test_http_checker_notes_client_errors_as_observed() {
        let addr = one_shot_http_server(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let checker = HttpChecker::new(HttpMethod::Get).expect("client");
        let result = checker
            .check(&ctx(Duration::from_secs(2)), &format!("http://{addr}/missing"))
            .await;

        assert!(result.is_ok());
        assert_eq!(result.http_status, 404);
        assert_eq!(result.notes, "HTTP 404");
    }

    #[tokio::test]
    async fn test_http_checker_raw_capture_sees_headers_and_body() {
        let addr = one_shot_http_server(
            "HTTP/1.1 200 OK\r\nServer: testsrv\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;

        let captured: Arc<std::sync::Mutex<Vec<(String, String)>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let capture: RawCaptureFn = {
            let captured = Arc::clone(&captured);
            Arc::new(move |target, headers, body| {
                assert!(headers.iter().any(|(name, _)| name == "server"));
                captured
                    .lock()
                    .expect("lock")
                    .push((target.to_string(), body.to_string()));
            })
        };

        let checker = HttpChecker::new(HttpMethod::Get)
            .expect("client")
            .with_raw_capture(capture);
        checker
            .check(&ctx(Duration::from_secs(2)), &format!("http://{addr}/"))
            .await;

        let captured = captured.lock().expect("lock");
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].1, "hello");
    }

    #[tokio::test]
    async fn test_http_checker_reports_connect_failure() {
        // Bind-then-drop gives a port with nothing listening.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            listener.local_addr().expect("addr")
        };
        let checker = HttpChecker::new(HttpMethod::Get).expect("client");
        let result = checker
            .check(&ctx(Duration::from_secs(2)), &format!("http://{addr}/"))
            .await;

        assert_eq!(result.status, "error");
        assert!(!result.error.is_empty());
    }

    #[tokio::test]
    async fn test_http_checker_cancelled_before_send() {
        let checker = HttpChecker::new(HttpMethod::Get).expect("client");
        let result = checker
            .check(&cancelled_ctx(), "http://192.0.2.1/")
            .await;
        assert_eq!(result.error, "cancelled");
    }

    #[tokio::test]
    async fn test_tcp_checker_connects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let _keep = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let result = TcpChecker
            .check(&ctx(Duration::from_secs(2)), &format!("http://{addr}/"))
            .await;
        assert!(result.is_ok(), "error: {}", result.error);
        assert!(result.notes.starts_with("tcp connect"));
    }

    #[tokio::test]
    async fn test_tcp_checker_connect_refused() {
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            listener.local_addr().expect("addr")
        };
        let result = TcpChecker
            .check(&ctx(Duration::from_secs(2)), &format!("http://{addr}/"))
            .await;
        assert_eq!(result.status, "error");
        assert!(result.error.starts_with("connect:"));
    }

    #[test]
    fn test_endpoint_defaults_follow_scheme() {
        assert_eq!(
            endpoint_of("https://x.test/"),
            Some(("x.test".to_string(), 443))
        );
        assert_eq!(
            endpoint_of("http://x.test:8080/a"),
            Some(("x.test".to_string(), 8080))
        );
        assert_eq!(endpoint_of("not a url"), None);
    }
}
