use super::expectation::{Expectation, MockResponse, Times};
use super::matcher::RequestMatcher;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};
use treblle_core::Payload;

type GenericError = Box<dyn std::error::Error + Send + Sync>;

/// Local stand-in for the Treblle collection endpoint.
///
/// Every request is recorded. Requests matching an expectation get its
/// response; everything else gets `200 OK` with an empty body.
pub struct MockCollector {
    addr: SocketAddr,
    state: Arc<Shared>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

struct Shared {
    state: Mutex<CollectorState>,
    arrived: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct CollectorState {
    expectations: Vec<Expectation>,
    received: Vec<RecordedRequest>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: http::Method,
    pub path: String,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn payload(&self) -> Option<Payload> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.headers
            .get(treblle_core::transport::API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
    }
}

impl MockCollector {
    /// Bind to a random local port and start serving.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(Shared {
            state: Mutex::new(CollectorState::default()),
            arrived: Notify::new(),
        });

        let state_clone = state.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let state = state_clone.clone();

                                tokio::spawn(async move {
                                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                                        .serve_connection(io, service_fn(move |req| handle_request(req, state.clone())))
                                        .await
                                    {
                                        tracing::debug!(error = %err, "mock collector connection closed");
                                    }
                                });
                            }
                            Err(err) => tracing::warn!(error = %err, "mock collector accept failed"),
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every request received so far, in arrival order.
    pub fn received(&self) -> Vec<RecordedRequest> {
        self.state.lock().received.clone()
    }

    /// Bodies of received requests that parse as SDK payloads.
    pub fn payloads(&self) -> Vec<Payload> {
        self.state
            .lock()
            .received
            .iter()
            .filter_map(RecordedRequest::payload)
            .collect()
    }

    /// Received requests that matched no expectation.
    pub fn unmatched_requests(&self) -> Vec<RecordedRequest> {
        let state = self.state.lock();
        state
            .received
            .iter()
            .filter(|r| {
                !state.expectations.iter().any(|e| {
                    e.matcher
                        .matches(&r.method, &r.path, &r.headers, &r.body)
                })
            })
            .cloned()
            .collect()
    }

    /// Wait until at least `n` requests have arrived. Returns `false` on
    /// timeout.
    pub async fn wait_for_requests(&self, n: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.state.arrived.notified();
                if self.state.lock().received.len() >= n {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    pub fn expect(&self, matcher: RequestMatcher) -> ExpectationBuilder {
        ExpectationBuilder {
            server: self.state.clone(),
            expectation: Some(Expectation::new(matcher)),
        }
    }

    /// Panic if any expectation was not met.
    pub fn verify(&self) {
        let state = self.state.lock();
        let failures: Vec<String> = state.expectations.iter().filter_map(Expectation::failure).collect();
        assert!(failures.is_empty(), "{}", failures.join("\n"));
    }
}

impl Drop for MockCollector {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Registers its expectation with the collector when dropped.
pub struct ExpectationBuilder {
    server: Arc<Shared>,
    expectation: Option<Expectation>,
}

impl ExpectationBuilder {
    fn update(mut self, f: impl FnOnce(&mut Expectation)) -> Self {
        if let Some(exp) = self.expectation.as_mut() {
            f(exp);
        }
        self
    }

    pub fn respond_with(self, response: MockResponse) -> Self {
        self.update(|e| e.response = response)
    }

    pub fn times(self, n: usize) -> Self {
        self.update(|e| e.times = Times::Exactly(n))
    }

    pub fn once(self) -> Self {
        self.times(1)
    }

    pub fn never(self) -> Self {
        self.times(0)
    }

    pub fn at_least_once(self) -> Self {
        self.update(|e| e.times = Times::AtLeast(1))
    }

    pub fn at_most(self, n: usize) -> Self {
        self.update(|e| e.times = Times::AtMost(n))
    }
}

impl Drop for ExpectationBuilder {
    fn drop(&mut self) {
        if let Some(exp) = self.expectation.take() {
            self.server.lock().expectations.push(exp);
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<Shared>,
) -> Result<Response<Full<Bytes>>, GenericError> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();

    let response = {
        let mut guard = state.lock();

        // Later expectations override earlier ones.
        let answer = guard
            .expectations
            .iter_mut()
            .rev()
            .find(|exp| {
                exp.matcher
                    .matches(&parts.method, parts.uri.path(), &parts.headers, &body)
            })
            .map(|exp| {
                exp.calls += 1;
                exp.response.clone()
            })
            .unwrap_or_default();

        guard.received.push(RecordedRequest {
            method: parts.method,
            path: parts.uri.path().to_string(),
            headers: parts.headers,
            body,
        });
        answer
    };
    state.arrived.notify_waiters();

    Ok(Response::builder()
        .status(response.status)
        .header("content-type", "application/json")
        .body(Full::new(response.body))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    async fn post(url: &str, key: &str, body: &'static str) -> reqwest::Response {
        reqwest::Client::new()
            .post(url)
            .header("x-api-key", key)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_records_and_defaults_to_ok() {
        let collector = MockCollector::start().await.unwrap();

        let resp = post(&collector.base_url(), "k1", r#"{"hello":"world"}"#).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let received = collector.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].api_key(), Some("k1"));
        assert_eq!(received[0].json().unwrap()["hello"], "world");
        assert_eq!(collector.unmatched_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_expectation_response_and_verify() {
        let collector = MockCollector::start().await.unwrap();
        collector
            .expect(RequestMatcher::new().api_key("good"))
            .respond_with(MockResponse::new().status(StatusCode::ACCEPTED))
            .once();
        collector
            .expect(RequestMatcher::new().api_key("bad"))
            .respond_with(MockResponse::new().status(StatusCode::UNAUTHORIZED))
            .never();

        let resp = post(&collector.base_url(), "good", "{}").await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        collector.verify();
        assert!(collector.unmatched_requests().is_empty());
    }

    #[tokio::test]
    #[should_panic(expected = "got 0")]
    async fn test_verify_panics_on_missing_call() {
        let collector = MockCollector::start().await.unwrap();
        collector.expect(RequestMatcher::new().path("/never")).once();
        collector.verify();
    }

    #[tokio::test]
    async fn test_wait_for_requests() {
        let collector = MockCollector::start().await.unwrap();
        assert!(!collector.wait_for_requests(1, Duration::from_millis(50)).await);

        let url = collector.base_url();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            post(&url, "k", "{}").await;
            post(&url, "k", "{}").await;
        });
        assert!(collector.wait_for_requests(2, Duration::from_secs(5)).await);
    }
}
