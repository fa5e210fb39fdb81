//! Tower middleware capturing every request/response pair.
//!
//! Per request: gate on the environment, buffer and restore the request
//! body, call the inner service, buffer the response, capture both halves
//! and hand them to the delivery processor. The response returned to the
//! caller is rebuilt from the exact bytes the inner service produced.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::request::Parts;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body::Body;
use std::any::Any;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;
use treblle_core::route::resolve_route;
use treblle_core::{
    buffer_body, CapturedRequest, CapturedResponse, ErrorKind, RequestContext, Treblle,
    TreblleConfig,
};

const SOURCE: &str = "middleware";

/// Layer adding Treblle capture to a service.
///
/// ```ignore
/// let treblle = Treblle::new(TreblleConfig::from_env()?)?;
/// let app = Router::new()
///     .route("/users/{id}", get(show_user))
///     .layer(TreblleLayer::new(treblle.clone()));
/// ```
#[derive(Debug, Clone)]
pub struct TreblleLayer {
    treblle: Treblle,
}

impl TreblleLayer {
    pub fn new(treblle: Treblle) -> Self {
        Self { treblle }
    }

    /// Build the client from a configuration.
    pub fn from_config(config: TreblleConfig) -> treblle_core::Result<Self> {
        Treblle::new(config).map(Self::new)
    }

    pub fn client(&self) -> &Treblle {
        &self.treblle
    }
}

impl<S> Layer<S> for TreblleLayer {
    type Service = TreblleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TreblleService {
            inner,
            treblle: self.treblle.clone(),
        }
    }
}

/// Service produced by [`TreblleLayer`].
///
/// The response handed back is byte-identical to the inner service's, with
/// two exceptions. A handler panic is recorded and answered with an empty
/// `500`. A response body that errors while being buffered is forwarded
/// with its status and headers but an empty body, and the failure is logged.
#[derive(Debug, Clone)]
pub struct TreblleService<S> {
    inner: S,
    treblle: Treblle,
}

impl<S> TreblleService<S> {
    pub fn new(inner: S, treblle: Treblle) -> Self {
        Self { inner, treblle }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TreblleService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Body + From<Bytes> + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: Display,
    ResBody: Body + From<Bytes> + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Display,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let treblle = self.treblle.clone();

        if treblle.is_environment_ignored() {
            return Box::pin(inner.call(req));
        }

        Box::pin(async move {
            let ctx = RequestContext::new();
            let (mut parts, body) = req.into_parts();
            crate::route::annotate(&mut parts);

            let body = match buffer_body(body).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    ctx.errors().add(&err, ErrorKind::ServerError, "request_body");
                    Bytes::new()
                }
            };
            let request = capture_request(&treblle, &ctx, &parts, &body);
            let req = Request::from_parts(parts, ReqBody::from(body));

            let result = match AssertUnwindSafe(inner.call(req)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    ctx.errors().add_custom(
                        format!("panic recovered: {}", panic_message(panic.as_ref())),
                        ErrorKind::UnhandledException,
                        SOURCE,
                    );
                    let response = capture_response(
                        &treblle,
                        &ctx,
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &HeaderMap::new(),
                        &[],
                    );
                    treblle.dispatch(request, response);
                    let mut response = Response::new(ResBody::from(Bytes::new()));
                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    return Ok(response);
                }
            };

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    ctx.errors().add_custom(
                        "inner service returned an error",
                        ErrorKind::ServerError,
                        SOURCE,
                    );
                    let response = capture_response(
                        &treblle,
                        &ctx,
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &HeaderMap::new(),
                        &[],
                    );
                    treblle.dispatch(request, response);
                    return Err(err);
                }
            };

            let (parts, body) = response.into_parts();
            let body = match buffer_body(body).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(
                        error = %err,
                        status = parts.status.as_u16(),
                        "Response body failed mid-stream, forwarding an empty body"
                    );
                    ctx.errors().add(&err, ErrorKind::ServerError, "response_body");
                    Bytes::new()
                }
            };
            let captured = capture_response(&treblle, &ctx, parts.status, &parts.headers, &body);
            treblle.dispatch(request, captured);

            Ok(Response::from_parts(parts, ResBody::from(body)))
        })
    }
}

/// Capture inside a panic boundary. A panicking capture yields a minimal
/// record so the request still reaches the handler untouched.
fn capture_request(
    treblle: &Treblle,
    ctx: &RequestContext,
    parts: &Parts,
    body: &[u8],
) -> CapturedRequest {
    match catch_unwind(AssertUnwindSafe(|| treblle.capture_request(ctx, parts, body))) {
        Ok(request) => request,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(panic = %message, "Treblle request capture panicked");
            ctx.errors().add_custom(
                format!("request capture panicked: {message}"),
                ErrorKind::UnhandledException,
                SOURCE,
            );
            CapturedRequest {
                method: parts.method.to_string(),
                url: parts.uri.path().to_string(),
                route_path: resolve_route(None, parts.uri.path()),
                ..Default::default()
            }
        }
    }
}

fn capture_response(
    treblle: &Treblle,
    ctx: &RequestContext,
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
) -> CapturedResponse {
    match catch_unwind(AssertUnwindSafe(|| {
        treblle.capture_response(ctx, status, headers, body)
    })) {
        Ok(response) => response,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(panic = %message, "Treblle response capture panicked");
            ctx.errors().add_custom(
                format!("response capture panicked: {message}"),
                ErrorKind::UnhandledException,
                SOURCE,
            );
            CapturedResponse {
                code: status.as_u16(),
                ..Default::default()
            }
            .with_errors(ctx.errors())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
