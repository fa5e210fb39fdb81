//! Route template annotation.
//!
//! Routers that do not expose their templates can still group requests by
//! endpoint: wrap the handler in a [`RoutePatternLayer`] and the template is
//! attached to every request passing through it.

use http::request::Parts;
use http::Request;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use treblle_core::RoutePattern;

/// Layer attaching a fixed [`RoutePattern`] to requests.
#[derive(Debug, Clone)]
pub struct RoutePatternLayer {
    pattern: RoutePattern,
}

impl RoutePatternLayer {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: RoutePattern::new(pattern),
        }
    }
}

impl<S> Layer<S> for RoutePatternLayer {
    type Service = RoutePatternService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RoutePatternService {
            inner,
            pattern: self.pattern.clone(),
        }
    }
}

/// Service produced by [`RoutePatternLayer`].
#[derive(Debug, Clone)]
pub struct RoutePatternService<S> {
    inner: S,
    pattern: RoutePattern,
}

impl<S, B> Service<Request<B>> for RoutePatternService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        req.extensions_mut().insert(self.pattern.clone());
        self.inner.call(req)
    }
}

/// Wrap `service` so its requests carry `pattern`.
pub fn with_route<S>(pattern: impl Into<String>, service: S) -> RoutePatternService<S> {
    RoutePatternLayer::new(pattern).layer(service)
}

/// Fill in route and peer information from the host framework when no
/// explicit value is attached.
#[cfg(feature = "axum")]
pub(crate) fn annotate(parts: &mut Parts) {
    use axum::extract::{ConnectInfo, MatchedPath};
    use std::net::SocketAddr;
    use treblle_core::PeerAddr;

    if parts.extensions.get::<RoutePattern>().is_none() {
        if let Some(path) = parts.extensions.get::<MatchedPath>() {
            let pattern = RoutePattern::new(path.as_str());
            parts.extensions.insert(pattern);
        }
    }
    if parts.extensions.get::<PeerAddr>().is_none() {
        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            let peer = PeerAddr(*addr);
            parts.extensions.insert(peer);
        }
    }
}

#[cfg(not(feature = "axum"))]
pub(crate) fn annotate(_parts: &mut Parts) {}
