//! # Treblle
//!
//! API observability for Rust services. [`TreblleLayer`] wraps any Tower
//! service (axum, tonic-web, hyper with `tower::ServiceBuilder`, ...),
//! captures each request/response pair, masks sensitive fields and sends the
//! result to Treblle in the background.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use axum::{routing::get, Router};
//! use treblle::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let treblle = Treblle::new(
//!         TreblleConfig::new("api-key", "project-id").mask_fields(["session_token"]),
//!     )?;
//!
//!     let app = Router::new()
//!         .route("/users/{id}", get(|| async { "ok" }))
//!         .layer(TreblleLayer::new(treblle.clone()));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!
//!     treblle.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! - The client always receives the response the inner service produced.
//! - Delivery never blocks the response; under saturation payloads are
//!   dropped, not queued.
//! - Nothing is captured when the current environment (`TREBLLE_ENV`,
//!   `APP_ENV`, `RUST_ENV` or `ENVIRONMENT`) is in the ignore list.

mod middleware;
mod route;

pub use middleware::{TreblleLayer, TreblleService};
pub use route::{with_route, RoutePatternLayer, RoutePatternService};

pub use treblle_core::{
    batch, capture, collector, config, delivery, environment, error, masking, payload, transport,
};
pub use treblle_core::{
    mask_secret, BatchErrorCollector, BatchErrorConfig, CapturedRequest, CapturedResponse,
    DeliveryConfig, DeliveryFilter, DeliveryProcessor, ErrorCollector, ErrorKind, ErrorRecord,
    HttpTransport, Masker, Payload, PeerAddr, RequestContext, Result, RoutePattern,
    SensitiveFields, Transport, Treblle, TreblleConfig, TreblleError,
};

/// Everything needed to wire Treblle into an application.
pub mod prelude {
    pub use crate::{
        with_route, BatchErrorConfig, DeliveryConfig, DeliveryFilter, ErrorKind, RoutePattern,
        RoutePatternLayer, Treblle, TreblleConfig, TreblleError, TreblleLayer,
    };
}
