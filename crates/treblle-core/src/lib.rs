//! # treblle-core
//!
//! Engine of the Treblle Rust SDK: captures HTTP request/response metadata,
//! masks sensitive fields and ships the result to Treblle without ever
//! touching the response the client receives.
//!
//! Most applications use the `treblle` crate, which wraps this engine in a
//! Tower layer. The pieces here are usable on their own for custom
//! integrations:
//!
//! - [`Masker`] redacts sensitive keys in JSON trees and headers.
//! - [`RequestCapturer`] / [`ResponseCapturer`] turn buffered traffic into
//!   [`CapturedRequest`] / [`CapturedResponse`].
//! - [`ErrorCollector`] accumulates per-request [`ErrorRecord`]s and
//!   [`BatchErrorCollector`] batches application errors across requests.
//! - [`DeliveryProcessor`] sends payloads through a [`Transport`] with
//!   bounded concurrency, shedding work under saturation.
//! - [`Treblle`] ties everything together from a [`TreblleConfig`].

pub mod batch;
pub mod capture;
pub mod client;
pub mod collector;
pub mod config;
pub mod delivery;
pub mod environment;
pub mod error;
pub mod masking;
pub mod payload;
pub mod route;
pub mod transport;

pub use batch::BatchErrorCollector;
pub use capture::{
    buffer_body, CapturedRequest, CapturedResponse, PeerAddr, RequestCapturer, ResponseCapturer,
    DEFAULT_MAX_PAYLOAD_SIZE,
};
pub use client::{RequestContext, Treblle};
pub use collector::{ErrorCollector, ErrorKind, ErrorRecord};
pub use config::{mask_secret, BatchErrorConfig, DeliveryConfig, DeliveryFilter, TreblleConfig};
pub use delivery::DeliveryProcessor;
pub use error::{Result, TreblleError};
pub use masking::{Masker, SensitiveFields, MASKED_VALUE};
pub use payload::{LanguageInfo, OsInfo, Payload, PayloadBuilder, PayloadData, ServerInfo};
pub use route::{normalize_route, resolve_route, RoutePattern};
pub use transport::{EndpointSelector, HttpTransport, Transport, DEFAULT_ENDPOINTS};
