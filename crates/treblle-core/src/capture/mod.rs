//! Request and response capture.
//!
//! Both capturers work on fully buffered bodies. The middleware drains the
//! body once with [`buffer_body`], hands the bytes to the capturer and then
//! rebuilds an unconsumed body from the same bytes for the handler or the
//! client.

mod request;
mod response;

pub use request::{client_ip, CapturedRequest, PeerAddr, RequestCapturer, TIMESTAMP_FORMAT};
pub use response::{CapturedResponse, ResponseCapturer, DEFAULT_MAX_PAYLOAD_SIZE};

use crate::error::{Result, TreblleError};
use bytes::Bytes;
use http_body::Body;
use http_body_util::BodyExt;

/// Read a whole body into memory.
pub async fn buffer_body<B>(body: B) -> Result<Bytes>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(TreblleError::body_read)
}

/// Whether a content type names a JSON media type
/// (`application/json`, `application/problem+json`, ...).
pub(crate) fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json") || essence == "text/json"
}
