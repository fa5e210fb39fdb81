use super::is_json_content_type;
use crate::collector::{ErrorCollector, ErrorKind, ErrorRecord};
use crate::masking::Masker;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;

/// Largest response body captured (2 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 2 * 1024 * 1024;

/// Response half of a payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub headers: Value,
    pub code: u16,
    /// Body length in bytes, 0 when the body was over the size limit.
    pub size: usize,
    /// Microseconds since the request started.
    pub load_time: f64,
    pub body: Value,
    pub errors: Vec<ErrorRecord>,
}

/// Builds [`CapturedResponse`]s. Never fails: problems become error records.
#[derive(Debug, Clone)]
pub struct ResponseCapturer {
    masker: Masker,
    max_payload_size: usize,
}

impl Default for ResponseCapturer {
    fn default() -> Self {
        Self::new(Masker::default(), DEFAULT_MAX_PAYLOAD_SIZE)
    }
}

impl ResponseCapturer {
    pub fn new(masker: Masker, max_payload_size: usize) -> Self {
        Self {
            masker,
            max_payload_size,
        }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Capture a buffered response.
    ///
    /// The returned value carries every record in `errors` at the time of
    /// the call.
    pub fn capture(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
        started: Instant,
        errors: &ErrorCollector,
    ) -> CapturedResponse {
        let load_time = started.elapsed().as_micros() as f64;
        let masked_headers = self.masker.mask_headers(headers);

        let (body, size) = if body.len() > self.max_payload_size {
            errors.add_custom(
                format!(
                    "response body of {} bytes exceeds the {} byte limit",
                    body.len(),
                    self.max_payload_size
                ),
                ErrorKind::ServerError,
                "response_body",
            );
            (Value::Object(Map::new()), 0)
        } else {
            (self.capture_body(headers, body, errors), body.len())
        };

        CapturedResponse {
            headers: masked_headers,
            code: status.as_u16(),
            size,
            load_time,
            body,
            errors: errors.all(),
        }
    }

    fn capture_body(&self, headers: &HeaderMap, body: &[u8], errors: &ErrorCollector) -> Value {
        if body.is_empty() {
            return Value::Null;
        }

        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        match content_type {
            Some(ct) if is_json_content_type(ct) => match serde_json::from_slice(body) {
                Ok(value) => self.masker.mask(value),
                Err(err) => {
                    errors.add_custom(
                        format!("response body is not valid JSON: {err}"),
                        ErrorKind::MarshalError,
                        "response_body",
                    );
                    Value::Object(Map::new())
                }
            },
            Some(_) => Value::String(String::from_utf8_lossy(body).into_owned()),
            None => match serde_json::from_slice(body) {
                Ok(value) => self.masker.mask(value),
                Err(_) => Value::String(String::from_utf8_lossy(body).into_owned()),
            },
        }
    }
}

impl CapturedResponse {
    /// Replace the error list with a fresh snapshot.
    pub fn with_errors(mut self, errors: &ErrorCollector) -> Self {
        self.errors = errors.all();
        self
    }

    /// Whether the captured content type was JSON.
    pub fn is_json(&self) -> bool {
        self.headers
            .get("content-type")
            .and_then(Value::as_str)
            .map(is_json_content_type)
            .unwrap_or(false)
    }
}
