use http::{HeaderMap, Method};
use serde_json::Value;
use treblle_core::transport::API_KEY_HEADER;

/// Matcher for requests arriving at the mock collector.
///
/// All configured criteria must hold. An empty matcher accepts everything.
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    pub(crate) method: Option<Method>,
    pub(crate) path: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body_json: Option<Value>,
    pub(crate) fields: Vec<(String, Value)>,
    pub(crate) body_contains: Vec<String>,
}

impl RequestMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Match a header value exactly. Names are case-insensitive.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Match the `x-api-key` header.
    pub fn api_key(self, key: impl Into<String>) -> Self {
        self.header(API_KEY_HEADER, key)
    }

    /// Match the whole JSON body, ignoring whitespace and key order.
    pub fn body_json(mut self, body: impl serde::Serialize) -> Self {
        self.body_json = serde_json::to_value(body).ok();
        self
    }

    /// Match one field of the JSON body by JSON pointer, e.g.
    /// `/data/request/route_path`.
    pub fn field(mut self, pointer: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((pointer.into(), value.into()));
        self
    }

    /// Match when the raw body contains `needle`.
    pub fn body_contains(mut self, needle: impl Into<String>) -> Self {
        self.body_contains.push(needle.into());
        self
    }

    pub fn matches(&self, method: &Method, path: &str, headers: &HeaderMap, body: &[u8]) -> bool {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return false;
        }
        if self.path.as_deref().is_some_and(|p| p != path) {
            return false;
        }

        let headers_match = self.headers.iter().all(|(k, v)| {
            headers
                .get(k.as_str())
                .is_some_and(|actual| actual == v.as_str())
        });
        if !headers_match {
            return false;
        }

        if self.body_json.is_some() || !self.fields.is_empty() {
            let Ok(actual) = serde_json::from_slice::<Value>(body) else {
                return false;
            };
            if self.body_json.as_ref().is_some_and(|expected| expected != &actual) {
                return false;
            }
            let fields_match = self
                .fields
                .iter()
                .all(|(pointer, expected)| actual.pointer(pointer) == Some(expected));
            if !fields_match {
                return false;
            }
        }

        if !self.body_contains.is_empty() {
            let text = String::from_utf8_lossy(body);
            if !self.body_contains.iter().all(|n| text.contains(n.as_str())) {
                return false;
            }
        }

        true
    }
}
