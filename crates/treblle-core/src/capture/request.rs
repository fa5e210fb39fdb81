use crate::collector::{ErrorCollector, ErrorKind};
use crate::masking::Masker;
use crate::route::{resolve_route, RoutePattern};
use chrono::{DateTime, Utc};
use http::header::{HOST, USER_AGENT};
use http::request::Parts;
use http::{HeaderMap, Version};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::{IpAddr, SocketAddr};

/// Format of [`CapturedRequest::timestamp`] (UTC).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Peer address of the connection, attached to the request extensions by
/// the server integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// Request half of a payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub timestamp: String,
    pub ip: String,
    pub url: String,
    pub route_path: String,
    pub user_agent: String,
    pub method: String,
    pub headers: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    /// Wire protocol of the request, reported in the server section.
    #[serde(skip)]
    pub protocol: String,
}

/// Builds [`CapturedRequest`]s.
#[derive(Debug, Clone, Default)]
pub struct RequestCapturer {
    masker: Masker,
}

impl RequestCapturer {
    pub fn new(masker: Masker) -> Self {
        Self { masker }
    }

    /// Capture a request from its head and its already buffered body.
    ///
    /// A body that is not JSON is recorded as a validation error and
    /// captured as an empty object.
    pub fn capture(
        &self,
        parts: &Parts,
        body: &[u8],
        started_at: DateTime<Utc>,
        errors: &ErrorCollector,
    ) -> CapturedRequest {
        let timestamp = started_at.format(TIMESTAMP_FORMAT).to_string();
        let peer = parts.extensions.get::<PeerAddr>().map(|p| p.0);
        let ip = client_ip(&parts.headers, peer);

        let path = parts.uri.path();
        let mut url = format!("{}://{}{}", scheme(parts), host(parts), path);
        let (query, query_string) = self.capture_query(parts.uri.query(), errors);
        if let Some(qs) = query_string {
            url.push('?');
            url.push_str(&qs);
        }

        let pattern = parts.extensions.get::<RoutePattern>().map(RoutePattern::as_str);
        let route_path = resolve_route(pattern, path);

        let body = self.capture_body(body, errors);
        let headers = self.masker.mask_headers(&parts.headers);

        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        CapturedRequest {
            timestamp,
            ip,
            url,
            route_path,
            user_agent,
            method: parts.method.to_string(),
            headers,
            body,
            query,
            protocol: protocol(parts.version).to_string(),
        }
    }

    fn capture_body(&self, body: &[u8], errors: &ErrorCollector) -> Option<Value> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => Some(self.masker.mask(value)),
            Err(err) => {
                errors.add_custom(
                    format!("request body is not valid JSON: {err}"),
                    ErrorKind::ValidationError,
                    "request_body",
                );
                Some(Value::Object(Map::new()))
            }
        }
    }

    /// Masked query object and the masked query string to reattach to the URL.
    fn capture_query(
        &self,
        raw: Option<&str>,
        errors: &ErrorCollector,
    ) -> (Option<Value>, Option<String>) {
        let Some(raw) = raw.filter(|q| !q.is_empty()) else {
            return (None, None);
        };
        let pairs: Vec<(String, String)> = match serde_urlencoded::from_str(raw) {
            Ok(pairs) => pairs,
            Err(err) => {
                errors.add(&err, ErrorKind::ValidationError, "request_query");
                return (None, None);
            }
        };
        if pairs.is_empty() {
            return (None, None);
        }

        let mut grouped: Map<String, Value> = Map::new();
        for (key, value) in &pairs {
            match grouped.get_mut(key) {
                Some(Value::Array(values)) => values.push(Value::String(value.clone())),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(value.clone())]);
                }
                None => {
                    grouped.insert(key.clone(), Value::String(value.clone()));
                }
            }
        }
        let query = self.masker.mask(Value::Object(grouped));

        let masked_pairs: Vec<(&str, String)> = pairs
            .iter()
            .map(|(k, v)| (k.as_str(), self.masker.mask_str(k, v)))
            .collect();
        let query_string = match serde_urlencoded::to_string(&masked_pairs) {
            Ok(qs) => Some(qs),
            Err(err) => {
                errors.add(&err, ErrorKind::MarshalError, "request_query");
                None
            }
        };

        (Some(query), query_string)
    }
}

/// Client address: first valid `X-Forwarded-For` entry, then `X-Real-IP`,
/// then the peer address, then `"unknown"`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|ip| ip.trim().parse::<IpAddr>().ok());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn scheme(parts: &Parts) -> &'static str {
    let forwarded = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_ascii_lowercase());
    match forwarded.as_deref() {
        Some("https") => return "https",
        Some("http") => return "http",
        _ => {}
    }
    match parts.uri.scheme_str() {
        Some(s) if s.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    }
}

fn host(parts: &Parts) -> String {
    parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_else(|| "localhost".to_string())
}

fn protocol(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}
