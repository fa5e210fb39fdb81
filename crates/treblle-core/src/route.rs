//! Route pattern normalization.
//!
//! Different routers spell path parameters differently (`{id}`,
//! `{id:[0-9]+}`, `:id`, `{*rest}`). Every form collapses to `{name}` so that
//! requests to the same logical endpoint group together.

use uuid::Uuid;

/// Explicit route template attached to a request by a router integration.
///
/// Stored in the request extensions and read by the request capturer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutePattern(pub String);

impl RoutePattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Pick the route used for endpoint grouping: the explicit template when one
/// is attached, the raw request path otherwise.
pub fn resolve_route(pattern: Option<&str>, path: &str) -> String {
    match pattern {
        Some(p) if !p.trim().is_empty() => normalize_route(p, true),
        _ => normalize_route(path, false),
    }
}

/// Normalize a route.
///
/// `templated` marks a router-provided template. For raw paths, bare numeric
/// segments become `{id}` and UUID segments become `{uuid}`.
pub fn normalize_route(route: &str, templated: bool) -> String {
    let mut out = String::with_capacity(route.len());
    for segment in split_segments(route) {
        out.push('/');
        out.push_str(&normalize_segment(segment, templated));
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Split on `/` outside of braces, dropping empty segments.
fn split_segments(route: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in route.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                if i > start {
                    segments.push(&route[start..i]);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < route.len() {
        segments.push(&route[start..]);
    }
    segments
}

fn normalize_segment(segment: &str, templated: bool) -> String {
    if let Some(inner) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        let inner = inner.trim_start_matches('*');
        let name = inner.split(':').next().unwrap_or(inner).trim();
        return placeholder(name);
    }
    if let Some(name) = segment.strip_prefix(':') {
        return placeholder(name);
    }
    if let Some(name) = segment.strip_prefix('*') {
        return placeholder(name);
    }
    if !templated {
        if segment.bytes().all(|b| b.is_ascii_digit()) {
            return "{id}".to_string();
        }
        if is_uuid(segment) {
            return "{uuid}".to_string();
        }
    }
    segment.to_string()
}

fn placeholder(name: &str) -> String {
    if name.is_empty() {
        "{param}".to_string()
    } else {
        format!("{{{name}}}")
    }
}

/// Hyphenated UUIDs only; 32-digit hex strings are left alone.
fn is_uuid(segment: &str) -> bool {
    segment.len() == 36 && Uuid::try_parse(segment).is_ok()
}
