//! Recursive redaction of sensitive fields.
//!
//! The [`Masker`] walks a `serde_json::Value` tree and replaces the value of
//! every key found in the [`SensitiveFields`] set with a fixed nine-character
//! marker. The marker never depends on the input length.

use http::HeaderMap;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Replacement for every masked string.
pub const MASKED_VALUE: &str = "*********";

/// Authorization schemes kept in front of a masked credential.
pub const AUTH_SCHEMES: &[&str] = &["Bearer", "Basic", "ApiKey", "Token"];

/// Fields masked when no other list is configured.
pub const DEFAULT_MASKED_FIELDS: &[&str] = &[
    "password",
    "pwd",
    "secret",
    "password_confirmation",
    "passwordConfirmation",
    "cc",
    "card_number",
    "cardNumber",
    "ccv",
    "ssn",
    "credit_score",
    "creditScore",
    "authorization",
    "api_key",
];

const HEADER_PREFIXES: &[&str] = &["x-", "x_"];

/// Case-insensitive set of field names subject to redaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensitiveFields {
    names: HashSet<String>,
}

impl SensitiveFields {
    /// Build a set from any list of names. Blank entries are skipped.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        Self { names }
    }

    /// The built-in defaults.
    pub fn defaults() -> Self {
        Self::new(DEFAULT_MASKED_FIELDS)
    }

    /// Add more names to the set.
    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.names.extend(
            names
                .into_iter()
                .map(|n| n.as_ref().trim().to_lowercase())
                .filter(|n| !n.is_empty()),
        );
    }

    /// Whether `key` (or its `x-`/`x_` header variant) is sensitive.
    pub fn contains(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        if self.names.contains(&key) {
            return true;
        }
        for prefix in HEADER_PREFIXES {
            if self.names.contains(&format!("{prefix}{key}")) {
                return true;
            }
            if let Some(stripped) = key.strip_prefix(prefix) {
                if self.names.contains(stripped) {
                    return true;
                }
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names in the set, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Masking engine over JSON trees, headers and query pairs.
#[derive(Debug, Clone)]
pub struct Masker {
    fields: Arc<SensitiveFields>,
    enabled: bool,
}

impl Default for Masker {
    fn default() -> Self {
        Self::new(SensitiveFields::defaults())
    }
}

impl Masker {
    /// Create an enabled masker over `fields`.
    pub fn new(fields: SensitiveFields) -> Self {
        Self {
            fields: Arc::new(fields),
            enabled: true,
        }
    }

    /// A masker that passes everything through.
    pub fn disabled() -> Self {
        Self {
            fields: Arc::new(SensitiveFields::default()),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn fields(&self) -> &SensitiveFields {
        &self.fields
    }

    /// Whether a value stored under `key` would be redacted.
    pub fn is_sensitive(&self, key: &str) -> bool {
        self.enabled && self.fields.contains(key)
    }

    /// Mask a JSON tree.
    pub fn mask(&self, value: Value) -> Value {
        if !self.enabled {
            return value;
        }
        self.walk(value)
    }

    fn walk(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.walk_object(map)),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.walk(v)).collect()),
            scalar => scalar,
        }
    }

    fn walk_object(&self, map: Map<String, Value>) -> Map<String, Value> {
        map.into_iter()
            .map(|(key, value)| {
                let value = if self.fields.contains(&key) {
                    redact(&key, value)
                } else {
                    self.walk(value)
                };
                (key, value)
            })
            .collect()
    }

    /// Mask a single string stored under `key`.
    pub fn mask_str(&self, key: &str, value: &str) -> String {
        if self.is_sensitive(key) {
            redact_str(key, value)
        } else {
            value.to_string()
        }
    }

    /// Masked JSON object of a header map. Repeated headers become arrays.
    pub fn mask_headers(&self, headers: &HeaderMap) -> Value {
        let mut map = Map::new();
        for name in headers.keys() {
            let mut values: Vec<String> = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            let key = name.as_str();
            let value = if values.len() == 1 {
                Value::String(self.mask_str(key, &values.remove(0)))
            } else {
                Value::Array(
                    values
                        .iter()
                        .map(|v| Value::String(self.mask_str(key, v)))
                        .collect(),
                )
            };
            map.insert(key.to_string(), value);
        }
        Value::Object(map)
    }
}

/// Apply the redaction policy to a matched field's value.
fn redact(key: &str, value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_str(key, &s)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Value::String(redact_str(key, &s)),
                    _ => Value::String(MASKED_VALUE.to_string()),
                })
                .collect(),
        ),
        Value::Null => Value::Null,
        _ => Value::String(MASKED_VALUE.to_string()),
    }
}

fn redact_str(key: &str, value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    if is_authorization_key(key) {
        if let Some(scheme) = auth_scheme(value) {
            return format!("{scheme} {MASKED_VALUE}");
        }
    }
    MASKED_VALUE.to_string()
}

fn is_authorization_key(key: &str) -> bool {
    key.eq_ignore_ascii_case("authorization") || key.eq_ignore_ascii_case("proxy-authorization")
}

/// The scheme token of an authorization value, as written by the client.
fn auth_scheme(value: &str) -> Option<&str> {
    let (scheme, rest) = value.split_once(' ')?;
    if rest.trim().is_empty() {
        return None;
    }
    AUTH_SCHEMES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(scheme))
        .then_some(scheme)
}
