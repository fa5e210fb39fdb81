//! Per-request error collection.
//!
//! An [`ErrorCollector`] lives for exactly one request. Capture code and the
//! middleware's panic boundary both append to it, so it is a cheap clonable
//! handle around a mutex-guarded vector.

use serde::{Deserialize, Serialize};
use std::panic::Location;
use std::sync::{Arc, Mutex, MutexGuard};

/// Category of an [`ErrorRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// A panic recovered by the middleware.
    UnhandledException,
    /// Encoding or decoding of a body failed.
    MarshalError,
    /// Malformed input, e.g. a request body that is not JSON.
    ValidationError,
    AuthenticationError,
    AuthorizationError,
    NotFoundError,
    RateLimitError,
    /// Internal capture failure or size limit exceeded.
    ServerError,
}

impl ErrorKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnhandledException => "UNHANDLED_EXCEPTION",
            Self::MarshalError => "MARSHAL_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::AuthenticationError => "AUTHENTICATION_ERROR",
            Self::AuthorizationError => "AUTHORIZATION_ERROR",
            Self::NotFoundError => "NOT_FOUND_ERROR",
            Self::RateLimitError => "RATE_LIMIT_ERROR",
            Self::ServerError => "SERVER_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured error entry carried in the outgoing payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub file: String,
    pub line: u32,
    pub source: String,
}

impl ErrorRecord {
    /// Build a record located at the caller.
    #[track_caller]
    pub fn new(message: impl Into<String>, kind: ErrorKind, source: impl Into<String>) -> Self {
        Self::at(Location::caller(), message, kind, source)
    }

    /// Build a record at an explicit source location.
    pub fn at(
        location: &Location<'_>,
        message: impl Into<String>,
        kind: ErrorKind,
        source: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            kind,
            file: short_file_path(location.file()),
            line: location.line(),
            source: source.into(),
        }
    }
}

/// Keep only the last two components of a source path, e.g.
/// `.../src/handlers.rs`.
pub(crate) fn short_file_path(path: &str) -> String {
    let parts: Vec<&str> = path.split(['/', '\\']).filter(|p| !p.is_empty()).collect();
    match parts.len() {
        0 => "unknown".to_string(),
        1 | 2 => parts.join("/"),
        n => format!(".../{}/{}", parts[n - 2], parts[n - 1]),
    }
}

/// Request-scoped accumulator of [`ErrorRecord`]s.
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct ErrorCollector {
    records: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl ErrorCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ErrorRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record an error value, located at the caller.
    #[track_caller]
    pub fn add(&self, error: &dyn std::error::Error, kind: ErrorKind, source: &str) {
        let record = ErrorRecord::at(Location::caller(), error.to_string(), kind, source);
        self.push(record);
    }

    /// Record a custom message, located at the caller.
    #[track_caller]
    pub fn add_custom(&self, message: impl Into<String>, kind: ErrorKind, source: &str) {
        let record = ErrorRecord::at(Location::caller(), message, kind, source);
        self.push(record);
    }

    /// Append an already-built record.
    pub fn push(&self, record: ErrorRecord) {
        self.lock().push(record);
    }

    /// Snapshot of all records collected so far.
    pub fn all(&self) -> Vec<ErrorRecord> {
        self.lock().clone()
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
