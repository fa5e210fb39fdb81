//! SDK configuration.
//!
//! [`TreblleConfig`] is an immutable value assembled with a consuming
//! builder. Reconfiguring means building a new value and a new client.
//!
//! ```ignore
//! use treblle_core::{TreblleConfig, DeliveryConfig};
//! use std::time::Duration;
//!
//! let config = TreblleConfig::new("api-key", "project-id")
//!     .mask_fields(["session_token"])
//!     .ignored_environments(["local", "test"])
//!     .delivery(DeliveryConfig::new().max_concurrency(20))
//!     .with_env_overrides();
//! ```

use crate::capture::{CapturedRequest, CapturedResponse, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::environment::DEFAULT_IGNORED_ENVIRONMENTS;
use crate::error::{Result, TreblleError};
use crate::masking::{Masker, SensitiveFields, DEFAULT_MASKED_FIELDS};
use crate::payload::{SDK_NAME, SDK_VERSION};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Prefix of every environment variable the SDK reads.
pub const ENV_PREFIX: &str = "TREBLLE_";

/// Settings of the batch error collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchErrorConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl BatchErrorConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 100;
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

    /// Enabled, with the default size and interval.
    pub fn new() -> Self {
        Self {
            enabled: true,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            flush_interval: Self::DEFAULT_FLUSH_INTERVAL,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Zero values replaced by the defaults.
    pub fn normalized(&self) -> Self {
        Self {
            enabled: self.enabled,
            batch_size: if self.batch_size == 0 {
                Self::DEFAULT_BATCH_SIZE
            } else {
                self.batch_size
            },
            flush_interval: if self.flush_interval.is_zero() {
                Self::DEFAULT_FLUSH_INTERVAL
            } else {
                self.flush_interval
            },
        }
    }
}

impl Default for BatchErrorConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Settings of the delivery processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Shed deliveries quickly under saturation. When off, a delivery waits
    /// up to the send timeout for a permit.
    pub async_enabled: bool,
    pub max_concurrency: usize,
    pub acquire_timeout: Duration,
    pub send_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl DeliveryConfig {
    pub const DEFAULT_MAX_CONCURRENCY: usize = 10;
    pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);
    pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self {
            async_enabled: true,
            max_concurrency: Self::DEFAULT_MAX_CONCURRENCY,
            acquire_timeout: Self::DEFAULT_ACQUIRE_TIMEOUT,
            send_timeout: Self::DEFAULT_SEND_TIMEOUT,
            shutdown_timeout: Self::DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn async_enabled(mut self, enabled: bool) -> Self {
        self.async_enabled = enabled;
        self
    }

    /// Size of the permit pool. Zero falls back to the default.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = if limit == 0 {
            Self::DEFAULT_MAX_CONCURRENCY
        } else {
            limit
        };
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// How long a delivery may wait for a permit.
    pub fn effective_acquire_timeout(&self) -> Duration {
        if self.async_enabled {
            self.acquire_timeout
        } else {
            self.send_timeout
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Predicate deciding whether a captured pair is sent.
pub type DeliveryPredicate = Arc<dyn Fn(&CapturedRequest, &CapturedResponse) -> bool + Send + Sync>;

/// Which captured pairs are sent to the collector.
#[derive(Clone, Default)]
pub enum DeliveryFilter {
    /// Send everything.
    #[default]
    Always,
    /// Only responses with a JSON content type.
    JsonOnly,
    /// Only responses with a status below 400.
    SuccessOnly,
    Custom(DeliveryPredicate),
}

impl DeliveryFilter {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&CapturedRequest, &CapturedResponse) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    pub fn should_deliver(&self, request: &CapturedRequest, response: &CapturedResponse) -> bool {
        match self {
            Self::Always => true,
            Self::JsonOnly => response.is_json(),
            Self::SuccessOnly => response.code < 400,
            Self::Custom(predicate) => predicate(request, response),
        }
    }
}

impl std::fmt::Debug for DeliveryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::JsonOnly => f.write_str("JsonOnly"),
            Self::SuccessOnly => f.write_str("SuccessOnly"),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Resolved SDK configuration.
#[derive(Clone)]
pub struct TreblleConfig {
    pub(crate) api_key: String,
    pub(crate) project_id: String,
    pub(crate) endpoint: Option<String>,
    pub(crate) masking_enabled: bool,
    pub(crate) default_masked_fields: Vec<String>,
    pub(crate) additional_masked_fields: Vec<String>,
    pub(crate) env_masked_fields: Vec<String>,
    pub(crate) max_payload_size: usize,
    pub(crate) batch_errors: BatchErrorConfig,
    pub(crate) delivery: DeliveryConfig,
    pub(crate) ignored_environments: Vec<String>,
    pub(crate) debug: bool,
    pub(crate) sdk_name: String,
    pub(crate) sdk_version: String,
    pub(crate) server_ip: Option<String>,
    pub(crate) delivery_filter: DeliveryFilter,
}

impl TreblleConfig {
    /// Configuration with every default in place.
    pub fn new(api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            project_id: project_id.into(),
            endpoint: None,
            masking_enabled: true,
            default_masked_fields: to_strings(DEFAULT_MASKED_FIELDS),
            additional_masked_fields: Vec::new(),
            env_masked_fields: Vec::new(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            batch_errors: BatchErrorConfig::disabled(),
            delivery: DeliveryConfig::new(),
            ignored_environments: to_strings(DEFAULT_IGNORED_ENVIRONMENTS),
            debug: false,
            sdk_name: SDK_NAME.to_string(),
            sdk_version: SDK_VERSION.to_string(),
            server_ip: None,
            delivery_filter: DeliveryFilter::Always,
        }
    }

    /// Configuration read entirely from `TREBLLE_*` variables.
    ///
    /// Fails when the API key or project ID is missing.
    pub fn from_env() -> Result<Self> {
        let config = Self::new("", "").with_env_overrides();
        if config.api_key.is_empty() {
            return Err(TreblleError::Config("TREBLLE_API_KEY is not set".into()));
        }
        if config.project_id.is_empty() {
            return Err(TreblleError::Config("TREBLLE_PROJECT_ID is not set".into()));
        }
        Ok(config)
    }

    /// Apply `TREBLLE_*` variables on top of this configuration.
    ///
    /// Unreadable variables are logged and skipped.
    pub fn with_env_overrides(mut self) -> Self {
        let env = match envy::prefixed(ENV_PREFIX).from_env::<EnvOverrides>() {
            Ok(env) => env,
            Err(error) => {
                warn!(error = %error, "Ignoring unreadable Treblle environment variables");
                return self;
            }
        };

        if let Some(key) = non_empty(env.api_key) {
            self.api_key = key;
        }
        if let Some(id) = non_empty(env.project_id) {
            self.project_id = id;
        }
        if let Some(endpoint) = non_empty(env.endpoint) {
            self.endpoint = Some(endpoint);
        }
        if let Some(fields) = non_empty(env.masked_fields) {
            self.env_masked_fields = split_list(&fields);
        }
        if let Some(name) = non_empty(env.sdk_name) {
            self.sdk_name = name;
        }
        if let Some(version) = non_empty(env.sdk_version) {
            self.sdk_version = version;
        }
        if let Some(ignored) = non_empty(env.ignored_env) {
            self.ignored_environments = split_list(&ignored);
        }
        if let Some(ip) = non_empty(env.server_ip) {
            self.server_ip = Some(ip);
        }
        if let Some(flag_value) = non_empty(env.debug) {
            match parse_bool(&flag_value) {
                Some(flag) => self.debug = flag,
                None => warn!(value = %flag_value, "Ignoring invalid TREBLLE_DEBUG value"),
            }
        }
        self
    }

    /// Override the collection endpoint.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    pub fn masking(mut self, enabled: bool) -> Self {
        self.masking_enabled = enabled;
        self
    }

    /// Replace the built-in list of masked fields.
    pub fn default_masked_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_masked_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Mask these fields in addition to the defaults.
    pub fn mask_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additional_masked_fields
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn max_payload_size(mut self, bytes: usize) -> Self {
        self.max_payload_size = bytes;
        self
    }

    pub fn batch_errors(mut self, config: BatchErrorConfig) -> Self {
        self.batch_errors = config;
        self
    }

    pub fn delivery(mut self, config: DeliveryConfig) -> Self {
        self.delivery = config;
        self
    }

    /// Replace the list of environments in which nothing is captured.
    pub fn ignored_environments<I, S>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_environments = environments.into_iter().map(Into::into).collect();
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn sdk_name(mut self, name: impl Into<String>) -> Self {
        self.sdk_name = name.into();
        self
    }

    pub fn sdk_version(mut self, version: impl Into<String>) -> Self {
        self.sdk_version = version.into();
        self
    }

    /// Comma-separated candidate addresses reported as the server IP.
    pub fn server_ip(mut self, ips: impl Into<String>) -> Self {
        self.server_ip = Some(ips.into());
        self
    }

    pub fn delivery_filter(mut self, filter: DeliveryFilter) -> Self {
        self.delivery_filter = filter;
        self
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn configured_endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn is_masking_enabled(&self) -> bool {
        self.masking_enabled
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn sdk(&self) -> (&str, &str) {
        (&self.sdk_name, &self.sdk_version)
    }

    pub fn payload_limit(&self) -> usize {
        self.max_payload_size
    }

    pub fn batch_settings(&self) -> &BatchErrorConfig {
        &self.batch_errors
    }

    pub fn delivery_settings(&self) -> &DeliveryConfig {
        &self.delivery
    }

    pub fn ignored(&self) -> &[String] {
        &self.ignored_environments
    }

    pub fn filter(&self) -> &DeliveryFilter {
        &self.delivery_filter
    }

    /// Defaults, user additions and environment additions combined.
    pub fn sensitive_fields(&self) -> SensitiveFields {
        let mut fields = SensitiveFields::new(&self.default_masked_fields);
        fields.extend(&self.additional_masked_fields);
        fields.extend(&self.env_masked_fields);
        fields
    }

    /// The masker this configuration describes.
    pub fn masker(&self) -> Masker {
        if self.masking_enabled {
            Masker::new(self.sensitive_fields())
        } else {
            Masker::disabled()
        }
    }
}

impl std::fmt::Debug for TreblleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreblleConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("project_id", &mask_secret(&self.project_id))
            .field("endpoint", &self.endpoint)
            .field("masking_enabled", &self.masking_enabled)
            .field("sensitive_fields", &self.sensitive_fields().len())
            .field("max_payload_size", &self.max_payload_size)
            .field("batch_errors", &self.batch_errors)
            .field("delivery", &self.delivery)
            .field("ignored_environments", &self.ignored_environments)
            .field("debug", &self.debug)
            .field("sdk_name", &self.sdk_name)
            .field("sdk_version", &self.sdk_version)
            .field("delivery_filter", &self.delivery_filter)
            .finish()
    }
}

/// Show only the last four characters of a secret.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    match chars.len() {
        0 => "Not Set".to_string(),
        1..=4 => "****".to_string(),
        n => format!("****{}", chars[n - 4..].iter().collect::<String>()),
    }
}

#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    api_key: Option<String>,
    project_id: Option<String>,
    endpoint: Option<String>,
    masked_fields: Option<String>,
    sdk_name: Option<String>,
    sdk_version: Option<String>,
    ignored_env: Option<String>,
    server_ip: Option<String>,
    debug: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "TREBLLE_API_KEY",
        "TREBLLE_PROJECT_ID",
        "TREBLLE_ENDPOINT",
        "TREBLLE_MASKED_FIELDS",
        "TREBLLE_SDK_NAME",
        "TREBLLE_SDK_VERSION",
        "TREBLLE_IGNORED_ENV",
        "TREBLLE_SERVER_IP",
        "TREBLLE_DEBUG",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = TreblleConfig::new("key", "project");
        assert!(config.is_masking_enabled());
        assert_eq!(config.payload_limit(), 2 * 1024 * 1024);
        assert_eq!(config.ignored(), &["local", "dev", "development"]);
        assert!(!config.batch_settings().enabled);
        assert_eq!(config.delivery_settings().max_concurrency, 10);
        assert_eq!(
            config.delivery_settings().acquire_timeout,
            Duration::from_millis(100)
        );
        assert_eq!(config.delivery_settings().send_timeout, Duration::from_secs(2));
        assert_eq!(config.sdk().0, "rust");
        assert!(config.sensitive_fields().contains("password"));
        assert!(config.sensitive_fields().contains("Authorization"));
    }

    #[test]
    fn test_builder_chain() {
        let config = TreblleConfig::new("key", "project")
            .endpoint("http://localhost:8080")
            .mask_fields(["session_token"])
            .max_payload_size(1024)
            .batch_errors(BatchErrorConfig::new().batch_size(10))
            .delivery(DeliveryConfig::new().max_concurrency(0))
            .ignored_environments(["qa"])
            .debug(true);

        assert_eq!(config.configured_endpoint(), Some("http://localhost:8080"));
        assert!(config.sensitive_fields().contains("SESSION_TOKEN"));
        assert!(config.sensitive_fields().contains("password"));
        assert_eq!(config.payload_limit(), 1024);
        assert_eq!(config.batch_settings().batch_size, 10);
        assert_eq!(config.delivery_settings().max_concurrency, 10);
        assert_eq!(config.ignored(), &["qa"]);
        assert!(config.is_debug());
    }

    #[test]
    fn test_masking_toggle() {
        let masker = TreblleConfig::new("k", "p").masking(false).masker();
        assert!(!masker.is_enabled());
    }

    #[test]
    fn test_batch_config_normalization() {
        let normalized = BatchErrorConfig::new()
            .batch_size(0)
            .flush_interval(Duration::ZERO)
            .normalized();
        assert_eq!(normalized.batch_size, 100);
        assert_eq!(normalized.flush_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "Not Set");
        assert_eq!(mask_secret("abcd"), "****");
        assert_eq!(mask_secret("sk_live_12345678"), "****5678");
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let config = TreblleConfig::new("super-secret-api-key", "project-123456");
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-api-key"));
        assert!(debug.contains("****-key"));
        assert!(debug.contains("****3456"));
    }

    #[test]
    fn test_delivery_filters() {
        let request = CapturedRequest::default();
        let ok = CapturedResponse {
            code: 200,
            headers: serde_json::json!({"content-type": "application/json"}),
            ..Default::default()
        };
        let failed = CapturedResponse {
            code: 500,
            headers: serde_json::json!({"content-type": "text/plain"}),
            ..Default::default()
        };

        assert!(DeliveryFilter::Always.should_deliver(&request, &failed));
        assert!(DeliveryFilter::SuccessOnly.should_deliver(&request, &ok));
        assert!(!DeliveryFilter::SuccessOnly.should_deliver(&request, &failed));
        assert!(DeliveryFilter::JsonOnly.should_deliver(&request, &ok));
        assert!(!DeliveryFilter::JsonOnly.should_deliver(&request, &failed));

        let only_posts = DeliveryFilter::custom(|req, _| req.method == "POST");
        assert!(!only_posts.should_deliver(&request, &ok));
        assert_eq!(format!("{only_posts:?}"), "Custom(<fn>)");
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("TREBLLE_API_KEY", "env-key");
        std::env::set_var("TREBLLE_ENDPOINT", "http://collector.local");
        std::env::set_var("TREBLLE_MASKED_FIELDS", "ssn_last4, pin ,");
        std::env::set_var("TREBLLE_IGNORED_ENV", "local,ci");
        std::env::set_var("TREBLLE_SDK_VERSION", "9.9.9");
        std::env::set_var("TREBLLE_DEBUG", "true");

        let config = TreblleConfig::new("code-key", "code-project").with_env_overrides();
        clear_env();

        assert_eq!(config.api_key(), "env-key");
        assert_eq!(config.project_id(), "code-project");
        assert_eq!(config.configured_endpoint(), Some("http://collector.local"));
        assert!(config.sensitive_fields().contains("pin"));
        assert!(config.sensitive_fields().contains("ssn_last4"));
        assert!(config.sensitive_fields().contains("password"));
        assert_eq!(config.ignored(), &["local", "ci"]);
        assert_eq!(config.sdk().1, "9.9.9");
        assert!(config.is_debug());
    }

    #[test]
    #[serial]
    fn test_invalid_debug_value_is_ignored() {
        clear_env();
        std::env::set_var("TREBLLE_DEBUG", "sometimes");
        let config = TreblleConfig::new("k", "p").debug(true).with_env_overrides();
        clear_env();
        assert!(config.is_debug());
    }

    #[test]
    #[serial]
    fn test_from_env_requires_credentials() {
        clear_env();
        assert!(matches!(
            TreblleConfig::from_env(),
            Err(TreblleError::Config(_))
        ));

        std::env::set_var("TREBLLE_API_KEY", "k");
        std::env::set_var("TREBLLE_PROJECT_ID", "p");
        let config = TreblleConfig::from_env();
        clear_env();
        assert!(config.is_ok());
    }
}
