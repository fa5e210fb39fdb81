//! Delivery of payloads to the collection endpoint.

use crate::error::{Result, TreblleError};
use crate::payload::Payload;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

/// Collection endpoints used when no override is configured.
pub const DEFAULT_ENDPOINTS: &[&str] = &[
    "https://rocknrolla.treblle.com",
    "https://punisher.treblle.com",
    "https://sicario.treblle.com",
];

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Sink for payloads.
///
/// Implementations make a single attempt and report the outcome; callers
/// decide whether to log it. `timeout` bounds this one call only.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, payload: &Payload, timeout: Duration) -> Result<()>;
}

/// Chooses the endpoint for each send.
#[derive(Debug, Clone)]
pub enum EndpointSelector {
    /// Always use this URL.
    Fixed(String),
    /// Pick uniformly at random on every call.
    Random(Vec<String>),
}

impl EndpointSelector {
    /// The configured override, or the default endpoint list.
    pub fn new(endpoint: Option<&str>) -> Self {
        match endpoint.map(str::trim).filter(|e| !e.is_empty()) {
            Some(url) => Self::Fixed(url.to_string()),
            None => Self::Random(DEFAULT_ENDPOINTS.iter().map(|e| e.to_string()).collect()),
        }
    }

    pub fn select(&self) -> &str {
        match self {
            Self::Fixed(url) => url,
            Self::Random(urls) => urls
                .choose(&mut rand::thread_rng())
                .map(String::as_str)
                .unwrap_or(DEFAULT_ENDPOINTS[0]),
        }
    }
}

/// [`Transport`] that POSTs JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoints: EndpointSelector,
    debug: bool,
}

impl HttpTransport {
    /// Create a transport. No client-wide timeout is set; every send gets
    /// its own deadline.
    pub fn new(endpoint: Option<&str>, debug: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("treblle-rust/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoints: EndpointSelector::new(endpoint),
            debug,
        })
    }

    pub fn endpoints(&self) -> &EndpointSelector {
        &self.endpoints
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &Payload, timeout: Duration) -> Result<()> {
        let endpoint = self.endpoints.select();
        let body = serde_json::to_vec(payload)?;

        if self.debug {
            let pretty = serde_json::to_string_pretty(payload).unwrap_or_default();
            debug!(endpoint, payload = %pretty, "Sending payload to Treblle");
        }

        let response = self
            .client
            .post(endpoint)
            .timeout(timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, payload.api_key.as_str())
            .body(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TreblleError::Timeout(timeout)
                } else {
                    TreblleError::Http(err)
                }
            })?;

        let status = response.status();
        if self.debug {
            debug!(endpoint, status = status.as_u16(), "Treblle responded");
        }
        if status.as_u16() >= 400 {
            return Err(TreblleError::Status {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }
        Ok(())
    }
}
