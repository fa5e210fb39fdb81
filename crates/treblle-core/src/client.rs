//! The SDK client handle shared by every integration.

use crate::batch::BatchErrorCollector;
use crate::capture::{CapturedRequest, CapturedResponse, RequestCapturer, ResponseCapturer};
use crate::collector::{ErrorCollector, ErrorKind, ErrorRecord};
use crate::config::TreblleConfig;
use crate::delivery::DeliveryProcessor;
use crate::environment::{current_environment, is_ignored};
use crate::error::Result;
use crate::payload::{PayloadBuilder, ServerInfo};
use crate::transport::{HttpTransport, Transport};
use chrono::{DateTime, Utc};
use http::request::Parts;
use http::{HeaderMap, StatusCode};
use std::panic::Location;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// State of one request between capture and dispatch.
#[derive(Debug, Clone)]
pub struct RequestContext {
    started: Instant,
    started_at: DateTime<Utc>,
    errors: ErrorCollector,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            errors: ErrorCollector::new(),
        }
    }

    pub fn errors(&self) -> &ErrorCollector {
        &self.errors
    }

    pub fn started(&self) -> Instant {
        self.started
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a configured SDK instance. Cheap to clone.
///
/// ```ignore
/// let treblle = Treblle::new(TreblleConfig::from_env()?)?;
/// treblle.report("payment provider unreachable", ErrorKind::ServerError, "billing");
/// treblle.shutdown().await;
/// ```
#[derive(Clone)]
pub struct Treblle {
    inner: Arc<Inner>,
}

struct Inner {
    config: TreblleConfig,
    requests: RequestCapturer,
    responses: ResponseCapturer,
    processor: DeliveryProcessor,
    batch: Option<BatchErrorCollector>,
    environment: Option<String>,
    ignored: bool,
}

impl Treblle {
    /// Client delivering over HTTP to the configured or default endpoints.
    pub fn new(config: TreblleConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.configured_endpoint(), config.is_debug())?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Client delivering through any [`Transport`].
    ///
    /// Enabling batched errors requires a running Tokio runtime.
    pub fn with_transport(config: TreblleConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let masker = config.masker();
        let builder = PayloadBuilder::new(
            config.api_key.clone(),
            config.project_id.clone(),
            config.sdk_name.clone(),
            config.sdk_version.clone(),
            ServerInfo::detect(config.server_ip.as_deref()),
        );
        let processor =
            DeliveryProcessor::new(Arc::clone(&transport), builder.clone(), &config.delivery);
        let batch = if config.batch_errors.enabled {
            Some(BatchErrorCollector::new(
                &config.batch_errors,
                transport,
                builder,
                config.delivery.send_timeout,
            )?)
        } else {
            None
        };

        let environment = current_environment();
        let ignored = is_ignored(environment.as_deref(), &config.ignored_environments);
        if ignored {
            info!(
                environment = environment.as_deref().unwrap_or_default(),
                "Treblle is disabled in this environment"
            );
        }

        Ok(Self {
            inner: Arc::new(Inner {
                requests: RequestCapturer::new(masker.clone()),
                responses: ResponseCapturer::new(masker, config.max_payload_size),
                config,
                processor,
                batch,
                environment,
                ignored,
            }),
        })
    }

    pub fn config(&self) -> &TreblleConfig {
        &self.inner.config
    }

    /// Environment name detected when the client was built.
    pub fn environment(&self) -> Option<&str> {
        self.inner.environment.as_deref()
    }

    /// Whether capture is skipped in the current environment.
    pub fn is_environment_ignored(&self) -> bool {
        self.inner.ignored
    }

    pub fn processor(&self) -> &DeliveryProcessor {
        &self.inner.processor
    }

    pub fn batch_collector(&self) -> Option<&BatchErrorCollector> {
        self.inner.batch.as_ref()
    }

    pub fn capture_request(
        &self,
        ctx: &RequestContext,
        parts: &Parts,
        body: &[u8],
    ) -> CapturedRequest {
        self.inner
            .requests
            .capture(parts, body, ctx.started_at, &ctx.errors)
    }

    pub fn capture_response(
        &self,
        ctx: &RequestContext,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
    ) -> CapturedResponse {
        self.inner
            .responses
            .capture(status, headers, body, ctx.started, &ctx.errors)
    }

    /// Hand a captured pair to the delivery processor, subject to the
    /// delivery filter. Returns immediately.
    pub fn dispatch(&self, request: CapturedRequest, response: CapturedResponse) {
        if self.inner.ignored {
            return;
        }
        if !self.inner.config.delivery_filter.should_deliver(&request, &response) {
            trace!(url = %request.url, code = response.code, "Filtered out by delivery filter");
            return;
        }
        if self.inner.config.debug {
            debug!(
                url = %request.url,
                route_path = %request.route_path,
                "Dispatching Treblle payload"
            );
        }
        self.inner.processor.process(request, response);
    }

    /// Report an application error, located at the caller.
    #[track_caller]
    pub fn report(&self, message: impl Into<String>, kind: ErrorKind, source: &str) {
        let record = ErrorRecord::at(Location::caller(), message, kind, source);
        self.submit_error(record);
    }

    /// Report an error value, located at the caller.
    #[track_caller]
    pub fn report_error(&self, error: &dyn std::error::Error, kind: ErrorKind, source: &str) {
        let record = ErrorRecord::at(Location::caller(), error.to_string(), kind, source);
        self.submit_error(record);
    }

    fn submit_error(&self, record: ErrorRecord) {
        if self.inner.ignored {
            return;
        }
        match &self.inner.batch {
            Some(batch) => batch.add(record),
            None => self.inner.processor.process_errors(vec![record]),
        }
    }

    /// Drain deliveries within the configured shutdown timeout and close the
    /// batch collector. Returns `false` if the drain was cut short.
    pub async fn shutdown(&self) -> bool {
        if let Some(batch) = &self.inner.batch {
            batch.close().await;
        }
        let timeout = self.inner.config.delivery.shutdown_timeout;
        let completed = self.inner.processor.shutdown(timeout).await;
        if !completed {
            info!(?timeout, "Treblle shutdown timed out with deliveries in flight");
        }
        completed
    }
}

impl std::fmt::Debug for Treblle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Treblle")
            .field("config", &self.inner.config)
            .field("environment", &self.inner.environment)
            .field("ignored", &self.inner.ignored)
            .field("processor", &self.inner.processor)
            .field("batch", &self.inner.batch)
            .finish()
    }
}
