//! Bounded, non-blocking delivery of captured traffic.
//!
//! Every call to [`DeliveryProcessor::process`] spawns one task. The task
//! must win a permit from a fixed-size pool within the acquire timeout or it
//! is dropped; telemetry never queues behind a slow collector.

use crate::capture::{CapturedRequest, CapturedResponse};
use crate::collector::ErrorRecord;
use crate::config::DeliveryConfig;
use crate::error::TreblleError;
use crate::payload::{Payload, PayloadBuilder};
use crate::transport::Transport;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{trace, warn};

/// Fire-and-forget dispatcher with a bounded permit pool.
///
/// Clones share the pool, the counters and the shutdown signal.
#[derive(Clone)]
pub struct DeliveryProcessor {
    inner: Arc<Inner>,
}

/// Work item; the payload is built only once a permit is held.
enum Job {
    Traffic(CapturedRequest, CapturedResponse),
    Errors(Vec<ErrorRecord>),
}

impl Job {
    fn into_payload(self, builder: &PayloadBuilder) -> Payload {
        match self {
            Self::Traffic(request, response) => builder.build(request, response),
            Self::Errors(records) => builder.build_errors(records),
        }
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    builder: PayloadBuilder,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    pending: AtomicUsize,
    idle: Notify,
    acquire_timeout: Duration,
    send_timeout: Duration,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DeliveryProcessor {
    /// Create a processor. The acquire timeout is the configured one in
    /// async mode and the send timeout otherwise.
    pub fn new(
        transport: Arc<dyn Transport>,
        builder: PayloadBuilder,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                builder,
                permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                acquire_timeout: config.effective_acquire_timeout(),
                send_timeout: config.send_timeout,
                dropped: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Queue delivery of one request/response pair and return immediately.
    ///
    /// Outside a Tokio runtime, or after shutdown, the pair is dropped.
    pub fn process(&self, request: CapturedRequest, response: CapturedResponse) {
        self.submit(Job::Traffic(request, response));
    }

    /// Queue delivery of application error records outside of any request.
    pub fn process_errors(&self, records: Vec<ErrorRecord>) {
        if !records.is_empty() {
            self.submit(Job::Errors(records));
        }
    }

    fn submit(&self, job: Job) {
        if self.inner.cancel.is_cancelled() {
            self.record_drop("processor is shut down");
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!("No Tokio runtime available, dropping Treblle payload");
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let inner = Arc::clone(&self.inner);
        let pending = PendingGuard::new(Arc::clone(&self.inner));
        self.inner.tracker.spawn_on(
            async move {
                let _pending = pending;
                inner.deliver(job).await
            },
            &handle,
        );
    }

    /// Cancel pending work and wait for running tasks, at most `timeout`.
    ///
    /// Returns `false` when the deadline cut the wait short.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_ok()
    }

    /// Wait until no task is pending, without cancelling anything.
    ///
    /// Concurrent drains are independent. Returns `false` on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.inner.wait_idle())
            .await
            .is_ok()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Payloads shed because no permit was free in time.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Payloads the collector accepted.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Payloads that failed on the wire.
    pub fn failed(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Tasks currently alive.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    fn record_drop(&self, reason: &'static str) {
        let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(reason, dropped, "Treblle payload dropped");
    }
}

/// Counts a submitted task until its future is dropped.
struct PendingGuard(Arc<Inner>);

impl PendingGuard {
    fn new(inner: Arc<Inner>) -> Self {
        inner.pending.fetch_add(1, Ordering::AcqRel);
        Self(inner)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl Inner {
    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn deliver(&self, job: Job) {
        let acquire = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        );
        let permit = tokio::select! {
            _ = self.cancel.cancelled() => None,
            acquired = acquire => acquired.ok().and_then(Result::ok),
        };
        let Some(_permit) = permit else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(dropped, "No delivery permit available, Treblle payload dropped");
            return;
        };

        let payload = job.into_payload(&self.builder);
        let send = tokio::time::timeout(
            self.send_timeout,
            self.transport.send(&payload, self.send_timeout),
        );
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(TreblleError::Cancelled),
            sent = send => sent.unwrap_or(Err(TreblleError::Timeout(self.send_timeout))),
        };

        match outcome {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %error, "Failed to deliver payload to Treblle");
            }
        }
    }
}

impl std::fmt::Debug for DeliveryProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryProcessor")
            .field("available_permits", &self.inner.permits.available_permits())
            .field("acquire_timeout", &self.inner.acquire_timeout)
            .field("send_timeout", &self.inner.send_timeout)
            .field("in_flight", &self.in_flight())
            .field("dropped", &self.dropped())
            .finish()
    }
}
