//! Cross-request batching of application errors.
//!
//! Records are buffered and shipped together, either when the buffer reaches
//! the batch size or when the flush timer fires. Sending happens on spawned
//! tasks after the buffer lock is released.

use crate::collector::ErrorRecord;
use crate::config::BatchErrorConfig;
use crate::error::{Result, TreblleError};
use crate::payload::PayloadBuilder;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Buffers [`ErrorRecord`]s and flushes them in batches.
///
/// Running until [`close`](Self::close) is called; closing stops the timer,
/// flushes what is left and waits for in-flight sends.
#[derive(Clone)]
pub struct BatchErrorCollector {
    inner: Arc<Inner>,
}

struct Inner {
    buffer: Mutex<Vec<ErrorRecord>>,
    batch_size: usize,
    flush_interval: Duration,
    send_timeout: Duration,
    closed: AtomicBool,
    stop_timer: CancellationToken,
    sends: TaskTracker,
    batches_sent: AtomicU64,
    transport: Arc<dyn Transport>,
    builder: PayloadBuilder,
    handle: Handle,
}

impl BatchErrorCollector {
    /// Start a collector and its flush timer on the current Tokio runtime.
    ///
    /// Zero size or interval falls back to 100 records / 5 seconds.
    pub fn new(
        config: &BatchErrorConfig,
        transport: Arc<dyn Transport>,
        builder: PayloadBuilder,
        send_timeout: Duration,
    ) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| {
            TreblleError::Config("the batch error collector needs a Tokio runtime".into())
        })?;
        let config = config.normalized();

        let inner = Arc::new(Inner {
            buffer: Mutex::new(Vec::with_capacity(config.batch_size)),
            batch_size: config.batch_size,
            flush_interval: config.flush_interval,
            send_timeout,
            closed: AtomicBool::new(false),
            stop_timer: CancellationToken::new(),
            sends: TaskTracker::new(),
            batches_sent: AtomicU64::new(0),
            transport,
            builder,
            handle,
        });
        Self::spawn_timer(&inner);

        Ok(Self { inner })
    }

    fn spawn_timer(inner: &Arc<Inner>) {
        let weak = Arc::downgrade(inner);
        let stop = inner.stop_timer.clone();
        let period = inner.flush_interval;

        inner.handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => match weak.upgrade() {
                        Some(inner) => inner.flush(),
                        None => break,
                    },
                }
            }
        });
    }

    /// Buffer a record, flushing when the batch is full.
    ///
    /// The closed flag is read under the buffer lock, so a record either
    /// lands before the final flush of [`close`](Self::close) or is dropped.
    pub fn add(&self, record: ErrorRecord) {
        let full = {
            let mut buffer = self.inner.lock();
            if self.inner.closed.load(Ordering::Acquire) {
                drop(buffer);
                debug!(message = %record.message, "Batch error collector is closed, record dropped");
                return;
            }
            buffer.push(record);
            (buffer.len() >= self.inner.batch_size).then(|| std::mem::take(&mut *buffer))
        };
        if let Some(batch) = full {
            self.inner.send(batch);
        }
    }

    /// Send whatever is buffered now.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Stop the timer, flush and wait for in-flight sends. Idempotent.
    pub async fn close(&self) {
        let remaining = {
            let mut buffer = self.inner.lock();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *buffer)
        };
        self.inner.stop_timer.cancel();
        if !remaining.is_empty() {
            self.inner.send(remaining);
        }
        self.inner.sends.close();
        self.inner.sends.wait().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.inner.lock().len()
    }

    /// Batches handed to the transport so far.
    pub fn batches_sent(&self) -> u64 {
        self.inner.batches_sent.load(Ordering::Relaxed)
    }

    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    pub fn flush_interval(&self) -> Duration {
        self.inner.flush_interval
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Vec<ErrorRecord>> {
        self.buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn flush(&self) {
        let batch = {
            let mut buffer = self.lock();
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };
        self.send(batch);
    }

    fn send(&self, batch: Vec<ErrorRecord>) {
        let count = batch.len();
        let payload = self.builder.build_errors(batch);
        let transport = Arc::clone(&self.transport);
        let timeout = self.send_timeout;
        self.batches_sent.fetch_add(1, Ordering::Relaxed);

        self.sends.spawn_on(
            async move {
                let outcome = tokio::time::timeout(timeout, transport.send(&payload, timeout))
                    .await
                    .unwrap_or(Err(TreblleError::Timeout(timeout)));
                match outcome {
                    Ok(()) => debug!(count, "Error batch delivered to Treblle"),
                    Err(error) => warn!(count, error = %error, "Failed to deliver error batch"),
                }
            },
            &self.handle,
        );
    }
}

impl std::fmt::Debug for BatchErrorCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchErrorCollector")
            .field("batch_size", &self.inner.batch_size)
            .field("flush_interval", &self.inner.flush_interval)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
