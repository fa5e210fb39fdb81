//! In-memory [`Transport`] for tests that should not touch the network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use treblle_core::{Payload, Result, Transport, TreblleError};

/// Records every payload it is asked to send.
///
/// A configured delay is applied before recording, and the per-call
/// timeout is honored the same way a network transport would.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    payloads: Mutex<Vec<Payload>>,
    attempts: AtomicUsize,
    delay: Option<Duration>,
    fail_status: Option<u16>,
    arrived: Notify,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every send.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reject every send as if the endpoint answered `status`.
    pub fn failing(mut self, status: u16) -> Self {
        self.fail_status = Some(status);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Payload>> {
        self.payloads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Successfully recorded payloads, in completion order.
    pub fn payloads(&self) -> Vec<Payload> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `send` calls, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` payloads are recorded.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.arrived.notified();
                if self.len() >= n {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, payload: &Payload, timeout: Duration) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(TreblleError::Timeout(timeout));
            }
            tokio::time::sleep(delay).await;
        }

        if let Some(status) = self.fail_status {
            return Err(TreblleError::Status {
                status,
                endpoint: "recording".to_string(),
            });
        }

        self.lock().push(payload.clone());
        self.arrived.notify_waiters();
        Ok(())
    }
}
