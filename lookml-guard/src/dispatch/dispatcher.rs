//! Bounded-concurrency dispatch of batches with timeout and retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, instrument, warn};

use super::{CancellationSignal, RemoteResponse, RemoteValidator, RetryPolicy, ValidationRequest};
use crate::core::{Batch, Outcome, SlowQuery, TransientKind};
use crate::error::{GuardError, Result};
use crate::logging::{truncate_message, MAX_LOGGED_MESSAGE};

/// Snapshot of the dispatcher's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Remote calls issued, retries included
    pub remote_calls: u64,
    /// Attempts that retried an earlier attempt
    pub retries: u64,
}

/// Issues remote validation calls under a single shared permit pool.
///
/// Every batch of a run goes through the same dispatcher, including the halves
/// produced by isolation, so the concurrency ceiling holds for the whole run.
pub struct Dispatcher {
    remote: Arc<dyn RemoteValidator>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    policy: RetryPolicy,
    call_timeout: Duration,
    cancel: CancellationSignal,
    runtime_threshold: Option<Duration>,
    remote_calls: AtomicU64,
    retries: AtomicU64,
    slow_queries: Mutex<Vec<SlowQuery>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("concurrency", &self.concurrency)
            .field("policy", &self.policy)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher allowing `concurrency` calls in flight.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Configuration`] if `concurrency` is zero or the
    /// call timeout is zero.
    pub fn new(
        remote: Arc<dyn RemoteValidator>,
        concurrency: usize,
        policy: RetryPolicy,
        call_timeout: Duration,
    ) -> Result<Self> {
        if concurrency < 1 {
            return Err(GuardError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if call_timeout.is_zero() {
            return Err(GuardError::Configuration(
                "call timeout must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            remote,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            policy,
            call_timeout,
            cancel: CancellationSignal::never(),
            runtime_threshold: None,
            remote_calls: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            slow_queries: Mutex::new(Vec::new()),
        })
    }

    /// Sets the cancellation signal observed before every call and backoff.
    pub fn with_cancellation(mut self, cancel: CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Records calls slower than `threshold` in the slow-query profile.
    pub fn with_runtime_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.runtime_threshold = threshold;
        self
    }

    /// Maximum number of calls in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Validates `batch`, retrying transient failures.
    ///
    /// Returns the terminal outcome of the batch: `Passed`, `Failed` (content
    /// or retries exhausted) or `FatalError`. Never returns `TransientError`.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Cancelled`] if the run is cancelled before the
    /// batch resolves; any in-flight call is abandoned.
    #[instrument(skip(self, batch), fields(batch = %batch.id(), fields = batch.len()))]
    pub async fn dispatch(&self, batch: &Batch) -> Result<Outcome> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let response = self.attempt(batch, attempt).await?;

            match response {
                RemoteResponse::Valid { runtime } => {
                    self.profile(batch, runtime);
                    debug!(attempt, "Batch passed");
                    return Ok(Outcome::Passed);
                }
                RemoteResponse::Invalid {
                    message,
                    location,
                    runtime,
                } => {
                    self.profile(batch, runtime);
                    debug!(
                        attempt,
                        message = %truncate_message(&message, MAX_LOGGED_MESSAGE),
                        "Batch failed"
                    );
                    return Ok(Outcome::failed(message, location));
                }
                RemoteResponse::Fatal { message } => {
                    error!(
                        unit = %batch.unit(),
                        message = %truncate_message(&message, MAX_LOGGED_MESSAGE),
                        "Non-recoverable error from the service"
                    );
                    return Ok(Outcome::fatal(message));
                }
                RemoteResponse::Transport(kind) => {
                    if let Some(outcome) = self.back_off(attempt, kind, None).await? {
                        return Ok(outcome);
                    }
                }
                RemoteResponse::RateLimited { retry_after } => {
                    let kind = TransientKind::RateLimited;
                    if let Some(outcome) = self.back_off(attempt, kind, retry_after).await? {
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    /// One remote call under a permit. The permit is released before any
    /// backoff so waiting batches do not hold capacity.
    async fn attempt(&self, batch: &Batch, attempt: u32) -> Result<RemoteResponse> {
        if self.cancel.is_cancelled() {
            return Err(GuardError::Cancelled);
        }
        let _permit = tokio::select! {
            permit = self.permits.acquire() => permit
                .map_err(|_| GuardError::Internal("dispatch permit pool closed".to_string()))?,
            _ = self.cancel.cancelled() => return Err(GuardError::Cancelled),
        };
        if self.cancel.is_cancelled() {
            return Err(GuardError::Cancelled);
        }

        self.remote_calls.fetch_add(1, Ordering::Relaxed);
        if attempt > 1 {
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
        debug!(attempt, "Dispatching batch");

        let request = ValidationRequest::for_batch(batch, self.call_timeout);
        let call = tokio::time::timeout(self.call_timeout, self.remote.validate(request));
        tokio::select! {
            result = call => Ok(result.unwrap_or(RemoteResponse::Transport(TransientKind::Timeout))),
            _ = self.cancel.cancelled() => {
                debug!(attempt, "Abandoning in-flight call");
                Err(GuardError::Cancelled)
            }
        }
    }

    /// Waits before the next attempt, or returns the exhausted outcome when
    /// no retries are left.
    async fn back_off(
        &self,
        attempt: u32,
        kind: TransientKind,
        retry_after: Option<Duration>,
    ) -> Result<Option<Outcome>> {
        if !self.policy.should_retry(attempt) {
            warn!(attempt, kind = %kind, "Retries exhausted");
            return Ok(Some(Outcome::transient_exhausted(kind, attempt)));
        }
        let delay = self.policy.delay(attempt, retry_after);
        warn!(
            attempt,
            kind = %kind,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, retrying"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(None),
            _ = self.cancel.cancelled() => Err(GuardError::Cancelled),
        }
    }

    fn profile(&self, batch: &Batch, runtime: Option<Duration>) {
        let (Some(threshold), Some(runtime)) = (self.runtime_threshold, runtime) else {
            return;
        };
        if runtime <= threshold {
            return;
        }
        debug!(runtime_ms = runtime.as_millis() as u64, "Slow query");
        let mut slow = self
            .slow_queries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slow.push(SlowQuery::new(batch.id(), batch.unit(), batch.len(), runtime));
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            remote_calls: self.remote_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Drains the slow-query profile, slowest first.
    pub fn take_slow_queries(&self) -> Vec<SlowQuery> {
        let mut slow = std::mem::take(
            &mut *self
                .slow_queries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        slow.sort_by(|a, b| {
            b.runtime_secs
                .total_cmp(&a.runtime_secs)
                .then_with(|| a.batch.cmp(&b.batch))
        });
        slow
    }
}
