//! Run configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dispatch::RetryPolicy;
use crate::error::{GuardError, Result};
use crate::selector::SelectorResolver;

/// Parameters of a validation run.
///
/// Every value is checked by [`validate`](Self::validate) before the run
/// starts; building a runner calls it for you.
///
/// ```rust
/// use std::time::Duration;
/// use lookml_guard::config::ValidatorConfig;
///
/// let config = ValidatorConfig::new()
///     .with_concurrency(4)
///     .with_batch_size(200)
///     .with_call_timeout(Duration::from_secs(120))
///     .with_selectors(["sales/*", "-sales/legacy_orders"]);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    concurrency: usize,
    batch_size: usize,
    call_timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
    jitter: bool,
    adaptive_batching: bool,
    incremental: bool,
    baseline: Option<String>,
    selectors: Vec<String>,
    exclude_hidden: bool,
    run_timeout: Option<Duration>,
    runtime_threshold: Option<Duration>,
    fail_fast: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            batch_size: 500,
            call_timeout: Duration::from_secs(600),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            jitter: true,
            adaptive_batching: true,
            incremental: false,
            baseline: None,
            selectors: Vec::new(),
            exclude_hidden: false,
            run_timeout: None,
            runtime_threshold: None,
            fail_fast: false,
        }
    }
}

impl ValidatorConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of remote calls in flight.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the target number of fields per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the timeout of a single remote call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the number of retries after a transient failure.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Enable or disable backoff jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Enable or disable re-splitting of batches that fail for capacity reasons.
    pub fn with_adaptive_batching(mut self, enabled: bool) -> Self {
        self.adaptive_batching = enabled;
        self
    }

    /// Report only failures that the baseline does not share.
    pub fn with_incremental(mut self, enabled: bool) -> Self {
        self.incremental = enabled;
        self
    }

    /// Set the baseline identifier (a branch name or saved report).
    pub fn with_baseline(mut self, baseline: impl Into<String>) -> Self {
        self.baseline = Some(baseline.into());
        self
    }

    /// Set the selector patterns.
    pub fn with_selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selectors = selectors.into_iter().map(Into::into).collect();
        self
    }

    /// Skip fields marked hidden.
    pub fn with_exclude_hidden(mut self, enabled: bool) -> Self {
        self.exclude_hidden = enabled;
        self
    }

    /// Cancel the run cooperatively after `timeout`.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Profile calls slower than `threshold`.
    pub fn with_runtime_threshold(mut self, threshold: Duration) -> Self {
        self.runtime_threshold = Some(threshold);
        self
    }

    /// Record failing batches without isolating them.
    pub fn with_fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    /// Maximum number of remote calls in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Target number of fields per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Timeout of a single remote call.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Retry policy for transient failures.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
            jitter: self.jitter,
        }
    }

    /// Whether capacity failures are re-split.
    pub fn adaptive_batching(&self) -> bool {
        self.adaptive_batching
    }

    /// Whether incremental mode is enabled.
    pub fn incremental(&self) -> bool {
        self.incremental
    }

    /// The baseline identifier.
    pub fn baseline(&self) -> Option<&str> {
        self.baseline.as_deref()
    }

    /// The selector patterns.
    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    /// Whether hidden fields are skipped.
    pub fn exclude_hidden(&self) -> bool {
        self.exclude_hidden
    }

    /// Whole-run timeout.
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout
    }

    /// Slow-query threshold.
    pub fn runtime_threshold(&self) -> Option<Duration> {
        self.runtime_threshold
    }

    /// Whether failing batches are recorded without isolation. Always false
    /// in incremental mode.
    pub fn fail_fast(&self) -> bool {
        self.fail_fast && !self.incremental
    }

    /// Checks every value.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Configuration`] listing every problem found, or
    /// [`GuardError::Selector`] if a selector pattern cannot be parsed.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.concurrency < 1 {
            problems.push("concurrency must be at least 1".to_string());
        }
        if self.batch_size < 1 {
            problems.push("batch_size must be at least 1".to_string());
        }
        if self.call_timeout.is_zero() {
            problems.push("call_timeout must be greater than zero".to_string());
        }
        if self.max_retries > 0 && self.backoff_base.is_zero() {
            problems.push("backoff_base must be greater than zero when retries are enabled".to_string());
        }
        if self.run_timeout.is_some_and(|t| t.is_zero()) {
            problems.push("run_timeout must be greater than zero".to_string());
        }
        match &self.baseline {
            Some(baseline) if baseline.trim().is_empty() => {
                problems.push("baseline must not be empty".to_string());
            }
            None if self.incremental => {
                problems.push("incremental mode requires a baseline".to_string());
            }
            _ => {}
        }
        if !problems.is_empty() {
            return Err(GuardError::Configuration(problems.join("; ")));
        }

        SelectorResolver::new(&self.selectors)?;

        if self.fail_fast && self.incremental {
            warn!("fail_fast is ignored in incremental mode");
        }
        Ok(())
    }
}
