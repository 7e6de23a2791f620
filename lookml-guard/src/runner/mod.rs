//! Orchestration of a validation run.
//!
//! ```text
//! inventory ─> SelectorResolver ─> Batcher ─> Dispatcher (shared permits)
//!                                               │  Passed ──────────────> Aggregator
//!                                               │  capacity failure ─> resplit ─┐
//!                                               │  Failed ─> FaultIsolator ─────┤
//!                                               │  FatalError ─> abort unit     │
//!                                               └<──────────────────────────────┘
//! ```
//!
//! Units are processed concurrently. Within a unit, top-level batches,
//! re-split chunks and isolations are all driven from one work set, so every
//! outstanding call keeps making progress while others wait for permits.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregator::Aggregator;
use crate::batcher::Batcher;
use crate::cache::{CacheKey, CachedUnit, ResultCache};
use crate::config::ValidatorConfig;
use crate::core::{
    Batch, FailureCause, Outcome, ReportKey, RunResult, RunStats, SkipReason, Unit, UnitId,
};
use crate::differ::{Baseline, DiffReport, IncrementalDiffer};
use crate::dispatch::{CancellationSignal, Dispatcher, RemoteValidator};
use crate::error::{GuardError, Result};
use crate::inventory::InventoryProvider;
use crate::isolator::{FaultIsolator, Isolation, IsolationEnd};
use crate::selector::SelectorResolver;

/// Result of an incremental run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalRun {
    /// The full run of the branch under review
    pub current: RunResult,
    /// Failures the baseline does not share
    pub diff: DiffReport,
}

/// State shared by every unit of one run.
struct RunContext {
    dispatcher: Dispatcher,
    aggregator: Aggregator,
    resplits: AtomicU64,
    isolation_calls: AtomicU64,
    cached_units: AtomicUsize,
}

/// How explicit selectors that match nothing are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    /// They are a selector error
    Strict,
    /// They select nothing; used for baselines, where new units are absent
    Available,
}

enum Work {
    Dispatched(Batch, Result<Outcome>),
    Isolated(Result<Isolation>),
}

fn dispatch_work(dispatcher: &Dispatcher, batch: Batch) -> BoxFuture<'_, Work> {
    async move {
        let result = dispatcher.dispatch(&batch).await;
        Work::Dispatched(batch, result)
    }
    .boxed()
}

/// Runs the validation pipeline for one configuration.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use lookml_guard::config::ValidatorConfig;
/// use lookml_guard::runner::ValidationRunner;
/// # use lookml_guard::dispatch::RemoteValidator;
/// # use lookml_guard::inventory::StaticInventory;
///
/// # async fn example(remote: Arc<dyn RemoteValidator>, inventory: StaticInventory)
/// #     -> Result<(), Box<dyn std::error::Error>> {
/// let runner = ValidationRunner::builder(ValidatorConfig::new().with_selectors(["sales/*"]))
///     .inventory(inventory)
///     .remote(remote)
///     .build()?;
///
/// let result = runner.run().await?;
/// for (key, outcome) in result.report.failures() {
///     println!("{key}: {outcome}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct ValidationRunner {
    config: ValidatorConfig,
    resolver: SelectorResolver,
    batcher: Batcher,
    inventory: Arc<dyn InventoryProvider>,
    remote: Arc<dyn RemoteValidator>,
    cache: Option<Arc<dyn ResultCache>>,
}

impl std::fmt::Debug for ValidationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationRunner")
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl ValidationRunner {
    /// Starts building a runner for `config`.
    pub fn builder(config: ValidatorConfig) -> ValidationRunnerBuilder {
        ValidationRunnerBuilder::new(config)
    }

    /// The configuration of the runner.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Runs the pipeline to completion or until the run timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns an error if the inventory cannot be listed, a selector matches
    /// nothing, or an outcome is recorded twice. Per-unit failures are part
    /// of the report, not errors.
    pub async fn run(&self) -> Result<RunResult> {
        self.run_with_signal(CancellationSignal::never(), Selection::Strict)
            .await
    }

    /// Runs the pipeline until done or until `true` is sent on `abort`.
    ///
    /// A cancelled run returns a partial report that contains only fully
    /// resolved units and lists the others as unresolved.
    pub async fn run_with_cancellation(&self, abort: watch::Receiver<bool>) -> Result<RunResult> {
        self.run_with_signal(CancellationSignal::from_receiver(abort), Selection::Strict)
            .await
    }

    /// Runs this pipeline and `baseline`, then keeps only failures the
    /// baseline does not share.
    ///
    /// Units named explicitly by the baseline's selectors but missing from its
    /// inventory are absent from the baseline, so their failures are new.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::IncrementalUnavailable`] if the baseline run
    /// fails or does not complete.
    pub async fn run_incremental(&self, baseline: &ValidationRunner) -> Result<IncrementalRun> {
        let current = self.run().await?;
        let baseline_run = baseline
            .run_with_signal(CancellationSignal::never(), Selection::Available)
            .await;
        let baseline = match baseline_run {
            Ok(run) if !run.report.is_complete() => Baseline::Unavailable {
                reason: "baseline run did not complete".to_string(),
            },
            other => Baseline::from_run(other),
        };
        let diff = IncrementalDiffer::new().diff(&current.report, &baseline)?;
        Ok(IncrementalRun { current, diff })
    }

    #[instrument(skip_all, fields(batch_size = self.batcher.batch_size(), concurrency = self.config.concurrency()))]
    async fn run_with_signal(
        &self,
        signal: CancellationSignal,
        selection: Selection,
    ) -> Result<RunResult> {
        let started = Instant::now();
        let mut stats = RunStats::started();
        let signal = match self.config.run_timeout() {
            Some(timeout) => signal.with_deadline(started + timeout),
            None => signal,
        };

        let inventory = self.inventory.units().await?;
        let selected = match selection {
            Selection::Strict => self.resolver.resolve(&inventory)?,
            Selection::Available => self.resolver.resolve_available(&inventory),
        };
        stats.units = selected.len();
        info!(
            units = selected.len(),
            inventory = inventory.len(),
            "Starting validation run"
        );

        let ctx = RunContext {
            dispatcher: Dispatcher::new(
                self.remote.clone(),
                self.config.concurrency(),
                self.config.retry_policy(),
                self.config.call_timeout(),
            )?
            .with_cancellation(signal)
            .with_runtime_threshold(self.config.runtime_threshold()),
            aggregator: Aggregator::new(),
            resplits: AtomicU64::new(0),
            isolation_calls: AtomicU64::new(0),
            cached_units: AtomicUsize::new(0),
        };

        let snapshot: Vec<(UnitId, Result<Vec<_>>)> = stream::iter(selected)
            .map(|id| async move {
                let fields = self.inventory.fields(&id).await;
                (id, fields)
            })
            .buffered(self.config.concurrency())
            .collect()
            .await;

        let mut units = Vec::with_capacity(snapshot.len());
        for (id, fields) in snapshot {
            match fields {
                Ok(fields) => units.push(Unit::new(id, fields)),
                Err(err) => {
                    error!(unit = %id, error = %err, "Could not read unit fields");
                    ctx.aggregator
                        .record(ReportKey::unit(id), Outcome::fatal(err.to_string()))
                        .await?;
                }
            }
        }

        let mut unresolved = BTreeSet::new();
        {
            let mut pending: FuturesUnordered<_> = units
                .iter()
                .map(|unit| {
                    let ctx = &ctx;
                    async move { (&unit.id, self.process_unit(unit, ctx).await) }
                })
                .collect();
            while let Some((unit, result)) = pending.next().await {
                match result {
                    Ok(()) => debug!(unit = %unit, "Unit resolved"),
                    Err(GuardError::Cancelled) => {
                        unresolved.insert(unit.clone());
                    }
                    Err(err) => {
                        error!(unit = %unit, error = %err, "Aborting run");
                        return Err(err);
                    }
                }
            }
        }
        if !unresolved.is_empty() {
            warn!(unresolved = unresolved.len(), "Run cancelled, report is partial");
        }

        let dispatch_stats = ctx.dispatcher.stats();
        stats.remote_calls = dispatch_stats.remote_calls;
        stats.retries = dispatch_stats.retries;
        stats.slow_queries = ctx.dispatcher.take_slow_queries();
        stats.resplits = ctx.resplits.load(Ordering::Relaxed);
        stats.isolation_calls = ctx.isolation_calls.load(Ordering::Relaxed);
        stats.cached_units = ctx.cached_units.load(Ordering::Relaxed);
        stats.elapsed = started.elapsed();

        let report = ctx.aggregator.finish(unresolved);
        let summary = report.summary();
        info!(
            units = stats.units,
            remote_calls = stats.remote_calls,
            retries = stats.retries,
            failed_fields = summary.failed_fields,
            unvalidated = summary.unvalidated,
            complete = report.is_complete(),
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Validation run finished"
        );
        Ok(RunResult { report, stats })
    }

    async fn process_unit<'c>(&self, unit: &Unit, ctx: &'c RunContext) -> Result<()> {
        let mut batches = self.batcher.batches(unit).peekable();
        if batches.peek().is_none() {
            debug!(unit = %unit.id, "No fields to validate");
            return ctx
                .aggregator
                .record(
                    ReportKey::unit(unit.id.clone()),
                    Outcome::Skipped {
                        reason: SkipReason::NoFields,
                    },
                )
                .await;
        }

        let cache_key = self
            .cache
            .as_ref()
            .map(|_| CacheKey::for_unit(unit, &self.batcher, &self.config));
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key).await {
                debug!(unit = %unit.id, entries = hit.entries.len(), "Replaying cached result");
                for (scope, outcome) in hit.entries {
                    let key = ReportKey {
                        unit: unit.id.clone(),
                        scope,
                    };
                    ctx.aggregator.record(key, outcome).await?;
                }
                ctx.cached_units.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        let mut work: FuturesUnordered<BoxFuture<'c, Work>> = batches
            .map(|batch| dispatch_work(&ctx.dispatcher, batch))
            .collect();

        while let Some(item) = work.next().await {
            match item {
                Work::Dispatched(batch, result) => match result? {
                    Outcome::Passed => {
                        ctx.aggregator.record_batch(&batch, &Outcome::Passed).await?;
                    }
                    fatal @ Outcome::FatalError { .. } => {
                        return self.abort_unit(unit, fatal, ctx).await;
                    }
                    Outcome::Failed {
                        cause: FailureCause::TransientExhausted(kind),
                        ..
                    } if self.config.adaptive_batching() && kind.is_capacity() && batch.len() > 1 => {
                        ctx.resplits.fetch_add(1, Ordering::Relaxed);
                        for chunk in self.batcher.resplit(&batch) {
                            work.push(dispatch_work(&ctx.dispatcher, chunk));
                        }
                    }
                    failed if self.config.fail_fast() => {
                        let key = if batch.len() == 1 {
                            ReportKey::field(unit.id.clone(), batch.first_field())
                        } else {
                            ReportKey::span(unit.id.clone(), batch.first_field(), batch.last_field())
                        };
                        ctx.aggregator.record(key, failed).await?;
                    }
                    failed => {
                        let isolator = FaultIsolator::new(&ctx.dispatcher, &ctx.aggregator);
                        work.push(
                            async move { Work::Isolated(isolator.isolate(batch, failed).await) }
                                .boxed(),
                        );
                    }
                },
                Work::Isolated(result) => {
                    let isolation = result?;
                    ctx.isolation_calls
                        .fetch_add(isolation.calls, Ordering::Relaxed);
                    if let IsolationEnd::Aborted(fatal) = isolation.end {
                        return self.abort_unit(unit, fatal, ctx).await;
                    }
                }
            }
        }

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            let entries: Vec<_> = ctx
                .aggregator
                .unit_entries(&unit.id)
                .await
                .into_iter()
                .map(|(key, outcome)| (key.scope, outcome))
                .collect();
            if entries.iter().all(|(_, outcome)| !outcome.is_unvalidated()) {
                cache.put(key, CachedUnit { entries }).await;
            }
        }
        Ok(())
    }

    async fn abort_unit(&self, unit: &Unit, fatal: Outcome, ctx: &RunContext) -> Result<()> {
        error!(unit = %unit.id, outcome = %fatal, "Aborting unit");
        ctx.aggregator.abort_unit(&unit.id, fatal).await
    }
}

/// Builder for [`ValidationRunner`].
pub struct ValidationRunnerBuilder {
    config: ValidatorConfig,
    inventory: Option<Arc<dyn InventoryProvider>>,
    remote: Option<Arc<dyn RemoteValidator>>,
    cache: Option<Arc<dyn ResultCache>>,
}

impl ValidationRunnerBuilder {
    /// Creates a builder for `config`.
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            inventory: None,
            remote: None,
            cache: None,
        }
    }

    /// Sets the inventory provider.
    pub fn inventory<I>(mut self, inventory: I) -> Self
    where
        I: InventoryProvider + 'static,
    {
        self.inventory = Some(Arc::new(inventory));
        self
    }

    /// Sets the remote validator.
    pub fn remote<R>(mut self, remote: R) -> Self
    where
        R: RemoteValidator + 'static,
    {
        self.remote = Some(Arc::new(remote));
        self
    }

    /// Sets a result cache. Runs without a cache never skip remote calls.
    pub fn cache<C>(mut self, cache: C) -> Self
    where
        C: ResultCache + 'static,
    {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Validates the configuration and builds the runner.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Configuration`] for invalid values or missing
    /// collaborators, and [`GuardError::Selector`] for unparseable selectors.
    pub fn build(self) -> Result<ValidationRunner> {
        self.config.validate()?;
        let inventory = self.inventory.ok_or_else(|| {
            GuardError::Configuration("an inventory provider is required".to_string())
        })?;
        let remote = self.remote.ok_or_else(|| {
            GuardError::Configuration("a remote validator is required".to_string())
        })?;
        Ok(ValidationRunner {
            resolver: SelectorResolver::new(self.config.selectors())?,
            batcher: Batcher::new(self.config.batch_size(), self.config.exclude_hidden())?,
            config: self.config,
            inventory,
            remote,
            cache: self.cache,
        })
    }
}

#[cfg(test)]
mod tests;
