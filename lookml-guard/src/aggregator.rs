//! Insert-once accumulation of terminal outcomes.

use std::collections::BTreeSet;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::{Batch, Completeness, Outcome, ReportKey, UnitId, ValidationReport};
use crate::error::Result;
use crate::logging::{truncate_message, MAX_LOGGED_MESSAGE};

/// The single writer of a run's [`ValidationReport`].
///
/// Outcomes may arrive in any order from concurrent units and isolations.
/// Each insert runs in one critical section; writing a key twice fails with
/// [`GuardError::AggregationLogic`](crate::error::GuardError::AggregationLogic).
#[derive(Debug, Default)]
pub struct Aggregator {
    report: Mutex<ValidationReport>,
}

impl Aggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one terminal outcome.
    pub async fn record(&self, key: ReportKey, outcome: Outcome) -> Result<()> {
        if outcome.is_failed() {
            warn!(
                key = %key,
                message = %truncate_message(outcome.message().unwrap_or_default(), MAX_LOGGED_MESSAGE),
                "Recorded failure"
            );
        }
        self.report.lock().await.insert(key, outcome)
    }

    /// Records `outcome` for every field of `batch` in one critical section.
    pub async fn record_batch(&self, batch: &Batch, outcome: &Outcome) -> Result<()> {
        let mut report = self.report.lock().await;
        for field in batch.fields() {
            report.insert(
                ReportKey::field(batch.unit().clone(), field.id.clone()),
                outcome.clone(),
            )?;
        }
        debug!(batch = %batch.id(), fields = batch.len(), outcome = outcome.label(), "Recorded batch");
        Ok(())
    }

    /// Replaces everything recorded for `unit` with a single unit-level entry.
    pub async fn abort_unit(&self, unit: &UnitId, outcome: Outcome) -> Result<()> {
        let mut report = self.report.lock().await;
        report.remove_unit(unit);
        report.insert(ReportKey::unit(unit.clone()), outcome)
    }

    /// Returns true if any `Failed` entry has been recorded.
    pub async fn has_failures(&self) -> bool {
        self.report.lock().await.has_failures()
    }

    /// Entries recorded for `unit` so far.
    pub async fn unit_entries(&self, unit: &UnitId) -> Vec<(ReportKey, Outcome)> {
        self.report
            .lock()
            .await
            .unit_entries(unit)
            .map(|(key, outcome)| (key.clone(), outcome.clone()))
            .collect()
    }

    /// Finishes the run. Entries of `unresolved` units are discarded and the
    /// report is marked partial if any unit is listed.
    pub fn finish(self, unresolved: BTreeSet<UnitId>) -> ValidationReport {
        let mut report = self.report.into_inner();
        if !unresolved.is_empty() {
            for unit in &unresolved {
                report.remove_unit(unit);
            }
            report.set_completeness(Completeness::Partial {
                unresolved: unresolved.into_iter().collect(),
            });
        }
        report
    }
}
