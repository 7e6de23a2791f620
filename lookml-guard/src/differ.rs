//! Subtracts baseline failures from a run, leaving the newly introduced ones.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{Outcome, RunResult, Scope, UnitId, ValidationReport};
use crate::error::{GuardError, Result};

/// The run a branch is compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum Baseline {
    /// A complete report of the baseline branch
    Report(ValidationReport),
    /// The baseline could not be produced
    Unavailable {
        /// Why the baseline is missing
        reason: String,
    },
}

impl Baseline {
    /// Wraps the result of a baseline run. Failed runs are unavailable.
    pub fn from_run(result: Result<RunResult>) -> Self {
        match result {
            Ok(run) => Self::Report(run.report),
            Err(err) => Self::Unavailable {
                reason: format!("baseline run failed: {err}"),
            },
        }
    }

    /// Parses a baseline report saved by a previous run.
    pub fn from_json(json: &str) -> Self {
        match ValidationReport::from_json(json) {
            Ok(report) => Self::Report(report),
            Err(err) => Self::Unavailable {
                reason: format!("baseline report could not be read: {err}"),
            },
        }
    }
}

/// Failures introduced by the branch under review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    /// `Failed` entries of the current run that the baseline does not share
    pub new_failures: ValidationReport,
    /// Number of current failures suppressed as pre-existing
    pub suppressed: usize,
    /// Entries of the current run that could not be compared: fatal entries,
    /// and failures of units the baseline could not validate
    pub unvalidated: ValidationReport,
}

impl DiffReport {
    /// Returns true if the branch introduced failures.
    pub fn has_new_failures(&self) -> bool {
        !self.new_failures.is_empty()
    }
}

/// Compares a current report to a baseline by stable key.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementalDiffer {
    compare_messages: bool,
}

impl IncrementalDiffer {
    /// A differ that suppresses any key failing in both reports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also require identical messages before suppressing a failure.
    pub fn with_message_comparison(mut self, enabled: bool) -> Self {
        self.compare_messages = enabled;
        self
    }

    fn identically_failed(&self, current: &Outcome, baseline: Option<&Outcome>) -> bool {
        baseline.is_some_and(|baseline| {
            baseline.is_failed() && (!self.compare_messages || baseline.message() == current.message())
        })
    }

    /// Keeps the keys that are `Failed` in `current` and not identically
    /// `Failed` in `baseline`. Neither input is modified.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::IncrementalUnavailable`] if the baseline is
    /// unavailable, partial, or every one of its units failed fatally. A
    /// missing baseline is never treated as empty.
    ///
    /// Current failures of a unit that the baseline aborted with a fatal error
    /// are neither new nor suppressed; they are listed under `unvalidated`.
    pub fn diff(&self, current: &ValidationReport, baseline: &Baseline) -> Result<DiffReport> {
        let baseline = match baseline {
            Baseline::Report(report) if report.is_complete() => report,
            Baseline::Report(_) => {
                warn!("Baseline report is partial, incremental mode unavailable");
                return Err(GuardError::IncrementalUnavailable(
                    "baseline report is partial".to_string(),
                ));
            }
            Baseline::Unavailable { reason } => {
                warn!(reason = %reason, "Incremental mode unavailable");
                return Err(GuardError::IncrementalUnavailable(reason.clone()));
            }
        };

        let aborted = aborted_units(baseline);
        if !aborted.is_empty() && aborted.len() == baseline.units().len() {
            warn!(units = aborted.len(), "Every baseline unit failed fatally");
            return Err(GuardError::IncrementalUnavailable(
                "every baseline unit failed fatally".to_string(),
            ));
        }

        let mut new_failures = current.clone();
        let mut suppressed = 0;
        new_failures.retain(|key, outcome| {
            if !outcome.is_failed() || aborted.contains(&key.unit) {
                return false;
            }
            if self.identically_failed(outcome, baseline.get(key)) {
                suppressed += 1;
                return false;
            }
            true
        });

        let mut unvalidated = current.clone();
        unvalidated.retain(|key, outcome| {
            outcome.is_fatal() || (outcome.is_failed() && aborted.contains(&key.unit))
        });
        if !aborted.is_empty() {
            warn!(
                units = aborted.len(),
                "Baseline could not validate some units, their failures are not compared"
            );
        }

        info!(
            new_failures = new_failures.len(),
            suppressed,
            unvalidated = unvalidated.len(),
            "Compared against baseline"
        );
        Ok(DiffReport {
            new_failures,
            suppressed,
            unvalidated,
        })
    }
}

/// Units whose baseline entry is a unit-level fatal error.
fn aborted_units(baseline: &ValidationReport) -> BTreeSet<&UnitId> {
    baseline
        .entries()
        .filter(|(key, outcome)| key.scope == Scope::Unit && outcome.is_fatal())
        .map(|(key, _)| &key.unit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Completeness, ReportKey, UnitId};

    fn key(field: &str) -> ReportKey {
        ReportKey::field(UnitId::new("sales", "orders"), field)
    }

    fn report(entries: &[(&str, Outcome)]) -> ValidationReport {
        let mut report = ValidationReport::new();
        for (field, outcome) in entries {
            report.insert(key(field), outcome.clone()).unwrap();
        }
        report
    }

    #[test]
    fn test_shared_failures_are_suppressed() {
        let current = report(&[
            ("a", Outcome::failed("old", None)),
            ("b", Outcome::failed("new", None)),
            ("c", Outcome::Passed),
            ("d", Outcome::failed("was passing", None)),
        ]);
        let baseline = report(&[
            ("a", Outcome::failed("old", None)),
            ("c", Outcome::failed("fixed on branch", None)),
            ("d", Outcome::Passed),
        ]);
        let snapshot = current.clone();

        let diff = IncrementalDiffer::new()
            .diff(&current, &Baseline::Report(baseline))
            .unwrap();
        let keys: Vec<String> = diff.new_failures.entries().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["sales/orders:b", "sales/orders:d"]);
        assert_eq!(diff.suppressed, 1);
        assert!(diff.has_new_failures());
        assert_eq!(current, snapshot);
    }

    #[test]
    fn test_message_comparison() {
        let current = report(&[("a", Outcome::failed("column x missing", None))]);
        let baseline = Baseline::Report(report(&[("a", Outcome::failed("column y missing", None))]));

        let by_key = IncrementalDiffer::new().diff(&current, &baseline).unwrap();
        assert!(!by_key.has_new_failures());

        let by_message = IncrementalDiffer::new()
            .with_message_comparison(true)
            .diff(&current, &baseline)
            .unwrap();
        assert_eq!(by_message.new_failures.len(), 1);
    }

    #[test]
    fn test_unavailable_baseline_is_an_error() {
        let current = report(&[("a", Outcome::failed("bad", None))]);
        let err = IncrementalDiffer::new()
            .diff(
                &current,
                &Baseline::Unavailable {
                    reason: "checkout failed".to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, GuardError::IncrementalUnavailable(_)));
    }

    #[test]
    fn test_partial_baseline_is_unavailable() {
        let current = report(&[("a", Outcome::failed("bad", None))]);
        let mut partial = report(&[]);
        partial.set_completeness(Completeness::Partial {
            unresolved: vec![UnitId::new("sales", "orders")],
        });
        let err = IncrementalDiffer::new()
            .diff(&current, &Baseline::Report(partial))
            .unwrap_err();
        assert!(matches!(err, GuardError::IncrementalUnavailable(_)));
    }

    #[test]
    fn test_fatal_entries_are_listed_separately() {
        let mut current = report(&[]);
        current
            .insert(
                ReportKey::unit(UnitId::new("sales", "returns")),
                Outcome::fatal("404 explore not found"),
            )
            .unwrap();
        let diff = IncrementalDiffer::new()
            .diff(&current, &Baseline::Report(report(&[])))
            .unwrap();
        assert!(!diff.has_new_failures());
        assert_eq!(diff.unvalidated.len(), 1);
    }

    #[test]
    fn test_failures_of_units_aborted_on_baseline_are_not_new() {
        let current = report(&[
            ("a", Outcome::Passed),
            ("b", Outcome::failed("Unknown column 'b'", None)),
        ]);
        let mut current_with_other = current.clone();
        let returns = UnitId::new("sales", "returns");
        current_with_other
            .insert(
                ReportKey::field(returns.clone(), "r"),
                Outcome::failed("Unknown column 'r'", None),
            )
            .unwrap();

        let mut baseline = ValidationReport::new();
        baseline
            .insert(
                ReportKey::unit(UnitId::new("sales", "orders")),
                Outcome::fatal("401 Unauthorized"),
            )
            .unwrap();
        baseline
            .insert(ReportKey::field(returns, "r"), Outcome::Passed)
            .unwrap();

        let diff = IncrementalDiffer::new()
            .diff(&current_with_other, &Baseline::Report(baseline))
            .unwrap();
        let new: Vec<String> = diff.new_failures.entries().map(|(k, _)| k.to_string()).collect();
        assert_eq!(new, vec!["sales/returns:r"]);
        assert_eq!(diff.suppressed, 0);
        assert!(diff.unvalidated.get(&key("b")).is_some());
        assert!(diff.unvalidated.get(&key("a")).is_none());
    }

    #[test]
    fn test_all_fatal_baseline_is_unavailable() {
        let current = report(&[("b", Outcome::failed("Unknown column 'b'", None))]);
        let mut baseline = ValidationReport::new();
        baseline
            .insert(
                ReportKey::unit(UnitId::new("sales", "orders")),
                Outcome::fatal("401 Unauthorized"),
            )
            .unwrap();

        let err = IncrementalDiffer::new()
            .diff(&current, &Baseline::Report(baseline))
            .unwrap_err();
        assert!(matches!(err, GuardError::IncrementalUnavailable(_)));
    }

    #[test]
    fn test_baseline_from_json() {
        assert!(matches!(Baseline::from_json("not json"), Baseline::Unavailable { .. }));
        let saved = report(&[("a", Outcome::Passed)]).to_json_pretty().unwrap();
        assert!(matches!(Baseline::from_json(&saved), Baseline::Report(_)));
    }
}
