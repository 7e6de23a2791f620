//! The validation report: terminal outcomes keyed by stable identities.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Outcome, UnitId};
use crate::error::{GuardError, Result};

/// What part of a unit a report entry is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Scope {
    /// The unit as a whole (no fields, or aborted by a fatal error)
    Unit,
    /// A failing batch whose failure could not be pinned on any single field
    Span {
        /// First field of the batch
        first: String,
        /// Last field of the batch
        last: String,
    },
    /// One field
    Field {
        /// The field id
        field: String,
    },
}

/// Stable identity of a report entry across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportKey {
    /// The unit the entry belongs to
    pub unit: UnitId,
    /// The part of the unit the entry is about
    pub scope: Scope,
}

impl ReportKey {
    /// Key of a unit-level entry.
    pub fn unit(unit: UnitId) -> Self {
        Self {
            unit,
            scope: Scope::Unit,
        }
    }

    /// Key of a field-level entry.
    pub fn field(unit: UnitId, field: impl Into<String>) -> Self {
        Self {
            unit,
            scope: Scope::Field {
                field: field.into(),
            },
        }
    }

    /// Key of an unattributed batch failure spanning `first..=last`.
    pub fn span(unit: UnitId, first: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            unit,
            scope: Scope::Span {
                first: first.into(),
                last: last.into(),
            },
        }
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Unit => write!(f, "{}", self.unit),
            Scope::Span { first, last } => write!(f, "{}[{first}..{last}]", self.unit),
            Scope::Field { field } => write!(f, "{}:{field}", self.unit),
        }
    }
}

/// Whether every selected unit was fully resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Completeness {
    /// Every selected unit was resolved
    #[default]
    Complete,
    /// The run stopped early; the listed units have no entries
    Partial {
        /// Units left unresolved, in order
        unresolved: Vec<UnitId>,
    },
}

/// One serialized report entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// The unit the entry belongs to
    pub unit: UnitId,
    /// The part of the unit the entry is about
    #[serde(flatten)]
    pub scope: Scope,
    /// The terminal outcome
    pub outcome: Outcome,
}

#[derive(Serialize, Deserialize)]
struct ReportRepr {
    completeness: Completeness,
    entries: Vec<ReportEntry>,
}

/// Counts of report entries by classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Fields whose queries ran successfully
    pub passed_fields: usize,
    /// Fields confirmed invalid by the service
    pub failed_fields: usize,
    /// Batch failures that could not be attributed to a field
    pub unattributed_failures: usize,
    /// Fields or units that could not be validated
    pub unvalidated: usize,
    /// Units skipped because they have no fields
    pub skipped_units: usize,
}

/// Mapping from stable keys to terminal outcomes.
///
/// Entries are kept sorted by key, so serializing the same report twice, or
/// two reports built from identical outcomes, yields identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ReportRepr", try_from = "ReportRepr")]
pub struct ValidationReport {
    entries: BTreeMap<ReportKey, Outcome>,
    completeness: Completeness,
}

impl ValidationReport {
    /// Creates an empty, complete report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::AggregationLogic`] if the key already has an
    /// outcome, and [`GuardError::Internal`] if the outcome is not terminal.
    pub fn insert(&mut self, key: ReportKey, outcome: Outcome) -> Result<()> {
        if !outcome.is_terminal() {
            return Err(GuardError::Internal(format!(
                "non-terminal outcome '{outcome}' for '{key}'"
            )));
        }
        if let Some(existing) = self.entries.get(&key) {
            return Err(GuardError::AggregationLogic {
                key: key.to_string(),
                existing: existing.to_string(),
                attempted: outcome.to_string(),
            });
        }
        self.entries.insert(key, outcome);
        Ok(())
    }

    /// Returns the outcome stored for `key`.
    pub fn get(&self, key: &ReportKey) -> Option<&Outcome> {
        self.entries.get(key)
    }

    /// Returns the outcome of one field.
    pub fn field_outcome(&self, unit: &UnitId, field: &str) -> Option<&Outcome> {
        self.entries.get(&ReportKey::field(unit.clone(), field))
    }

    /// Iterates over all entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&ReportKey, &Outcome)> {
        self.entries.iter()
    }

    /// Iterates over the entries of one unit.
    pub fn unit_entries<'a>(
        &'a self,
        unit: &'a UnitId,
    ) -> impl Iterator<Item = (&'a ReportKey, &'a Outcome)> + 'a {
        self.entries.iter().filter(move |(key, _)| &key.unit == unit)
    }

    /// Iterates over `Failed` entries.
    pub fn failures(&self) -> impl Iterator<Item = (&ReportKey, &Outcome)> {
        self.entries.iter().filter(|(_, outcome)| outcome.is_failed())
    }

    /// Returns true if any entry is `Failed`.
    pub fn has_failures(&self) -> bool {
        self.entries.values().any(Outcome::is_failed)
    }

    /// Units that have at least one entry.
    pub fn units(&self) -> BTreeSet<&UnitId> {
        self.entries.keys().map(|key| &key.unit).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the report has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the run that produced the report resolved every unit.
    pub fn completeness(&self) -> &Completeness {
        &self.completeness
    }

    /// Returns true if the report is complete.
    pub fn is_complete(&self) -> bool {
        matches!(self.completeness, Completeness::Complete)
    }

    /// Counts entries by classification.
    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for (key, outcome) in &self.entries {
            match (&key.scope, outcome) {
                (_, Outcome::Skipped { .. }) => summary.skipped_units += 1,
                (_, outcome) if outcome.is_unvalidated() => summary.unvalidated += 1,
                (Scope::Field { .. }, Outcome::Passed) => summary.passed_fields += 1,
                (Scope::Field { .. }, Outcome::Failed { .. }) => summary.failed_fields += 1,
                (_, Outcome::Failed { .. }) => summary.unattributed_failures += 1,
                _ => {}
            }
        }
        summary
    }

    /// Serializes the report as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a report previously produced by [`to_json_pretty`](Self::to_json_pretty)
    /// or plain `serde_json` serialization.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub(crate) fn remove_unit(&mut self, unit: &UnitId) {
        self.entries.retain(|key, _| &key.unit != unit);
    }

    pub(crate) fn set_completeness(&mut self, completeness: Completeness) {
        self.completeness = completeness;
    }

    pub(crate) fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&ReportKey, &Outcome) -> bool,
    {
        self.entries.retain(|key, outcome| keep(key, outcome));
    }
}

impl From<ValidationReport> for ReportRepr {
    fn from(report: ValidationReport) -> Self {
        Self {
            completeness: report.completeness,
            entries: report
                .entries
                .into_iter()
                .map(|(key, outcome)| ReportEntry {
                    unit: key.unit,
                    scope: key.scope,
                    outcome,
                })
                .collect(),
        }
    }
}

impl TryFrom<ReportRepr> for ValidationReport {
    type Error = GuardError;

    fn try_from(repr: ReportRepr) -> Result<Self> {
        let mut report = ValidationReport::new();
        for entry in repr.entries {
            report.insert(
                ReportKey {
                    unit: entry.unit,
                    scope: entry.scope,
                },
                entry.outcome,
            )?;
        }
        report.completeness = repr.completeness;
        Ok(report)
    }
}
