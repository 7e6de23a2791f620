//! Per-run counters and timing, kept apart from the report.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BatchId, UnitId, ValidationReport};

/// A remote call slower than the configured runtime threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowQuery {
    /// The batch that was validated
    pub batch: String,
    /// The unit the batch belongs to
    pub unit: UnitId,
    /// Number of fields in the batch
    pub fields: usize,
    /// Runtime reported by the service, in seconds
    pub runtime_secs: f64,
}

impl SlowQuery {
    pub(crate) fn new(batch: &BatchId, unit: &UnitId, fields: usize, runtime: Duration) -> Self {
        Self {
            batch: batch.to_string(),
            unit: unit.clone(),
            fields,
            runtime_secs: runtime.as_secs_f64(),
        }
    }
}

/// Statistics about a validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
    /// Units selected for validation
    pub units: usize,
    /// Units served from the result cache
    pub cached_units: usize,
    /// Remote calls issued, retries included
    pub remote_calls: u64,
    /// Attempts that were retries of an earlier attempt
    pub retries: u64,
    /// Batches re-split after a capacity failure
    pub resplits: u64,
    /// Remote calls issued while isolating failing batches
    pub isolation_calls: u64,
    /// Calls slower than the runtime threshold, slowest first
    pub slow_queries: Vec<SlowQuery>,
}

impl RunStats {
    pub(crate) fn started() -> Self {
        Self {
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            units: 0,
            cached_units: 0,
            remote_calls: 0,
            retries: 0,
            resplits: 0,
            isolation_calls: 0,
            slow_queries: Vec::new(),
        }
    }
}

/// A finished run: the deterministic report plus its statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Terminal outcomes of the run
    pub report: ValidationReport,
    /// Counters and timing
    pub stats: RunStats,
}

impl RunResult {
    /// Returns true if the report contains any `Failed` entry.
    pub fn has_failures(&self) -> bool {
        self.report.has_failures()
    }
}
