//! Core types shared by every stage of a validation run.
//!
//! - [`model`]: units, fields and the batches cut from them
//! - [`outcome`]: terminal classifications of a batch or field
//! - [`report`]: the [`ValidationReport`] keyed by stable identities
//! - [`stats`]: counters and timing of one run
//!
//! ```text
//! Unit ─┬─ Field ─┐
//!       └─ Field ─┴─> Batch ──(remote call)──> Outcome ──> ValidationReport[ReportKey]
//! ```

pub mod model;
pub mod outcome;
pub mod report;
pub mod stats;

pub use model::{Batch, BatchId, Field, Unit, UnitId};
pub use outcome::{FailureCause, Outcome, SkipReason, TransientKind};
pub use report::{
    Completeness, ReportEntry, ReportKey, ReportSummary, Scope, ValidationReport,
};
pub use stats::{RunResult, RunStats, SlowQuery};
