//! Prelude for commonly used types and traits in lookml-guard.

pub use crate::cache::{InMemoryResultCache, ResultCache};
pub use crate::config::ValidatorConfig;
pub use crate::core::{
    Field, Outcome, ReportKey, RunResult, Unit, UnitId, ValidationReport,
};
pub use crate::differ::{Baseline, DiffReport, IncrementalDiffer};
pub use crate::dispatch::{RemoteResponse, RemoteValidator, ValidationRequest};
pub use crate::error::{GuardError, Result};
pub use crate::formatters::{FormatterConfig, ReportFormatter};
pub use crate::inventory::{InventoryProvider, StaticInventory};
pub use crate::logging::setup::LoggingConfig;
pub use crate::runner::{IncrementalRun, ValidationRunner};
