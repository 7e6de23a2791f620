//! Error types for the lookml-guard validation library.
//!
//! Run-level problems (bad configuration, selectors that match nothing, a
//! corrupted report) are represented by [`GuardError`]. Per-batch results are
//! not errors: a dimension that breaks the generated SQL is an
//! [`Outcome`](crate::core::Outcome), recorded in the report like any other.

use thiserror::Error;

/// The main error type for the lookml-guard library.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Invalid run parameters, detected before any remote call is made.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// One or more selector patterns could not be parsed or matched nothing.
    #[error("Selector error: {message} ({})", patterns.join(", "))]
    Selector {
        /// Human-readable summary
        message: String,
        /// Every offending pattern, as written by the user
        patterns: Vec<String>,
    },

    /// A terminal outcome was written twice for the same report key.
    ///
    /// This indicates overlapping batches and means the report can no longer
    /// be trusted, so the run is aborted.
    #[error("Aggregation logic error: duplicate outcome for '{key}' (existing: {existing}, attempted: {attempted})")]
    AggregationLogic {
        /// The report key that was written twice
        key: String,
        /// The outcome already stored
        existing: String,
        /// The outcome that was rejected
        attempted: String,
    },

    /// Incremental mode was requested but no trustworthy baseline exists.
    #[error("Incremental mode unavailable: {0}")]
    IncrementalUnavailable(String),

    /// The inventory provider could not list units or fields.
    #[error("Inventory error: {message}")]
    Inventory {
        /// Detailed error message
        message: String,
    },

    /// The run was cancelled before the operation could complete.
    #[error("Validation run cancelled")]
    Cancelled,

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, GuardError>`.
pub type Result<T> = std::result::Result<T, GuardError>;

impl GuardError {
    /// Creates a new inventory error.
    pub fn inventory(message: impl Into<String>) -> Self {
        Self::Inventory {
            message: message.into(),
        }
    }

    /// Creates a new selector error covering the given patterns.
    pub fn selector<I, S>(message: impl Into<String>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Selector {
            message: message.into(),
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if the error aborts a run before any remote call is made.
    pub fn is_pre_run(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Selector { .. })
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_error_lists_patterns() {
        let err = GuardError::selector("patterns matched nothing", ["sales/ordrs", "-fin/x"]);
        assert_eq!(
            err.to_string(),
            "Selector error: patterns matched nothing (sales/ordrs, -fin/x)"
        );
        assert!(err.is_pre_run());
    }

    #[test]
    fn test_aggregation_logic_display() {
        let err = GuardError::AggregationLogic {
            key: "sales/orders:id".to_string(),
            existing: "passed".to_string(),
            attempted: "failed".to_string(),
        };
        assert!(err.to_string().contains("sales/orders:id"));
        assert!(!err.is_pre_run());
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: GuardError = parse.unwrap_err().into();
        assert!(matches!(err, GuardError::Serialization(_)));
    }
}
