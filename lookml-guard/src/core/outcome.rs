//! Terminal classifications of batch and field validation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a failure that may succeed when retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// The service asked the client to slow down
    RateLimited,
    /// The call did not complete within the per-call timeout
    Timeout,
    /// The connection failed or was reset
    ConnectionReset,
    /// The request was too large for the service to accept
    PayloadTooLarge,
    /// The service reported a temporary server-side failure
    ServiceUnavailable,
}

impl TransientKind {
    /// Returns true for failures caused by the size of the batch rather than
    /// its content. Batches failing this way are re-split before isolation.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Timeout | Self::PayloadTooLarge)
    }

    /// Short machine-friendly name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection_reset",
            Self::PayloadTooLarge => "payload_too_large",
            Self::ServiceUnavailable => "service_unavailable",
        }
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a batch or field ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The service compiled the query and reported it invalid
    Content,
    /// Retries were exhausted on a transient failure
    TransientExhausted(TransientKind),
    /// The batch failed but every half passed on its own
    Unattributed,
}

/// Why a unit was not dispatched at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The unit has no fields left after hidden/ignored filtering
    NoFields,
}

/// Result of validating one batch or one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The generated query ran successfully
    Passed,
    /// The generated query is invalid, or could not be run after retries
    Failed {
        /// Message reported by the service
        message: String,
        /// Location assigned by the service (e.g. `line 3, character 14`)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
        /// Failure classification
        cause: FailureCause,
    },
    /// A retryable failure of a single attempt; never stored in a report
    TransientError {
        /// Failure classification
        kind: TransientKind,
    },
    /// A non-recoverable condition (authentication, missing unit)
    FatalError {
        /// Message describing the condition
        message: String,
    },
    /// The unit was not dispatched
    Skipped {
        /// Why dispatch was skipped
        reason: SkipReason,
    },
}

impl Outcome {
    /// A content failure reported by the service.
    pub fn failed(message: impl Into<String>, location: Option<String>) -> Self {
        Self::Failed {
            message: message.into(),
            location,
            cause: FailureCause::Content,
        }
    }

    /// A failure after retries on `kind` were exhausted.
    pub fn transient_exhausted(kind: TransientKind, attempts: u32) -> Self {
        Self::Failed {
            message: format!("{kind} persisted after {attempts} attempts"),
            location: None,
            cause: FailureCause::TransientExhausted(kind),
        }
    }

    /// A fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::FatalError {
            message: message.into(),
        }
    }

    /// Returns true for `Passed`.
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Returns true for `Failed`, whatever the cause.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns true for `FatalError`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalError { .. })
    }

    /// Returns true if the service confirmed the query invalid, as opposed
    /// to the query never getting a verdict.
    pub fn is_confirmed_invalid(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                cause: FailureCause::Content | FailureCause::Unattributed,
                ..
            }
        )
    }

    /// Returns true if the subject could not be validated because of a
    /// failure unrelated to its content.
    pub fn is_unvalidated(&self) -> bool {
        matches!(
            self,
            Self::FatalError { .. }
                | Self::TransientError { .. }
                | Self::Failed {
                    cause: FailureCause::TransientExhausted(_),
                    ..
                }
        )
    }

    /// Returns true if the outcome may be stored in a report.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::TransientError { .. })
    }

    /// The outcome's message, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Failed { message, .. } | Self::FatalError { message } => Some(message),
            _ => None,
        }
    }

    /// Short status label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed { .. } => "failed",
            Self::TransientError { .. } => "transient_error",
            Self::FatalError { .. } => "fatal_error",
            Self::Skipped { .. } => "skipped",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => f.write_str("passed"),
            Self::Failed { message, cause, .. } => write!(f, "failed ({cause:?}): {message}"),
            Self::TransientError { kind } => write!(f, "transient error: {kind}"),
            Self::FatalError { message } => write!(f, "fatal error: {message}"),
            Self::Skipped { reason } => write!(f, "skipped ({reason:?})"),
        }
    }
}
