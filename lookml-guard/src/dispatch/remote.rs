//! The network boundary: one call validates one batch.

use std::time::Duration;

use async_trait::async_trait;

use crate::core::{Batch, Field, TransientKind, UnitId};

/// A request to validate a subset of one unit's fields.
#[derive(Debug, Clone)]
pub struct ValidationRequest<'a> {
    /// The unit the fields belong to
    pub unit: &'a UnitId,
    /// The fields to select in the generated query
    pub fields: &'a [Field],
    /// How long the service may take to answer
    pub timeout: Duration,
}

impl<'a> ValidationRequest<'a> {
    /// Builds the request for `batch`.
    pub fn for_batch(batch: &'a Batch, timeout: Duration) -> Self {
        Self {
            unit: batch.unit(),
            fields: batch.fields(),
            timeout,
        }
    }
}

/// Classified answer of the remote service to a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteResponse {
    /// The generated query ran
    Valid {
        /// Query runtime reported by the service
        runtime: Option<Duration>,
    },
    /// The generated query is invalid
    Invalid {
        /// Error message from the service
        message: String,
        /// Location of the error, if the service assigned one
        location: Option<String>,
        /// Query runtime reported by the service
        runtime: Option<Duration>,
    },
    /// The call failed in transport
    Transport(TransientKind),
    /// The service asked the client to slow down
    RateLimited {
        /// Delay requested by the service
        retry_after: Option<Duration>,
    },
    /// A condition that retrying cannot fix (authentication, missing unit)
    Fatal {
        /// Description of the condition
        message: String,
    },
}

impl RemoteResponse {
    /// Returns the transient classification, if the attempt may be retried.
    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            Self::Transport(kind) => Some(*kind),
            Self::RateLimited { .. } => Some(TransientKind::RateLimited),
            _ => None,
        }
    }

    /// Runtime reported by the service for answered calls.
    pub fn runtime(&self) -> Option<Duration> {
        match self {
            Self::Valid { runtime } | Self::Invalid { runtime, .. } => *runtime,
            _ => None,
        }
    }
}

/// Validates batches against the modeling service.
///
/// Implementations must classify every failure into a [`RemoteResponse`];
/// the dispatcher applies the per-call timeout, retries and concurrency
/// limits on top.
#[async_trait]
pub trait RemoteValidator: Send + Sync {
    /// Runs the generated query for `request` once.
    async fn validate(&self, request: ValidationRequest<'_>) -> RemoteResponse;
}

#[async_trait]
impl<T: RemoteValidator + ?Sized> RemoteValidator for std::sync::Arc<T> {
    async fn validate(&self, request: ValidationRequest<'_>) -> RemoteResponse {
        (**self).validate(request).await
    }
}
