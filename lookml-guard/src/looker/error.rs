use std::time::Duration;

use thiserror::Error;

use crate::core::TransientKind;
use crate::dispatch::RemoteResponse;
use crate::error::GuardError;

/// Errors that can occur when talking to a Looker instance.
#[derive(Debug, Error)]
pub enum LookerError {
    /// Login failed or the token was rejected.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The connection failed or the request timed out.
    #[error("Network error: {message}")]
    Network { message: String, timed_out: bool },

    /// Rate limited by the server.
    #[error("Rate limited. Retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The requested model or explore does not exist.
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// The server refused the request body as too large.
    #[error("Request too large: {message}")]
    PayloadTooLarge { message: String },

    /// The server rejected the query definition.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Server returned an error.
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// A response body could not be decoded.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Missing or malformed connection settings.
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl LookerError {
    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16, retry_after_secs: Option<u64>, body: String) -> Self {
        match status {
            401 | 403 => Self::Authentication { message: body },
            404 => Self::NotFound { message: body },
            413 => Self::PayloadTooLarge { message: body },
            429 => Self::RateLimited { retry_after_secs },
            400 | 422 => Self::InvalidRequest { message: body },
            status => Self::ServerError {
                status,
                message: body,
            },
        }
    }

    /// Returns true if this error is transient and the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::RateLimited { .. } | Self::PayloadTooLarge { .. } => true,
            Self::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns the suggested retry delay, if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => retry_after_secs.map(Duration::from_secs),
            _ => None,
        }
    }

    /// Maps the error onto the answer the dispatcher understands.
    pub fn into_response(self) -> RemoteResponse {
        match self {
            Self::Network { timed_out: true, .. } => RemoteResponse::Transport(TransientKind::Timeout),
            Self::Network { .. } => RemoteResponse::Transport(TransientKind::ConnectionReset),
            Self::RateLimited { retry_after_secs } => RemoteResponse::RateLimited {
                retry_after: retry_after_secs.map(Duration::from_secs),
            },
            Self::PayloadTooLarge { .. } => {
                RemoteResponse::Transport(TransientKind::PayloadTooLarge)
            }
            Self::ServerError { status, .. } if status >= 500 => {
                RemoteResponse::Transport(TransientKind::ServiceUnavailable)
            }
            Self::InvalidRequest { message } => RemoteResponse::Invalid {
                message,
                location: None,
                runtime: None,
            },
            other => RemoteResponse::Fatal {
                message: other.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for LookerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Serialization {
                message: err.to_string(),
            }
        } else {
            Self::Network {
                message: err.to_string(),
                timed_out: err.is_timeout(),
            }
        }
    }
}

impl From<LookerError> for GuardError {
    fn from(err: LookerError) -> Self {
        match err {
            LookerError::Configuration { message } => GuardError::Configuration(message),
            other => GuardError::inventory(other.to_string()),
        }
    }
}

/// Result type for Looker operations.
pub type LookerResult<T> = std::result::Result<T, LookerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            LookerError::from_status(401, None, "bad token".into()),
            LookerError::Authentication { .. }
        ));
        assert!(matches!(
            LookerError::from_status(404, None, String::new()),
            LookerError::NotFound { .. }
        ));
        assert!(matches!(
            LookerError::from_status(429, Some(30), String::new()),
            LookerError::RateLimited {
                retry_after_secs: Some(30)
            }
        ));
        assert!(matches!(
            LookerError::from_status(503, None, String::new()),
            LookerError::ServerError { status: 503, .. }
        ));
    }

    #[test]
    fn test_is_retryable() {
        assert!(!LookerError::Authentication {
            message: "test".to_string()
        }
        .is_retryable());
        assert!(LookerError::Network {
            message: "reset".to_string(),
            timed_out: false
        }
        .is_retryable());
        assert!(LookerError::from_status(502, None, String::new()).is_retryable());
        assert!(!LookerError::from_status(418, None, String::new()).is_retryable());
    }

    #[test]
    fn test_into_response() {
        assert_eq!(
            LookerError::from_status(429, Some(7), String::new()).into_response(),
            RemoteResponse::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
        assert_eq!(
            LookerError::from_status(413, None, String::new()).into_response(),
            RemoteResponse::Transport(TransientKind::PayloadTooLarge)
        );
        assert_eq!(
            LookerError::from_status(500, None, String::new()).into_response(),
            RemoteResponse::Transport(TransientKind::ServiceUnavailable)
        );
        assert_eq!(
            LookerError::Network {
                message: "deadline".into(),
                timed_out: true
            }
            .into_response(),
            RemoteResponse::Transport(TransientKind::Timeout)
        );
        assert!(matches!(
            LookerError::from_status(403, None, "forbidden".into()).into_response(),
            RemoteResponse::Fatal { .. }
        ));
        assert!(matches!(
            LookerError::from_status(422, None, "unknown field".into()).into_response(),
            RemoteResponse::Invalid { .. }
        ));
    }

    #[test]
    fn test_into_guard_error() {
        let err: GuardError = LookerError::Configuration {
            message: "LOOKER_BASE_URL is not set".into(),
        }
        .into();
        assert!(matches!(err, GuardError::Configuration(_)));
        let err: GuardError = LookerError::from_status(500, None, "boom".into()).into();
        assert!(matches!(err, GuardError::Inventory { .. }));
    }
}
