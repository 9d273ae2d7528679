//! Error types for the matchmaking service
//!
//! Operations return `anyhow::Result`; domain failures are raised as
//! [`MatchmakingError`] and mapped to a [`Problem`] at the service boundary.

use serde::{Deserialize, Serialize};

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Not a participant: {reason}")]
    Unauthorized { reason: String },

    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("{service} call failed: {reason}")]
    ExternalServiceFailure { service: String, reason: String },

    #[error("Internal inconsistency: {message}")]
    InternalInconsistency { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn inconsistency(message: impl Into<String>) -> Self {
        Self::InternalInconsistency {
            message: message.into(),
        }
    }

    pub fn rating_engine(reason: impl ToString) -> Self {
        Self::ExternalServiceFailure {
            service: "rating engine".to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::ExternalServiceFailure { .. } => ErrorKind::ExternalServiceFailure,
            Self::InternalInconsistency { .. } => ErrorKind::InternalInconsistency,
            Self::ConfigurationError { .. } | Self::InternalError { .. } => ErrorKind::Internal,
        }
    }
}

/// Stable error classification exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Unauthorized,
    InvalidState,
    ExternalServiceFailure,
    InternalInconsistency,
    Internal,
}

impl ErrorKind {
    /// Classify any error, treating foreign errors as internal
    pub fn of(error: &anyhow::Error) -> Self {
        error
            .downcast_ref::<MatchmakingError>()
            .map(MatchmakingError::kind)
            .unwrap_or(ErrorKind::Internal)
    }

    /// HTTP-equivalent status code
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::InvalidArgument | ErrorKind::InvalidState => 400,
            // Non-participants get the same answer as a missing entity
            ErrorKind::NotFound | ErrorKind::Unauthorized => 404,
            ErrorKind::ExternalServiceFailure => 502,
            ErrorKind::InternalInconsistency | ErrorKind::Internal => 500,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "Invalid argument",
            ErrorKind::NotFound | ErrorKind::Unauthorized => "Not found",
            ErrorKind::InvalidState => "Invalid state",
            ErrorKind::ExternalServiceFailure => "Upstream service failure",
            ErrorKind::InternalInconsistency | ErrorKind::Internal => "Internal error",
        }
    }

    /// Whether the message is safe to show to a caller
    fn is_client_facing(self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidArgument
                | ErrorKind::NotFound
                | ErrorKind::Unauthorized
                | ErrorKind::InvalidState
        )
    }
}

/// Structured problem response for the transport layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub kind: ErrorKind,
    pub status: u16,
    pub title: String,
    pub detail: String,
}

impl Problem {
    pub fn from_error(error: &anyhow::Error) -> Self {
        let kind = ErrorKind::of(error);
        let detail = if kind.is_client_facing() {
            error.to_string()
        } else if kind == ErrorKind::ExternalServiceFailure {
            "The rating service is unavailable, please retry the submission".to_string()
        } else {
            "An internal error occurred".to_string()
        };

        Self {
            kind,
            status: kind.status(),
            title: kind.title().to_string(),
            detail,
        }
    }
}
