//! Error types for minireshard

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Request Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Illegal operation: {0}")]
    IllegalOperation(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Conflicting operation: {0}")]
    ConflictingOperation(String),

    // === Saga Errors ===
    #[error("Participant {shard} failed: {reason}")]
    ParticipantFailure { shard: String, reason: String },

    #[error("Recovery inconsistency: {0}")]
    RecoveryInconsistency(String),

    #[error("Operation interrupted: {0}")]
    Interrupted(String),

    // === Leadership Errors ===
    #[error("Not leader: {0}")]
    NotLeader(String),

    // === Lookup Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Participant returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Metadata Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metadata corrupted: {0}")]
    MetadataCorrupted(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::Http(_) => true,
            Error::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Stable error code reported to callers and stored in failed records
    pub fn code(&self) -> FailureCode {
        match self {
            Error::InvalidRequest(_) => FailureCode::InvalidRequest,
            Error::IllegalOperation(_) => FailureCode::IllegalOperation,
            Error::InvalidOptions(_) => FailureCode::InvalidOptions,
            Error::ConflictingOperation(_) => FailureCode::ConflictingOperation,
            Error::ParticipantFailure { .. }
            | Error::Remote { .. }
            | Error::Http(_)
            | Error::ConnectionFailed(_)
            | Error::Timeout(_) => FailureCode::ParticipantFailure,
            Error::RecoveryInconsistency(_) => FailureCode::RecoveryInconsistency,
            Error::Interrupted(_) => FailureCode::Interrupted,
            Error::NotLeader(_) => FailureCode::NotLeader,
            Error::NotFound(_) => FailureCode::NotFound,
            _ => FailureCode::Internal,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::NotLeader(_) => StatusCode::MISDIRECTED_REQUEST,
            Error::InvalidRequest(_) | Error::InvalidOptions(_) | Error::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::IllegalOperation(_) => StatusCode::FORBIDDEN,
            Error::ConflictingOperation(_) => StatusCode::CONFLICT,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::Interrupted(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::ParticipantFailure { .. } | Error::RecoveryInconsistency(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error body: `{"error": {"code", "message"}}`
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (self.to_http_status(), axum::Json(body)).into_response()
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::ConnectionFailed(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

/// Classified failure codes surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCode {
    InvalidRequest,
    IllegalOperation,
    InvalidOptions,
    ConflictingOperation,
    ParticipantFailure,
    RecoveryInconsistency,
    Interrupted,
    NotLeader,
    NotFound,
    Internal,
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Terminal failure of an operation, as recorded durably and handed to every waiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub code: FailureCode,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<String>,
}

impl OperationFailure {
    pub fn new(code: FailureCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            shard: None,
        }
    }

    pub fn participant(shard: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: FailureCode::ParticipantFailure,
            reason: reason.into(),
            shard: Some(shard.into()),
        }
    }
}

impl std::fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.shard {
            Some(shard) => write!(f, "{} on {}: {}", self.code, shard, self.reason),
            None => write!(f, "{}: {}", self.code, self.reason),
        }
    }
}

impl From<&Error> for OperationFailure {
    fn from(e: &Error) -> Self {
        match e {
            Error::ParticipantFailure { shard, reason } => {
                OperationFailure::participant(shard.clone(), reason.clone())
            }
            other => OperationFailure::new(other.code(), other.to_string()),
        }
    }
}

impl From<OperationFailure> for Error {
    fn from(f: OperationFailure) -> Self {
        match f.code {
            FailureCode::InvalidRequest => Error::InvalidRequest(f.reason),
            FailureCode::IllegalOperation => Error::IllegalOperation(f.reason),
            FailureCode::InvalidOptions => Error::InvalidOptions(f.reason),
            FailureCode::ConflictingOperation => Error::ConflictingOperation(f.reason),
            FailureCode::ParticipantFailure => Error::ParticipantFailure {
                shard: f.shard.unwrap_or_else(|| "unknown".to_string()),
                reason: f.reason,
            },
            FailureCode::RecoveryInconsistency => Error::RecoveryInconsistency(f.reason),
            FailureCode::Interrupted => Error::Interrupted(f.reason),
            FailureCode::NotLeader => Error::NotLeader(f.reason),
            FailureCode::NotFound => Error::NotFound(f.reason),
            FailureCode::Internal => Error::Internal(f.reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Timeout("slow".into()).is_retryable());
        assert!(Error::ConnectionFailed("refused".into()).is_retryable());
        assert!(Error::Remote {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!Error::Remote {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!Error::InvalidRequest("x".into()).is_retryable());
    }

    #[test]
    fn test_participant_failure_roundtrips_through_record_form() {
        let err = Error::ParticipantFailure {
            shard: "shard-2".into(),
            reason: "disk full".into(),
        };
        let failure = OperationFailure::from(&err);
        assert_eq!(failure.code, FailureCode::ParticipantFailure);
        assert_eq!(failure.shard.as_deref(), Some("shard-2"));

        match Error::from(failure) {
            Error::ParticipantFailure { shard, reason } => {
                assert_eq!(shard, "shard-2");
                assert_eq!(reason, "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_http_status_mapping() {
        use axum::http::StatusCode;
        assert_eq!(
            Error::InvalidRequest("x".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::IllegalOperation("x".into()).to_http_status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::NotFound("x".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::NotLeader("x".into()).to_http_status(),
            StatusCode::MISDIRECTED_REQUEST
        );
    }
}
