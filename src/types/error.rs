//! Error types for the attestation gateway
//!
//! `AttestError` is what reaches route handlers. Ledger availability and
//! compatibility failures are absorbed by the mode selector before they get
//! here, so only input, funding, storage and unclassified ledger failures
//! surface as HTTP errors.

use hyper::StatusCode;

use crate::ledger::LedgerError;

/// Main error type for attestation operations
#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AttestError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientResources(_) => StatusCode::PAYMENT_REQUIRED,
            Self::Ledger(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show an end user.
    ///
    /// Ledger, storage and internal details stay in the server log.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidInput(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg) => msg.clone(),
            Self::InsufficientResources(_) => {
                "Signing account cannot cover the transaction cost".to_string()
            }
            Self::Ledger(_) => "Ledger operation failed".to_string(),
            Self::Database(_) => "Storage temporarily unavailable".to_string(),
            Self::Config(_) | Self::Internal(_) => "Internal error".to_string(),
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.public_message() }).to_string();
        (status, body)
    }
}

impl From<LedgerError> for AttestError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientResources(msg) => Self::InsufficientResources(msg),
            LedgerError::NotConfigured(msg) => Self::Config(msg),
            other => Self::Ledger(other.to_string()),
        }
    }
}

impl From<std::io::Error> for AttestError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AttestError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for AttestError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for AttestError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AttestError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

/// Result type alias for attestation operations
pub type Result<T> = std::result::Result<T, AttestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_detail_hidden_from_users() {
        let err = AttestError::from(LedgerError::Rpc(
            "execution reverted: 0xdeadbeef at pc 42".to_string(),
        ));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let (_, body) = err.into_status_code_and_body();
        assert!(!body.contains("deadbeef"));
        assert!(body.contains("Ledger operation failed"));
    }

    #[test]
    fn test_insufficient_resources_maps_through() {
        let err = AttestError::from(LedgerError::InsufficientResources("balance 0".into()));
        assert!(matches!(err, AttestError::InsufficientResources(_)));
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_invalid_input_message_is_public() {
        let err = AttestError::InvalidInput("score must be between 0 and 100".into());
        assert_eq!(err.public_message(), "score must be between 0 and 100");
    }
}
