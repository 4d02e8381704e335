//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::{DomainError, ErrorClass};
use crate::idempotency::IdempotencyError;
use crate::ledger::LedgerError;

/// Shown to callers instead of the detail of an invariant violation
pub const INVARIANT_MESSAGE: &str = "operation could not be completed, contact support";

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Idempotency conflict: same key with different request")]
    IdempotencyConflict(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// Whether the whole operation may be run again from scratch
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Ledger(e) if e.is_retryable())
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            AppError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IdempotencyError> for AppError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::HashMismatch(key) => AppError::IdempotencyConflict(key),
            IdempotencyError::Ledger(e) => AppError::Ledger(e),
            IdempotencyError::Serialization(e) => AppError::Ledger(LedgerError::Serialization(e)),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn domain_error_code(err: &DomainError) -> &'static str {
    match err {
        DomainError::InvalidAmount(_) => "invalid_amount",
        DomainError::DenominationMismatch { .. } => "denomination_mismatch",
        DomainError::UnknownDenomination(_) => "unknown_denomination",
        DomainError::InvalidMovementKind { .. } => "invalid_movement_kind",
        DomainError::SameSessionTransfer => "same_session_transfer",
        DomainError::DuplicateRegisterCode(_) => "duplicate_register_code",
        DomainError::DuplicateVaultCode(_) => "duplicate_vault_code",
        DomainError::MissingActor => "missing_actor",
        DomainError::HolderNotFound(_) => "holder_not_found",
        DomainError::HolderClosed(_) => "holder_closed",
        DomainError::SessionAlreadyOpen { .. } => "session_already_open",
        DomainError::SessionAlreadyClosed(_) => "session_already_closed",
        DomainError::DestinationNotOpen(_) => "destination_not_open",
        DomainError::RegisterBlocked(_) => "register_blocked",
        DomainError::RegisterInactive(_) => "register_inactive",
        DomainError::RegisterBusy(_) => "register_busy",
        DomainError::RegisterHasOpenSession(_) => "register_has_open_session",
        DomainError::InvalidTransition(_) => "invalid_transition",
        DomainError::InsufficientBalance { .. } => "insufficient_balance",
        DomainError::InsufficientAvailableBalance { .. } => "insufficient_available_balance",
        DomainError::AllocationLimitExceeded { .. } => "allocation_limit_exceeded",
        DomainError::TotalAllocationLimitExceeded { .. } => "total_allocation_limit_exceeded",
        DomainError::BalanceInvariantViolation { .. } => "internal_error",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, error, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                self.to_string(),
                Some(msg.clone()),
            ),
            AppError::MissingHeader(header) => (
                StatusCode::BAD_REQUEST,
                "missing_header",
                self.to_string(),
                Some(header.clone()),
            ),

            // 409 Conflict
            AppError::IdempotencyConflict(key) => (
                StatusCode::CONFLICT,
                "idempotency_conflict",
                self.to_string(),
                Some(key.clone()),
            ),

            // Domain errors map by class
            AppError::Domain(domain_err) => {
                let status = match domain_err.class() {
                    ErrorClass::Validation => StatusCode::BAD_REQUEST,
                    ErrorClass::NotFound => StatusCode::NOT_FOUND,
                    ErrorClass::State => StatusCode::CONFLICT,
                    ErrorClass::Limit => StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorClass::Invariant => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if domain_err.class() == ErrorClass::Invariant {
                    tracing::error!(error = %domain_err, "Balance invariant violated");
                    (status, "internal_error", INVARIANT_MESSAGE.to_string(), None)
                } else {
                    (status, domain_error_code(domain_err), domain_err.to_string(), None)
                }
            }

            // Retryable storage conflicts that survived the retries
            AppError::Ledger(e) if e.is_retryable() => {
                tracing::warn!("Ledger conflict after retries: {}", e);
                (
                    StatusCode::CONFLICT,
                    "transaction_conflict",
                    "Concurrent modification, retry the request".to_string(),
                    None,
                )
            }

            // 500 Internal Server Error
            AppError::Ledger(e) => {
                tracing::error!("Ledger error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    INVARIANT_MESSAGE.to_string(),
                    None,
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    INVARIANT_MESSAGE.to_string(),
                    None,
                )
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "config_error",
                    INVARIANT_MESSAGE.to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    #[test]
    fn test_status_by_class() {
        let cases = [
            (DomainError::InvalidAmount("0".into()), StatusCode::BAD_REQUEST),
            (DomainError::HolderNotFound("vault x".into()), StatusCode::NOT_FOUND),
            (DomainError::HolderClosed(Uuid::nil()), StatusCode::CONFLICT),
            (
                DomainError::AllocationLimitExceeded {
                    requested: Decimal::from(6000),
                    limit: Decimal::from(5000),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (DomainError::invariant("vault", "broken"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_conflict_is_retryable() {
        assert!(AppError::Ledger(LedgerError::Conflict("40001".into())).is_retryable());
        assert!(!AppError::Domain(DomainError::MissingActor).is_retryable());
        assert_eq!(
            AppError::Ledger(LedgerError::Conflict("40001".into())).into_response().status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_idempotency_mismatch_maps_to_conflict() {
        let err: AppError = IdempotencyError::HashMismatch("abc".into()).into();
        assert!(matches!(err, AppError::IdempotencyConflict(ref k) if k == "abc"));
    }
}
