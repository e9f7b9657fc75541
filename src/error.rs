//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::event_store::EventStoreError;
use crate::idempotency::IdempotencyError;
use crate::lock::LockError;
use crate::outbox::OutboxError;
use crate::snapshot::SnapshotError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types, matching the stable error taxonomy surfaced at
/// the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: i64, available: i64 },

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Wallet already exists: {0}")]
    WalletAlreadyExists(String),

    #[error("Concurrency conflict: concurrent modification detected")]
    ConcurrencyConflict,

    #[error("A request with this idempotency key is already in progress")]
    ConflictInProgress,

    #[error("Idempotency key reused with a different request payload")]
    IdempotencyKeyReuse,

    #[error("Could not acquire lock within the allotted time")]
    LockAcquisitionTimeout,

    #[error("Transfer partially failed: debit committed as event {debit_event_id} but credit leg failed")]
    TransferPartiallyFailed { debit_event_id: i64 },

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Transient infrastructure failure: {0}")]
    TransientInfra(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InsufficientFunds { requested, available } => {
                AppError::InsufficientFunds { requested, available }
            }
            DomainError::InvalidAmount(msg) => AppError::InvalidAmount(msg),
            DomainError::WalletNotFound(id) => AppError::WalletNotFound(id),
            DomainError::WalletAlreadyExists(id) => AppError::WalletAlreadyExists(id),
            DomainError::SameWalletTransfer => {
                AppError::InvalidRequest("cannot transfer to the same wallet".to_string())
            }
            DomainError::BusinessRuleViolation(msg) => AppError::InvalidRequest(msg),
            DomainError::ConcurrencyConflict { .. } => AppError::ConcurrencyConflict,
            DomainError::DuplicateOperation { .. } => AppError::ConflictInProgress,
        }
    }
}

impl From<EventStoreError> for AppError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::ConcurrencyConflict { .. } => AppError::ConcurrencyConflict,
            EventStoreError::AggregateNotFound(id) => AppError::WalletNotFound(id),
            EventStoreError::Database(e) => AppError::TransientInfra(e.to_string()),
            EventStoreError::Serialization(e) => AppError::Internal(e.to_string()),
            EventStoreError::MaxRetriesExceeded => AppError::ConcurrencyConflict,
            EventStoreError::InvalidEventData(msg) => AppError::Internal(msg),
        }
    }
}

impl From<LockError> for AppError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::AcquisitionTimeout(_) => AppError::LockAcquisitionTimeout,
            LockError::Redis(e) => AppError::TransientInfra(e.to_string()),
        }
    }
}

impl From<IdempotencyError> for AppError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::ConflictInProgress(_) => AppError::ConflictInProgress,
            IdempotencyError::IdempotencyKeyReuse(_) => AppError::IdempotencyKeyReuse,
            IdempotencyError::Database(e) => AppError::TransientInfra(e.to_string()),
            IdempotencyError::Serialization(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<OutboxError> for AppError {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::Database(e) => AppError::TransientInfra(e.to_string()),
            OutboxError::Serialization(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<SnapshotError> for AppError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Database(e) => AppError::TransientInfra(e.to_string()),
            SnapshotError::Serialization(e) => AppError::Internal(e.to_string()),
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

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::InvalidAmount(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
            }
            AppError::InsufficientFunds { requested, available } => (
                StatusCode::BAD_REQUEST,
                "insufficient_funds",
                Some(format!("requested {requested}, available {available}")),
            ),
            AppError::WalletNotFound(id) => {
                (StatusCode::NOT_FOUND, "wallet_not_found", Some(id.clone()))
            }
            AppError::WalletAlreadyExists(id) => (
                StatusCode::CONFLICT,
                "wallet_already_exists",
                Some(id.clone()),
            ),
            AppError::ConcurrencyConflict => {
                (StatusCode::CONFLICT, "concurrency_conflict", None)
            }
            AppError::ConflictInProgress => {
                (StatusCode::CONFLICT, "conflict_in_progress", None)
            }
            AppError::IdempotencyKeyReuse => {
                (StatusCode::CONFLICT, "idempotency_key_reuse", None)
            }
            AppError::LockAcquisitionTimeout => (
                StatusCode::SERVICE_UNAVAILABLE,
                "lock_acquisition_timeout",
                None,
            ),
            AppError::TransferPartiallyFailed { debit_event_id } => (
                StatusCode::CONFLICT,
                "transfer_partially_failed",
                Some(format!("debit_event_id={debit_event_id}")),
            ),
            AppError::MissingHeader(header) => (
                StatusCode::BAD_REQUEST,
                "missing_header",
                Some(header.clone()),
            ),
            AppError::TransientInfra(msg) => {
                tracing::error!(error = %msg, "transient infrastructure failure");
                (StatusCode::SERVICE_UNAVAILABLE, "transient_infra", None)
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!(error = %e, "configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_insufficient_funds_maps_to_bad_request() {
        let err: AppError = DomainError::insufficient_funds(100, 50).into();
        assert!(matches!(err, AppError::InsufficientFunds { .. }));
    }

    #[test]
    fn domain_concurrency_conflict_maps_through() {
        let err: AppError = DomainError::ConcurrencyConflict {
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(err, AppError::ConcurrencyConflict));
    }
}
