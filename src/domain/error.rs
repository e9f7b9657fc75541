//! Domain error types
//!
//! Pure domain errors that don't depend on infrastructure. They represent
//! business rule violations and domain invariant failures, independent of
//! the web/infrastructure layer.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: i64, available: i64 },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("wallet already exists: {0}")]
    WalletAlreadyExists(String),

    #[error("cannot transfer to the same wallet")]
    SameWalletTransfer,

    #[error("business rule violation: {0}")]
    BusinessRuleViolation(String),

    #[error("version conflict: expected {expected}, found {actual}")]
    ConcurrencyConflict { expected: i64, actual: i64 },

    #[error("duplicate operation: {key}")]
    DuplicateOperation { key: String },
}

impl DomainError {
    pub fn insufficient_funds(requested: i64, available: i64) -> Self {
        Self::InsufficientFunds { requested, available }
    }

    /// Whether this is a client error (caller's fault, not retryable).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. }
                | Self::InvalidAmount(_)
                | Self::SameWalletTransfer
                | Self::BusinessRuleViolation(_)
                | Self::WalletNotFound(_)
                | Self::WalletAlreadyExists(_)
        )
    }

    /// Whether this is a conflict error (a retry under a fresh read may help).
    pub fn is_conflict_error(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::DuplicateOperation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_funds_error() {
        let err = DomainError::insufficient_funds(100, 50);

        assert!(err.is_client_error());
        assert!(!err.is_conflict_error());
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("50"));
    }

    #[test]
    fn concurrency_conflict_error() {
        let err = DomainError::ConcurrencyConflict {
            expected: 1,
            actual: 2,
        };

        assert!(!err.is_client_error());
        assert!(err.is_conflict_error());
    }

    #[test]
    fn wallet_already_exists_is_client_error() {
        let err = DomainError::WalletAlreadyExists("w1".to_string());
        assert!(err.is_client_error());
    }
}
