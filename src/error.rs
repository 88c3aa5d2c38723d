//! Crate-wide error taxonomy
//!
//! Five kinds the core distinguishes. User-facing operations either succeed
//! atomically or leave no partial state; `InvariantViolation` and `Transient`
//! are the two kinds that reach the error log.

use thiserror::Error;

/// Core error type shared by the ledger, engine, settlement and services.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed symbol, out-of-range qty/price, zero or negative amount.
    /// Reported to the caller, not logged loudly.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Available balance lower than the requested freeze.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Order id, symbol or balance row missing when required.
    #[error("not found: {0}")]
    NotFound(String),

    /// A mutation that would leave balances negative, or settlement found a
    /// missing order row. Logged as error, transaction rolled back.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// DB connection, channel or lock trouble. The settlement batch is
    /// aborted and not retried automatically.
    #[error("transient failure: {0}")]
    Transient(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
            other => CoreError::Transient(other.to_string()),
        }
    }
}

impl CoreError {
    /// Whether this error should be surfaced as an operational alert.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            CoreError::InvariantViolation(_) | CoreError::Transient(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: CoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_alert_classification() {
        assert!(CoreError::InvariantViolation("x".into()).is_alert());
        assert!(CoreError::Transient("x".into()).is_alert());
        assert!(!CoreError::InsufficientFunds("x".into()).is_alert());
        assert!(!CoreError::InvalidArgument("x".into()).is_alert());
    }
}
