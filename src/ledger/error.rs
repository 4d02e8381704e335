//! Ledger Store Errors
//!
//! Error types for ledger persistence.

/// Errors that can occur in the ledger store
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Serialization failure, deadlock or a concurrent insert hitting a
    /// unique constraint. The whole operation may be retried from scratch.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be turned back into a domain value
    #[error("Corrupt ledger data: {0}")]
    Corrupt(String),
}

impl LedgerError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict(_))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                match code.as_ref() {
                    // serialization_failure, deadlock_detected, unique_violation
                    "40001" | "40P01" | "23505" => {
                        return LedgerError::Conflict(db_err.message().to_string());
                    }
                    _ => {}
                }
            }
        }
        LedgerError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(LedgerError::Conflict("deadlock".into()).is_retryable());
        assert!(!LedgerError::Corrupt("bad kind".into()).is_retryable());
        assert!(!LedgerError::from(sqlx::Error::RowNotFound).is_retryable());
    }
}
