use thiserror::Error;

use crate::domain::{ExpenseId, TripId};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Expense not found: {0}")]
    ExpenseNotFound(ExpenseId),

    #[error("Expense {0} is not linked to any trip")]
    TripLinkNotFound(ExpenseId),

    #[error("Trip not found: {0}")]
    TripNotFound(TripId),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User already exists: {0}")]
    UserAlreadyExists(String),

    #[error("Expense {expense_id} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        expense_id: ExpenseId,
        expected: i64,
        actual: i64,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Storage timed out: {0}")]
    StorageTimeout(anyhow::Error),

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),
}

impl AppError {
    /// True for the not-found family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::ExpenseNotFound(_)
                | AppError::TripLinkNotFound(_)
                | AppError::TripNotFound(_)
                | AppError::UserNotFound(_)
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let timed_out = err.chain().any(|cause| {
            if let Some(sqlx_err) = cause.downcast_ref::<sqlx::Error>() {
                return matches!(sqlx_err, sqlx::Error::PoolTimedOut);
            }
            cause
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::TimedOut)
        });

        if timed_out {
            AppError::StorageTimeout(err)
        } else {
            AppError::Storage(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_pool_timeout_is_classified() {
        let err: anyhow::Result<()> = Err(sqlx::Error::PoolTimedOut).context("Failed to fetch expense");
        let app_err = AppError::from(err.unwrap_err());
        assert!(matches!(app_err, AppError::StorageTimeout(_)));
    }

    #[test]
    fn test_io_timeout_is_classified() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "socket");
        let app_err = AppError::from(anyhow::Error::new(io));
        assert!(matches!(app_err, AppError::StorageTimeout(_)));
    }

    #[test]
    fn test_other_errors_are_storage() {
        let app_err = AppError::from(anyhow::anyhow!("disk full"));
        assert!(matches!(app_err, AppError::Storage(_)));

        let app_err = AppError::from(anyhow::Error::new(sqlx::Error::RowNotFound));
        assert!(matches!(app_err, AppError::Storage(_)));
    }

    #[test]
    fn test_not_found_family() {
        assert!(AppError::ExpenseNotFound(1).is_not_found());
        assert!(AppError::TripLinkNotFound(1).is_not_found());
        assert!(AppError::UserNotFound("x".into()).is_not_found());
        assert!(!AppError::InvalidAmount("x".into()).is_not_found());
    }
}
