//! System health error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type HealthResult<T> = Result<T, HealthError>;
