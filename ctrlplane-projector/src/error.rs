//! Projection errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("invalid payload for event {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
