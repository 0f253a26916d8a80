use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    EventLog(#[from] ctrlplane_eventlog::EventLogError),

    #[error(transparent)]
    Store(#[from] ctrlplane_store::StoreError),

    #[error(transparent)]
    Domain(#[from] ctrlplane_domain::error::DomainError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("rate limited: {scope}")]
    RateLimited { scope: String },
}
