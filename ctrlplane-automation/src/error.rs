//! Automation loop error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("event log error: {0}")]
    EventLog(#[from] ctrlplane_eventlog::EventLogError),

    #[error("store error: {0}")]
    Store(#[from] ctrlplane_store::StoreError),

    #[error("domain error: {0}")]
    Domain(#[from] ctrlplane_domain::error::DomainError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A handler's own logic rejected the payload outright (malformed
    /// data) rather than failing transiently — still counted against
    /// the three-strike DLQ threshold like any other failure.
    #[error("handler rejected entry: {0}")]
    HandlerRejected(String),

    /// The calling job lost its cron lock fencing token mid-run (another
    /// process stole the lock after ours expired); the run must stop
    /// without writing further results.
    #[error("cron lock fencing token lost for job {job_name}")]
    FencingLost { job_name: String },
}

pub type AutomationResult<T> = Result<T, AutomationError>;
