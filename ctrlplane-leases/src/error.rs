use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("work item already claimed by another agent")]
    AlreadyClaimed,

    #[error("lease held by the same agent under a different correlation id")]
    CorrelationIdMismatch,

    #[error("lease version mismatch")]
    VersionMismatch { lease_id: Uuid, current_version: i64 },

    #[error("heartbeat rate limited")]
    HeartbeatRateLimited,

    #[error("work item type {0:?} is not claimable through this coordinator")]
    DisallowedWorkItemType(String),

    #[error("lease {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    EventLog(#[from] ctrlplane_eventlog::EventLogError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Domain(#[from] ctrlplane_domain::error::DomainError),
}

impl LeaseError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            LeaseError::AlreadyClaimed => "already_claimed",
            LeaseError::CorrelationIdMismatch => "correlation_id_mismatch",
            LeaseError::VersionMismatch { .. } => "lease_version_mismatch",
            LeaseError::HeartbeatRateLimited => "heartbeat_rate_limited",
            LeaseError::DisallowedWorkItemType(_) => "disallowed_work_item_type",
            LeaseError::NotFound(_) => "not_found",
            LeaseError::EventLog(_) => "internal",
            LeaseError::Database(_) => "internal",
            LeaseError::Domain(_) => "internal",
        }
    }
}
