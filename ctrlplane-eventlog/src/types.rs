//! Row and result shapes for the event log, plus its error taxonomy.

use chrono::{DateTime, Utc};
use ctrlplane_domain::event::{Actor, StreamRef};
use ctrlplane_domain::ids::{CorrelationId, WorkspaceId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A row as persisted in `evt_events`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventRow {
    pub event_id: Uuid,
    pub event_type: String,
    pub event_version: i32,
    pub occurred_at: DateTime<Utc>,
    pub workspace_id: Uuid,
    pub actor_type: String,
    pub actor_id: String,
    pub stream_type: String,
    pub stream_id: String,
    pub stream_seq: i64,
    pub correlation_id: String,
    pub causation_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub prev_event_hash: String,
    pub event_hash: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub contains_secrets: bool,
    pub recorded_at: DateTime<Utc>,
}

impl EventRow {
    pub fn stream(&self) -> Result<StreamRef, crate::types::EventLogError> {
        let stream_type = self
            .stream_type
            .parse()
            .map_err(|_| EventLogError::Internal(format!("unknown stream_type {}", self.stream_type)))?;
        Ok(StreamRef::new(stream_type, self.stream_id.clone()))
    }

    pub fn actor(&self) -> Actor {
        use ctrlplane_domain::event::ActorType;
        let actor_type = match self.actor_type.as_str() {
            "human" => ActorType::Human,
            "agent" => ActorType::Agent,
            _ => ActorType::System,
        };
        Actor::new(actor_type, self.actor_id.clone())
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        WorkspaceId(self.workspace_id)
    }

    pub fn correlation_id(&self) -> CorrelationId {
        CorrelationId(self.correlation_id.clone())
    }
}

/// Whether an `append` call actually inserted a row or replayed an
/// existing idempotent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    IdempotentReplay,
}

/// Result of a successful `append` call.
#[derive(Debug, Clone)]
pub struct AppendedEvent {
    pub row: EventRow,
    pub outcome: AppendOutcome,
}

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("workspace mismatch: event targets a different workspace than the caller is bound to")]
    UnauthorizedWorkspace,

    #[error("idempotency key collision with a different actor or payload")]
    IdempotencyConflictUnresolved,

    #[error("stream_seq conflict on ({stream_type}, {stream_id})")]
    StreamSeqConflict { stream_type: String, stream_id: String },

    #[error("lock contention appending to ({stream_type}, {stream_id})")]
    LockContention { stream_type: String, stream_id: String },

    #[error("event not found: {0}")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal event log error: {0}")]
    Internal(String),
}

impl EventLogError {
    /// Stable reason_code for the HTTP edge (§7 of the design document).
    pub fn reason_code(&self) -> &'static str {
        match self {
            EventLogError::UnauthorizedWorkspace => "unauthorized_workspace",
            EventLogError::IdempotencyConflictUnresolved => "idempotency_conflict_unresolved",
            EventLogError::StreamSeqConflict { .. } => "stream_seq_conflict",
            EventLogError::LockContention { .. } => "heartbeat_rate_limited",
            EventLogError::NotFound(_) => "not_found",
            EventLogError::Database(_) | EventLogError::Internal(_) => "internal",
        }
    }
}
