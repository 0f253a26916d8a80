//! Poison-message handling: the incident opened alongside a dead
//! letter, idempotent on `(workspace, message_id)` so repeated DLQ
//! promotion attempts against the same outbox row never double-open.

use ctrlplane_domain::event::{Actor, EventDraft, EventKind, StreamRef, StreamType};
use ctrlplane_domain::ids::{CorrelationId, WorkspaceId};
use ctrlplane_eventlog::append;
use sqlx::PgConnection;

use crate::error::{AutomationError, AutomationResult};

pub(crate) async fn open_poison_message_incident(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    message_id: uuid::Uuid,
    event_type: &str,
    last_error: &str,
) -> AutomationResult<String> {
    let incident_id = format!("poison-{message_id}");
    let idempotency_key = format!("incident:poison_message:{workspace}:{message_id}");
    let kind = EventKind::IncidentOpened {
        incident_id: incident_id.clone(),
        category: "poison_message".to_string(),
        summary: format!("outbox entry for event type {event_type} failed 3 times: {last_error}"),
    };
    let draft = EventDraft::from_kind(
        workspace,
        Actor::system(),
        StreamRef::new(StreamType::Incident, incident_id.clone()),
        CorrelationId::new(),
        Some(message_id),
        Some(idempotency_key),
        &kind,
    )
    .map_err(AutomationError::Domain)?;
    append::append(conn, workspace, draft).await?;
    Ok(incident_id)
}
