//! Dispatches a persisted event row into its read-model handler,
//! inside the same transaction the caller used to append it.
//!
//! Event types with no read-model counterpart (policy decisions, lease
//! mechanics, capability grants, learned constraints — anything that
//! only needs to live in the log itself) and any `event_type` this
//! build doesn't recognize at all both take the same path: a trace log
//! and a no-op. Per the domain layer's own contract, an event type this
//! projector doesn't know about is expected, not an error.

use ctrlplane_domain::event::EventKind;
use ctrlplane_domain::ids::WorkspaceId;
use ctrlplane_eventlog::types::EventRow;
use sqlx::PgConnection;

use crate::error::Result;
use crate::handlers::{agents, approvals, evidence_manifests, experiments, incidents, rooms, runs, scorecards, tool_calls, workspaces};

pub async fn apply_event(conn: &mut PgConnection, row: &EventRow) -> Result<()> {
    let workspace = row.workspace_id();
    let kind: EventKind = match serde_json::from_value(row.data.clone()) {
        Ok(kind) => kind,
        Err(_) => {
            tracing::trace!(event_type = %row.event_type, "unrecognized event type, skipping projection");
            return Ok(());
        }
    };

    let event_id = row.event_id;
    let stream_seq = row.stream_seq;

    match kind {
        EventKind::RoomCreated { room_id, name } => {
            rooms::handle_room_created(conn, workspace, event_id, stream_seq, &room_id, &name).await?
        }
        EventKind::ThreadCreated { thread_id, room_id, title } => {
            rooms::handle_thread_created(conn, workspace, event_id, stream_seq, &thread_id, &room_id, &title).await?
        }
        EventKind::MessageCreated { thread_id, .. } => {
            rooms::handle_message_created(conn, workspace, event_id, stream_seq, &thread_id).await?
        }

        EventKind::RunQueued { run_id, .. } => {
            runs::handle_run_queued(conn, workspace, event_id, stream_seq, &run_id).await?
        }
        EventKind::RunStarted { run_id } => {
            runs::handle_run_started(conn, workspace, event_id, stream_seq, &run_id).await?
        }
        EventKind::RunStepRecorded { run_id, step_id, summary } => {
            runs::handle_run_step_recorded(conn, workspace, event_id, stream_seq, &run_id, &step_id, &summary).await?
        }
        EventKind::RunSucceeded { run_id } => {
            runs::handle_run_succeeded(conn, workspace, event_id, stream_seq, &run_id).await?
        }
        EventKind::RunFailed { run_id, .. } => {
            runs::handle_run_failed(conn, workspace, event_id, stream_seq, &run_id).await?
        }

        EventKind::ApprovalRequested { approval_id, entity_type, entity_id } => {
            approvals::handle_approval_requested(conn, workspace, event_id, stream_seq, &approval_id, &entity_type, &entity_id).await?
        }
        EventKind::ApprovalDecided { approval_id, approved, decided_by } => {
            approvals::handle_approval_decided(conn, workspace, event_id, stream_seq, &approval_id, approved, &decided_by).await?
        }

        EventKind::IncidentOpened { incident_id, category, summary } => {
            incidents::handle_incident_opened(conn, workspace, event_id, stream_seq, &incident_id, &category, &summary).await?
        }
        EventKind::IncidentRcaRecorded { incident_id, .. } => {
            incidents::handle_incident_rca_recorded(conn, workspace, event_id, stream_seq, &incident_id).await?
        }
        EventKind::IncidentLearningRecorded { incident_id, .. } => {
            incidents::handle_incident_learning_recorded(conn, workspace, event_id, stream_seq, &incident_id).await?
        }
        EventKind::IncidentClosed { incident_id } => {
            incidents::handle_incident_closed(conn, workspace, event_id, stream_seq, &incident_id).await?
        }

        EventKind::ScorecardRecorded { scorecard_id, run_id, risk_tier, passed } => {
            scorecards::handle_scorecard_recorded(conn, workspace, event_id, stream_seq, &scorecard_id, &run_id, &risk_tier, passed).await?
        }

        EventKind::AgentLifecycleTransitioned { agent_id, to_state, .. } => {
            agents::handle_agent_lifecycle_transitioned(conn, workspace, event_id, stream_seq, &agent_id, &to_state).await?
        }

        EventKind::WorkspaceCreated { bootstrap_owner_actor_id, .. } => {
            workspaces::handle_workspace_created(conn, workspace, event_id, stream_seq, &bootstrap_owner_actor_id).await?
        }

        EventKind::ExperimentOpened { experiment_id, hypothesis } => {
            experiments::handle_experiment_opened(conn, workspace, event_id, stream_seq, &experiment_id, &hypothesis).await?
        }
        EventKind::ExperimentClosed { experiment_id, outcome } => {
            experiments::handle_experiment_closed(conn, workspace, event_id, stream_seq, &experiment_id, &outcome).await?
        }

        EventKind::ToolCallRecorded { tool_call_id, run_id, tool_name, status } => {
            tool_calls::handle_tool_call_recorded(conn, workspace, event_id, stream_seq, &tool_call_id, &run_id, &tool_name, &status).await?
        }

        EventKind::EvidenceManifestRecorded { manifest_id, run_id, digest } => {
            evidence_manifests::handle_evidence_manifest_recorded(conn, workspace, event_id, stream_seq, &manifest_id, &run_id, &digest).await?
        }

        other => {
            tracing::trace!(event_type = other.event_type(), "event type has no read-model projection");
        }
    }

    update_watermark(conn, workspace, event_id, stream_seq).await
}

// `stream_seq` only orders events within one stream, so it can't gate
// this update the way the per-entity projections above do — apply_event
// is invoked once per appended event in append order, so the watermark
// is simply the last one seen.
async fn update_watermark(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: uuid::Uuid,
    stream_seq: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO projector_watermarks (workspace_id, projector_name, last_event_id, last_stream_seq, updated_at)
        VALUES ($1, 'default', $2, $3, now())
        ON CONFLICT (workspace_id, projector_name) DO UPDATE SET
            last_event_id = EXCLUDED.last_event_id,
            last_stream_seq = EXCLUDED.last_stream_seq,
            updated_at = now()
        "#,
    )
    .bind(workspace.0)
    .bind(event_id)
    .bind(stream_seq)
    .execute(conn)
    .await?;
    Ok(())
}
