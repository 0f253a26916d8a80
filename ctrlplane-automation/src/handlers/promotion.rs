//! Promotion loop (§4.6): turns a scorecard verdict into the next step
//! for the run it belongs to — a request for agent-level approval, an
//! escalation to a human, or (on repeated overflow) an incident.

use std::sync::Arc;

use ctrlplane_domain::event::{Actor, EventDraft, EventKind, StreamRef, StreamType};
use ctrlplane_domain::ids::{CorrelationId, WorkspaceId};
use ctrlplane_eventlog::{append, EventRow};
use ctrlplane_store::ProjectionReader;
use sqlx::PgConnection;

use crate::error::{AutomationError, AutomationResult};

/// Consecutive PASS scorecards for the same run before a `risk_tier<=
/// medium` promotion is treated as overflow rather than progress — the
/// loop would otherwise keep re-requesting approval forever on a run
/// that never actually advances.
const MAX_PROMOTION_ITERATIONS: i64 = 5;

fn risk_tier_rank(tier: &str) -> i32 {
    match tier {
        "low" => 0,
        "medium" => 1,
        _ => 2,
    }
}

pub(crate) async fn handle_scorecard_recorded(
    conn: &mut PgConnection,
    projections: &Arc<dyn ProjectionReader>,
    workspace: WorkspaceId,
    row: &EventRow,
    scorecard_id: &str,
    run_id: &str,
    risk_tier: &str,
    passed: bool,
) -> AutomationResult<()> {
    if !passed {
        return Ok(());
    }

    let run = projections.find_run(workspace, run_id).await?;
    let thread_id = run.map(|r| r.thread_id).unwrap_or_else(|| format!("run:{run_id}"));
    let correlation_id = row.correlation_id();

    if risk_tier_rank(risk_tier) >= risk_tier_rank("high") {
        emit_message(
            conn,
            workspace,
            &correlation_id,
            row.event_id,
            &thread_id,
            "request_human_decision",
            scorecard_id,
        )
        .await?;
        return Ok(());
    }

    if promotion_iteration_count(conn, workspace, run_id).await? >= MAX_PROMOTION_ITERATIONS {
        open_overflow_incident(conn, workspace, &correlation_id, row.event_id, run_id).await?;
        return Ok(());
    }

    emit_message(
        conn,
        workspace,
        &correlation_id,
        row.event_id,
        &thread_id,
        "request_approval",
        scorecard_id,
    )
    .await
}

/// How many scorecards have already been recorded for this run — a
/// cheap proxy for "how many times has the promotion loop already
/// looked at this run", since each scorecard insert is itself
/// idempotent on `scorecard_id`.
async fn promotion_iteration_count(conn: &mut PgConnection, workspace: WorkspaceId, run_id: &str) -> AutomationResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM proj_scorecards WHERE workspace_id = $1 AND run_id = $2")
        .bind(workspace.0)
        .bind(run_id)
        .fetch_one(conn)
        .await?;
    Ok(count)
}

async fn emit_message(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    correlation_id: &CorrelationId,
    causation_id: uuid::Uuid,
    thread_id: &str,
    intent: &str,
    entity_id: &str,
) -> AutomationResult<()> {
    let idempotency_key = format!("message:{intent}:{workspace}:{entity_id}");
    let message_id = uuid::Uuid::now_v7().to_string();
    let kind = EventKind::MessageCreated {
        message_id,
        thread_id: thread_id.to_string(),
        intent: Some(intent.to_string()),
        body: format!("scorecard {entity_id} promoted via {intent}"),
    };
    let draft = EventDraft::from_kind(
        workspace,
        Actor::system(),
        StreamRef::new(StreamType::Thread, thread_id),
        correlation_id.clone(),
        Some(causation_id),
        Some(idempotency_key),
        &kind,
    )
    .map_err(AutomationError::Domain)?;
    append::append(conn, workspace, draft).await?;
    Ok(())
}

async fn open_overflow_incident(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    correlation_id: &CorrelationId,
    causation_id: uuid::Uuid,
    run_id: &str,
) -> AutomationResult<()> {
    let incident_id = format!("promotion-overflow-{run_id}");
    let idempotency_key = format!("incident:promotion_overflow:{workspace}:{run_id}");
    let kind = EventKind::IncidentOpened {
        incident_id: incident_id.clone(),
        category: "promotion_overflow".to_string(),
        summary: format!("run {run_id} exceeded {MAX_PROMOTION_ITERATIONS} promotion iterations without reaching a terminal state"),
    };
    let draft = EventDraft::from_kind(
        workspace,
        Actor::system(),
        StreamRef::new(StreamType::Incident, incident_id),
        correlation_id.clone(),
        Some(causation_id),
        Some(idempotency_key),
        &kind,
    )
    .map_err(AutomationError::Domain)?;
    append::append(conn, workspace, draft).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_tier_rank_orders_high_above_medium_above_low() {
        assert!(risk_tier_rank("high") > risk_tier_rank("medium"));
        assert!(risk_tier_rank("medium") > risk_tier_rank("low"));
    }
}
