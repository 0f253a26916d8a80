//! Incident projections: open/RCA/learning/closed lifecycle tracked as
//! a single mutable row per incident, plus the automation loop's own
//! gate (§4.6: closing requires an RCA and a learning to be recorded).

use ctrlplane_domain::ids::WorkspaceId;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

pub(crate) async fn handle_incident_opened(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    incident_id: &str,
    category: &str,
    summary: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proj_incidents (incident_id, workspace_id, category, summary, status, has_rca, has_learning, last_event_id, last_stream_seq, opened_at)
        VALUES ($1, $2, $3, $4, 'open', false, false, $5, $6, now())
        ON CONFLICT (incident_id) DO UPDATE SET
            last_event_id = EXCLUDED.last_event_id,
            last_stream_seq = EXCLUDED.last_stream_seq
        WHERE proj_incidents.last_stream_seq < EXCLUDED.last_stream_seq
        "#,
    )
    .bind(incident_id)
    .bind(workspace.0)
    .bind(category)
    .bind(summary)
    .bind(event_id)
    .bind(stream_seq)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn handle_incident_rca_recorded(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    incident_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE proj_incidents
        SET has_rca = true, last_event_id = $1, last_stream_seq = $2
        WHERE workspace_id = $3 AND incident_id = $4 AND last_stream_seq < $2
        "#,
    )
    .bind(event_id)
    .bind(stream_seq)
    .bind(workspace.0)
    .bind(incident_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn handle_incident_learning_recorded(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    incident_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE proj_incidents
        SET has_learning = true, last_event_id = $1, last_stream_seq = $2
        WHERE workspace_id = $3 AND incident_id = $4 AND last_stream_seq < $2
        "#,
    )
    .bind(event_id)
    .bind(stream_seq)
    .bind(workspace.0)
    .bind(incident_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn handle_incident_closed(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    incident_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE proj_incidents
        SET status = 'closed', closed_at = now(), last_event_id = $1, last_stream_seq = $2
        WHERE workspace_id = $3 AND incident_id = $4 AND last_stream_seq < $2
        "#,
    )
    .bind(event_id)
    .bind(stream_seq)
    .bind(workspace.0)
    .bind(incident_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
