//! Approval projections: one row per approval id tracking whether it's
//! still pending or has been decided.

use ctrlplane_domain::ids::WorkspaceId;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

pub(crate) async fn handle_approval_requested(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    approval_id: &str,
    entity_type: &str,
    entity_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proj_approvals (approval_id, workspace_id, entity_type, entity_id, status, last_event_id, last_stream_seq, created_at)
        VALUES ($1, $2, $3, $4, 'pending', $5, $6, now())
        ON CONFLICT (approval_id) DO UPDATE SET
            last_event_id = EXCLUDED.last_event_id,
            last_stream_seq = EXCLUDED.last_stream_seq
        WHERE proj_approvals.last_stream_seq < EXCLUDED.last_stream_seq
        "#,
    )
    .bind(approval_id)
    .bind(workspace.0)
    .bind(entity_type)
    .bind(entity_id)
    .bind(event_id)
    .bind(stream_seq)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn handle_approval_decided(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    approval_id: &str,
    approved: bool,
    decided_by: &str,
) -> Result<()> {
    let status = if approved { "approved" } else { "rejected" };
    sqlx::query(
        r#"
        UPDATE proj_approvals
        SET status = $1, decided_by = $2, decided_at = now(), last_event_id = $3, last_stream_seq = $4
        WHERE workspace_id = $5 AND approval_id = $6 AND last_stream_seq < $4
        "#,
    )
    .bind(status)
    .bind(decided_by)
    .bind(event_id)
    .bind(stream_seq)
    .bind(workspace.0)
    .bind(approval_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
