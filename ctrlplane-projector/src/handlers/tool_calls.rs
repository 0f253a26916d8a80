//! Tool call projection: one row per recorded tool call, keyed by its
//! own id rather than folded into `proj_steps` — a run's tool calls are
//! queried independently of its step log (§4.2).

use ctrlplane_domain::ids::WorkspaceId;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

pub(crate) async fn handle_tool_call_recorded(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    tool_call_id: &str,
    run_id: &str,
    tool_name: &str,
    status: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proj_tool_calls (tool_call_id, workspace_id, run_id, tool_name, status, last_event_id, last_stream_seq, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, now())
        ON CONFLICT (tool_call_id) DO UPDATE SET
            status = EXCLUDED.status,
            last_event_id = EXCLUDED.last_event_id,
            last_stream_seq = EXCLUDED.last_stream_seq
        WHERE proj_tool_calls.last_stream_seq < EXCLUDED.last_stream_seq
        "#,
    )
    .bind(tool_call_id)
    .bind(workspace.0)
    .bind(run_id)
    .bind(tool_name)
    .bind(status)
    .bind(event_id)
    .bind(stream_seq)
    .execute(conn)
    .await?;
    Ok(())
}
