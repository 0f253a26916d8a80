//! Agent lifecycle projection: current state only, history lives in
//! the event log itself.

use ctrlplane_domain::ids::WorkspaceId;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

pub(crate) async fn handle_agent_lifecycle_transitioned(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    agent_id: &str,
    to_state: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proj_agents (agent_id, workspace_id, lifecycle_state, last_event_id, last_stream_seq, updated_at)
        VALUES ($1, $2, $3, $4, $5, now())
        ON CONFLICT (agent_id) DO UPDATE SET
            lifecycle_state = EXCLUDED.lifecycle_state,
            last_event_id = EXCLUDED.last_event_id,
            last_stream_seq = EXCLUDED.last_stream_seq,
            updated_at = now()
        WHERE proj_agents.last_stream_seq < EXCLUDED.last_stream_seq
        "#,
    )
    .bind(agent_id)
    .bind(workspace.0)
    .bind(to_state)
    .bind(event_id)
    .bind(stream_seq)
    .execute(conn)
    .await?;
    Ok(())
}
