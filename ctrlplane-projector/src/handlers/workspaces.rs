//! Workspace provisioning projection: one row per workspace recording
//! its bootstrap owner, the identity the auth gate trusts for
//! capability-grant/revoke routes (§4.9).

use ctrlplane_domain::ids::WorkspaceId;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

pub(crate) async fn handle_workspace_created(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    bootstrap_owner_actor_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proj_workspaces (workspace_id, bootstrap_owner_actor_id, created_at, last_event_id, last_stream_seq)
        VALUES ($1, $2, now(), $3, $4)
        ON CONFLICT (workspace_id) DO UPDATE SET
            last_event_id = EXCLUDED.last_event_id,
            last_stream_seq = EXCLUDED.last_stream_seq
        WHERE proj_workspaces.last_stream_seq < EXCLUDED.last_stream_seq
        "#,
    )
    .bind(workspace.0)
    .bind(bootstrap_owner_actor_id)
    .bind(event_id)
    .bind(stream_seq)
    .execute(conn)
    .await?;
    Ok(())
}
