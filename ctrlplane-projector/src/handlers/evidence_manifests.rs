//! Evidence manifest projection: one row per manifest recorded against
//! a run, carrying the content digest agents and reviewers check
//! provenance against (§4.2).

use ctrlplane_domain::ids::WorkspaceId;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

pub(crate) async fn handle_evidence_manifest_recorded(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    manifest_id: &str,
    run_id: &str,
    digest: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proj_evidence_manifests (manifest_id, workspace_id, run_id, digest, last_event_id, last_stream_seq, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        ON CONFLICT (manifest_id) DO UPDATE SET
            last_event_id = EXCLUDED.last_event_id,
            last_stream_seq = EXCLUDED.last_stream_seq
        WHERE proj_evidence_manifests.last_stream_seq < EXCLUDED.last_stream_seq
        "#,
    )
    .bind(manifest_id)
    .bind(workspace.0)
    .bind(run_id)
    .bind(digest)
    .bind(event_id)
    .bind(stream_seq)
    .execute(conn)
    .await?;
    Ok(())
}
