//! Experiment projection: open/closed lifecycle, one row per
//! experiment. Mirrors the incident projection's shape (§4.2).

use ctrlplane_domain::ids::WorkspaceId;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

pub(crate) async fn handle_experiment_opened(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    experiment_id: &str,
    hypothesis: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proj_experiments (experiment_id, workspace_id, hypothesis, status, last_event_id, last_stream_seq, opened_at)
        VALUES ($1, $2, $3, 'open', $4, $5, now())
        ON CONFLICT (experiment_id) DO UPDATE SET
            last_event_id = EXCLUDED.last_event_id,
            last_stream_seq = EXCLUDED.last_stream_seq
        WHERE proj_experiments.last_stream_seq < EXCLUDED.last_stream_seq
        "#,
    )
    .bind(experiment_id)
    .bind(workspace.0)
    .bind(hypothesis)
    .bind(event_id)
    .bind(stream_seq)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn handle_experiment_closed(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    experiment_id: &str,
    outcome: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE proj_experiments
        SET status = 'closed', outcome = $1, closed_at = now(), last_event_id = $2, last_stream_seq = $3
        WHERE workspace_id = $4 AND experiment_id = $5 AND last_stream_seq < $3
        "#,
    )
    .bind(outcome)
    .bind(event_id)
    .bind(stream_seq)
    .bind(workspace.0)
    .bind(experiment_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
