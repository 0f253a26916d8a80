//! Scorecard projection: one row per run's risk-tier pass/fail verdict.

use ctrlplane_domain::ids::WorkspaceId;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

pub(crate) async fn handle_scorecard_recorded(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    scorecard_id: &str,
    run_id: &str,
    risk_tier: &str,
    passed: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proj_scorecards (scorecard_id, workspace_id, run_id, risk_tier, passed, last_event_id, last_stream_seq, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, now())
        ON CONFLICT (scorecard_id) DO UPDATE SET
            last_event_id = EXCLUDED.last_event_id,
            last_stream_seq = EXCLUDED.last_stream_seq
        WHERE proj_scorecards.last_stream_seq < EXCLUDED.last_stream_seq
        "#,
    )
    .bind(scorecard_id)
    .bind(workspace.0)
    .bind(run_id)
    .bind(risk_tier)
    .bind(passed)
    .bind(event_id)
    .bind(stream_seq)
    .execute(conn)
    .await?;
    Ok(())
}
