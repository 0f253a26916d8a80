//! Run projections: `proj_runs` is the run's current status and step
//! count, `proj_steps` is the append-only step log within a run.

use ctrlplane_domain::ids::WorkspaceId;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

/// Status ordering used to reject a projection update that would move
/// a run backward (e.g. `succeeded` regressing to `running` on a
/// reordered replay). Matches §4.2's no-op-on-regression rule.
fn status_rank(status: &str) -> i32 {
    match status {
        "queued" => 0,
        "running" => 1,
        "succeeded" | "failed" => 2,
        _ => -1,
    }
}

async fn upsert_run_status(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    run_id: &str,
    thread_id: Option<&str>,
    status: &str,
    event_id: Uuid,
    stream_seq: i64,
    finished: bool,
) -> Result<()> {
    let rank = status_rank(status);
    sqlx::query(
        r#"
        INSERT INTO proj_runs (run_id, workspace_id, thread_id, status, status_rank, step_count, created_at, finished_at, last_event_id, last_stream_seq)
        VALUES ($1, $2, $3, $4, $5, 0, now(), CASE WHEN $6 THEN now() ELSE NULL END, $7, $8)
        ON CONFLICT (run_id) DO UPDATE SET
            status = EXCLUDED.status,
            status_rank = EXCLUDED.status_rank,
            thread_id = COALESCE(EXCLUDED.thread_id, proj_runs.thread_id),
            finished_at = CASE WHEN $6 THEN now() ELSE proj_runs.finished_at END,
            last_event_id = EXCLUDED.last_event_id,
            last_stream_seq = EXCLUDED.last_stream_seq
        WHERE proj_runs.last_stream_seq < EXCLUDED.last_stream_seq AND proj_runs.status_rank <= EXCLUDED.status_rank
        "#,
    )
    .bind(run_id)
    .bind(workspace.0)
    .bind(thread_id)
    .bind(status)
    .bind(rank)
    .bind(finished)
    .bind(event_id)
    .bind(stream_seq)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn handle_run_queued(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    run_id: &str,
) -> Result<()> {
    upsert_run_status(conn, workspace, run_id, None, "queued", event_id, stream_seq, false).await
}

pub(crate) async fn handle_run_started(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    run_id: &str,
) -> Result<()> {
    upsert_run_status(conn, workspace, run_id, None, "running", event_id, stream_seq, false).await
}

pub(crate) async fn handle_run_succeeded(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    run_id: &str,
) -> Result<()> {
    upsert_run_status(conn, workspace, run_id, None, "succeeded", event_id, stream_seq, true).await
}

pub(crate) async fn handle_run_failed(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    run_id: &str,
) -> Result<()> {
    upsert_run_status(conn, workspace, run_id, None, "failed", event_id, stream_seq, true).await
}

pub(crate) async fn handle_run_step_recorded(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    run_id: &str,
    step_id: &str,
    summary: &str,
) -> Result<()> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO proj_steps (step_id, workspace_id, run_id, summary, event_id, stream_seq, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        ON CONFLICT (step_id) DO NOTHING
        "#,
    )
    .bind(step_id)
    .bind(workspace.0)
    .bind(run_id)
    .bind(summary)
    .bind(event_id)
    .bind(stream_seq)
    .execute(&mut *conn)
    .await?;

    if inserted.rows_affected() == 1 {
        sqlx::query(
            r#"
            UPDATE proj_runs
            SET step_count = step_count + 1, last_event_id = $1, last_stream_seq = $2
            WHERE workspace_id = $3 AND run_id = $4 AND last_stream_seq < $2
            "#,
        )
        .bind(event_id)
        .bind(stream_seq)
        .bind(workspace.0)
        .bind(run_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_rank_orders_terminal_states_above_running() {
        assert!(status_rank("succeeded") > status_rank("running"));
        assert!(status_rank("running") > status_rank("queued"));
    }
}
