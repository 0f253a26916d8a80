//! The individual probes behind each `HealthReport` field. Each one is
//! a cheap, single-statement query — this runs on every cache miss, so
//! none of them may do table scans.

use chrono::Utc;
use ctrlplane_domain::ids::WorkspaceId;
use sqlx::{PgPool, Row};

use crate::error::HealthResult;
use crate::report::CheckResult;

pub async fn check_db(pool: &PgPool) -> CheckResult {
    match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await {
        Ok(_) => CheckResult::up(),
        Err(e) => CheckResult::down(e.to_string()),
    }
}

pub async fn check_kernel_schema_versions(pool: &PgPool) -> CheckResult {
    let row = sqlx::query("SELECT success FROM _sqlx_migrations ORDER BY version DESC LIMIT 1")
        .fetch_optional(pool)
        .await;
    match row {
        Ok(Some(r)) => {
            let success: bool = r.try_get("success").unwrap_or(false);
            if success {
                CheckResult::up()
            } else {
                CheckResult::down("latest migration did not apply cleanly")
            }
        }
        Ok(None) => CheckResult::down("no migrations recorded"),
        Err(e) => CheckResult::down(e.to_string()),
    }
}

pub async fn check_evt_events(pool: &PgPool) -> CheckResult {
    match sqlx::query("SELECT 1 FROM evt_events LIMIT 1").fetch_optional(pool).await {
        Ok(_) => CheckResult::up(),
        Err(e) => CheckResult::down(e.to_string()),
    }
}

pub async fn check_evt_events_idempotency(pool: &PgPool) -> CheckResult {
    let row = sqlx::query(
        "SELECT 1 FROM pg_indexes WHERE indexname = 'evt_events_idempotency_uq'",
    )
    .fetch_optional(pool)
    .await;
    match row {
        Ok(Some(_)) => CheckResult::up(),
        Ok(None) => CheckResult::down("idempotency uniqueness index missing"),
        Err(e) => CheckResult::down(e.to_string()),
    }
}

/// Any job the watchdog has halted after repeated failure. Returns the
/// check plus, when degraded, how long ago the halt-triggering update
/// happened (the summary's `cron_freshness_sec`).
pub async fn check_cron_watchdog(pool: &PgPool) -> HealthResult<(CheckResult, Option<i64>)> {
    let row = sqlx::query(
        "SELECT job_name, updated_at FROM cron_watchdog_state WHERE halted = true ORDER BY updated_at ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    match row {
        Some(r) => {
            let job_name: String = r.try_get("job_name")?;
            let updated_at: chrono::DateTime<Utc> = r.try_get("updated_at")?;
            let age = (Utc::now() - updated_at).num_seconds();
            Ok((CheckResult::down(format!("{job_name} halted after repeated failures")), Some(age)))
        }
        None => Ok((CheckResult::up(), None)),
    }
}

/// Seconds since the `default` projector last advanced, workspace-scoped.
pub async fn check_projection_lag(pool: &PgPool, workspace: WorkspaceId, degraded_after_sec: i64) -> HealthResult<(CheckResult, Option<i64>)> {
    let row = sqlx::query(
        "SELECT updated_at FROM projector_watermarks WHERE workspace_id = $1 AND projector_name = 'default'",
    )
    .bind(workspace.0)
    .fetch_optional(pool)
    .await?;
    let Some(r) = row else {
        return Ok((CheckResult::up(), None));
    };
    let updated_at: chrono::DateTime<Utc> = r.try_get("updated_at")?;
    let lag = (Utc::now() - updated_at).num_seconds().max(0);
    let result = if lag > degraded_after_sec {
        CheckResult::degraded(format!("projector {lag}s behind"))
    } else {
        CheckResult::up()
    };
    Ok((result, Some(lag)))
}

pub async fn check_dlq_backlog(pool: &PgPool, workspace: WorkspaceId, degraded_after: i64) -> HealthResult<(CheckResult, i64)> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letter_entries WHERE workspace_id = $1")
        .bind(workspace.0)
        .fetch_one(pool)
        .await?;
    let result = if count >= degraded_after {
        CheckResult::degraded(format!("{count} dead-lettered entries"))
    } else {
        CheckResult::up()
    };
    Ok((result, count))
}

pub async fn check_rate_limit_flood(pool: &PgPool, workspace: WorkspaceId) -> HealthResult<(CheckResult, bool)> {
    let exhausted: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM rate_limit_buckets WHERE workspace_id = $1 AND tokens_remaining = 0",
    )
    .bind(workspace.0)
    .fetch_one(pool)
    .await?;
    let flood = exhausted > 0;
    let result = if flood {
        CheckResult::degraded(format!("{exhausted} bucket(s) exhausted"))
    } else {
        CheckResult::up()
    };
    Ok((result, flood))
}

pub async fn count_active_incidents(pool: &PgPool, workspace: WorkspaceId) -> HealthResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM proj_incidents WHERE workspace_id = $1 AND status != 'closed'")
        .bind(workspace.0)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
