//! System health (§4.8): a per-workspace `{schema_version, ok, checks,
//! summary, meta}` report assembled from a handful of cheap probes and
//! held in a short-lived in-process cache so a chatty poller doesn't
//! turn a status page into a load generator.

#![warn(clippy::all)]

mod cache;
mod checks;
mod error;
mod report;

pub use cache::HealthCache;
pub use error::{HealthError, HealthResult};
pub use report::{
    CheckResult, CheckStatus, Checks, HealthReport, Meta, OptionalChecks, Summary, TopIssue,
    SCHEMA_VERSION,
};

use std::sync::Arc;

use ctrlplane_domain::ids::WorkspaceId;
use sqlx::PgPool;
use tracing::instrument;

use report::sort_top_issues;

/// Degrade the projector once it falls this far behind.
const PROJECTION_LAG_DEGRADED_AFTER_SECS: i64 = 60;
/// Degrade once the dead-letter queue accumulates this many entries.
const DLQ_BACKLOG_DEGRADED_AFTER: i64 = 1;

pub struct HealthChecker {
    pool: PgPool,
    cache: Arc<HealthCache>,
}

impl HealthChecker {
    pub fn new(pool: PgPool, cache: Arc<HealthCache>) -> Self {
        Self { pool, cache }
    }

    /// Returns the cached report if still fresh, otherwise runs every
    /// probe, assembles a fresh report, caches it, and returns it.
    #[instrument(skip(self))]
    pub async fn report(&self, workspace: WorkspaceId) -> HealthResult<HealthReport> {
        if let Some(cached) = self.cache.get(workspace) {
            return Ok(cached);
        }

        let db = checks::check_db(&self.pool).await;
        let kernel_schema_versions = checks::check_kernel_schema_versions(&self.pool).await;
        let evt_events = checks::check_evt_events(&self.pool).await;
        let evt_events_idempotency = checks::check_evt_events_idempotency(&self.pool).await;

        let (cron_watchdog, cron_freshness_sec) = checks::check_cron_watchdog(&self.pool).await?;
        let (projection_lag, projection_lag_sec) =
            checks::check_projection_lag(&self.pool, workspace, PROJECTION_LAG_DEGRADED_AFTER_SECS).await?;
        let (dlq_backlog, dlq_backlog_count) =
            checks::check_dlq_backlog(&self.pool, workspace, DLQ_BACKLOG_DEGRADED_AFTER).await?;
        let (rate_limit_flood, rate_limit_flood_detected) =
            checks::check_rate_limit_flood(&self.pool, workspace).await?;
        let active_incidents_count = checks::count_active_incidents(&self.pool, workspace).await?;

        let required = [&db, &kernel_schema_versions, &evt_events, &evt_events_idempotency];
        let optional = [&cron_watchdog, &projection_lag, &dlq_backlog, &rate_limit_flood];
        let ok = required.iter().all(|c| c.status.is_ok()) && optional.iter().all(|c| c.status.is_ok());

        let health_summary = required
            .iter()
            .chain(optional.iter())
            .map(|c| c.status)
            .max()
            .unwrap_or(CheckStatus::Up);

        let mut top_issues = Vec::new();
        for (kind, check, age) in [
            ("db", &db, None),
            ("kernel_schema_versions", &kernel_schema_versions, None),
            ("evt_events", &evt_events, None),
            ("evt_events_idempotency", &evt_events_idempotency, None),
            ("cron_watchdog", &cron_watchdog, cron_freshness_sec),
            ("projection_lag", &projection_lag, projection_lag_sec),
            ("dlq_backlog", &dlq_backlog, None),
            ("rate_limit_flood", &rate_limit_flood, None),
        ] {
            if !check.status.is_ok() {
                top_issues.push(TopIssue {
                    kind: kind.to_string(),
                    status: check.status,
                    age_sec: age,
                    detail: check.detail.clone(),
                });
            }
        }
        sort_top_issues(&mut top_issues);

        let report = HealthReport {
            schema_version: SCHEMA_VERSION,
            ok,
            checks: Checks {
                db,
                kernel_schema_versions,
                evt_events,
                evt_events_idempotency,
                optional: OptionalChecks {
                    cron_watchdog: Some(cron_watchdog),
                    projection_lag: Some(projection_lag),
                    dlq_backlog: Some(dlq_backlog),
                    rate_limit_flood: Some(rate_limit_flood),
                },
            },
            summary: Summary {
                health_summary,
                cron_freshness_sec,
                projection_lag_sec,
                dlq_backlog_count: Some(dlq_backlog_count),
                rate_limit_flood_detected,
                active_incidents_count,
                top_issues,
            },
            meta: Meta { cached: false },
        };

        self.cache.put(workspace, report.clone());
        Ok(report)
    }
}
