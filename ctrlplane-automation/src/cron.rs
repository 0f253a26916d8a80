//! Cron watchdog (§4.6): scans for work the rest of the automation
//! loop left stranded — runs stuck `running` past their expected
//! lifetime, approvals nobody decided on — and opens one incident per
//! stale item. Every invocation is fenced by a cron lock so only one
//! process runs a given job at a time, and a job halts itself after too
//! many consecutive failures rather than hammering a broken dependency
//! forever.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ctrlplane_domain::event::{Actor, EventDraft, EventKind, StreamRef, StreamType};
use ctrlplane_domain::ids::{CorrelationId, WorkspaceId};
use ctrlplane_eventlog::append;
use ctrlplane_store::{CronLockRepository, CronWatchdogRepository, ProjectionReader};
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::error::{AutomationError, AutomationResult};

const LEASE_DURATION_SECS: i64 = 300;
const HALT_AFTER_CONSECUTIVE_FAILURES: i32 = 5;
const STALE_RUN_JOB: &str = "stale_run_scan";
const STALE_APPROVAL_JOB: &str = "stale_approval_scan";

pub struct CronWatchdog {
    pool: PgPool,
    locks: Arc<dyn CronLockRepository>,
    watchdog: Arc<dyn CronWatchdogRepository>,
    projections: Arc<dyn ProjectionReader>,
    worker_id: String,
}

impl CronWatchdog {
    pub fn new(
        pool: PgPool,
        locks: Arc<dyn CronLockRepository>,
        watchdog: Arc<dyn CronWatchdogRepository>,
        projections: Arc<dyn ProjectionReader>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self { pool, locks, watchdog, projections, worker_id: worker_id.into() }
    }

    /// Scans for runs that have been `running` since before `max_age`,
    /// opening one idempotent incident per stale run. Skips the scan
    /// entirely if the job is halted or another worker holds the lock.
    #[instrument(skip(self))]
    pub async fn scan_stale_runs(&self, workspace: WorkspaceId, max_age: Duration, limit: i64) -> AutomationResult<usize> {
        self.run_guarded(STALE_RUN_JOB, || async {
            let older_than = Utc::now() - max_age;
            let stale = self.projections.list_stale_runs(workspace, older_than, limit).await?;
            for run in &stale {
                self.open_stale_incident(workspace, "stale_run", &run.run_id, older_than).await?;
            }
            Ok(stale.len())
        })
        .await
    }

    /// Scans for approvals still `pending` since before `max_age`.
    #[instrument(skip(self))]
    pub async fn scan_stale_approvals(&self, workspace: WorkspaceId, max_age: Duration, limit: i64) -> AutomationResult<usize> {
        self.run_guarded(STALE_APPROVAL_JOB, || async {
            let older_than = Utc::now() - max_age;
            let stale = self.projections.list_stale_pending_approvals(workspace, older_than, limit).await?;
            for approval in &stale {
                self.open_stale_incident(workspace, "stale_approval", &approval.approval_id, older_than).await?;
            }
            Ok(stale.len())
        })
        .await
    }

    /// Acquires the job's lock, runs `body`, records the outcome
    /// against the failure-streak counter, and releases the lock. Runs
    /// `body` only if the job isn't currently halted.
    async fn run_guarded<F, Fut>(&self, job_name: &str, body: F) -> AutomationResult<usize>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AutomationResult<usize>>,
    {
        if let Some(state) = self.watchdog.get(job_name).await? {
            if state.halted {
                warn!(job_name, "cron job halted after repeated failures, skipping");
                return Ok(0);
            }
        }

        let lock = match self.locks.try_acquire(job_name, &self.worker_id, LEASE_DURATION_SECS).await? {
            Some(lock) => lock,
            None => {
                info!(job_name, "cron lock held by another worker, skipping");
                return Ok(0);
            }
        };

        let result = body().await;

        self.watchdog
            .record_outcome(job_name, result.is_ok(), HALT_AFTER_CONSECUTIVE_FAILURES)
            .await?;
        self.locks.release(job_name, lock.fencing_token).await?;
        result
    }

    async fn open_stale_incident(&self, workspace: WorkspaceId, category: &str, entity_id: &str, older_than: DateTime<Utc>) -> AutomationResult<()> {
        let mut conn = self.pool.acquire().await?;
        let incident_id = format!("{category}-{entity_id}");
        let idempotency_key = format!("incident:{category}:{workspace}:{entity_id}");
        let kind = EventKind::IncidentOpened {
            incident_id: incident_id.clone(),
            category: category.to_string(),
            summary: format!("{entity_id} has been outstanding since before {older_than}"),
        };
        let draft = EventDraft::from_kind(
            workspace,
            Actor::system(),
            StreamRef::new(StreamType::Incident, incident_id),
            CorrelationId::new(),
            None,
            Some(idempotency_key),
            &kind,
        )
        .map_err(AutomationError::Domain)?;
        append::append(&mut conn, workspace, draft).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halt_threshold_is_five_consecutive_failures() {
        assert_eq!(HALT_AFTER_CONSECUTIVE_FAILURES, 5);
    }
}
