//! Read-side access to the projection tables the projector keeps in
//! lockstep with the event log, plus the watermark table that tracks
//! how far each projection has caught up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctrlplane_domain::ids::WorkspaceId;
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct RunView {
    pub run_id: String,
    pub workspace_id: WorkspaceId,
    pub thread_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub step_count: i32,
}

#[derive(Debug, Clone)]
pub struct ApprovalView {
    pub approval_id: String,
    pub workspace_id: WorkspaceId,
    pub entity_type: String,
    pub entity_id: String,
    pub status: String,
    pub decided_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct IncidentView {
    pub incident_id: String,
    pub workspace_id: WorkspaceId,
    pub category: String,
    pub status: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub has_rca: bool,
    pub has_learning: bool,
}

#[derive(Debug, Clone)]
pub struct ExperimentView {
    pub experiment_id: String,
    pub workspace_id: WorkspaceId,
    pub hypothesis: String,
    pub status: String,
    pub outcome: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct WorkspaceView {
    pub workspace_id: WorkspaceId,
    pub bootstrap_owner_actor_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AgentView {
    pub agent_id: String,
    pub workspace_id: WorkspaceId,
    pub lifecycle_state: String,
    pub updated_at: DateTime<Utc>,
}

/// One row per `(workspace, projector_name)`: how far that projection
/// has consumed the log. The projector advances this transactionally
/// alongside the projection tables themselves.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectorWatermark {
    pub workspace_id: WorkspaceId,
    pub projector_name: String,
    pub last_event_id: Option<Uuid>,
    pub last_stream_seq: i64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProjectionReader: Send + Sync {
    async fn find_run(&self, workspace: WorkspaceId, run_id: &str) -> Result<Option<RunView>, StoreError>;
    async fn list_runs(&self, workspace: WorkspaceId, thread_id: &str, limit: i64) -> Result<Vec<RunView>, StoreError>;
    async fn find_approval(&self, workspace: WorkspaceId, approval_id: &str) -> Result<Option<ApprovalView>, StoreError>;
    async fn list_open_incidents(&self, workspace: WorkspaceId) -> Result<Vec<IncidentView>, StoreError>;
    async fn find_incident(&self, workspace: WorkspaceId, incident_id: &str) -> Result<Option<IncidentView>, StoreError>;
    async fn find_experiment(&self, workspace: WorkspaceId, experiment_id: &str) -> Result<Option<ExperimentView>, StoreError>;
    async fn find_agent(&self, workspace: WorkspaceId, agent_id: &str) -> Result<Option<AgentView>, StoreError>;
    async fn find_workspace(&self, workspace: WorkspaceId) -> Result<Option<WorkspaceView>, StoreError>;
    async fn get_watermark(&self, workspace: WorkspaceId, projector_name: &str) -> Result<Option<ProjectorWatermark>, StoreError>;

    /// Runs still `running` whose last projection update is older than
    /// `older_than` — the cron watchdog's "demoted runs" scan (§4.6).
    async fn list_stale_runs(&self, workspace: WorkspaceId, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<RunView>, StoreError>;

    /// Approvals still `pending` requested before `older_than` — the
    /// watchdog's approvals scan.
    async fn list_stale_pending_approvals(&self, workspace: WorkspaceId, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<ApprovalView>, StoreError>;
}

#[cfg(feature = "postgres")]
pub use pg::PgProjectionReader;

#[cfg(feature = "postgres")]
mod pg {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PgProjectionReader {
        pool: PgPool,
    }

    impl PgProjectionReader {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl ProjectionReader for PgProjectionReader {
        async fn find_run(&self, workspace: WorkspaceId, run_id: &str) -> Result<Option<RunView>, StoreError> {
            let row = sqlx::query("SELECT * FROM proj_runs WHERE workspace_id = $1 AND run_id = $2")
                .bind(workspace.0)
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| {
                Ok(RunView {
                    run_id: r.try_get("run_id")?,
                    workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                    thread_id: r.try_get("thread_id")?,
                    status: r.try_get("status")?,
                    created_at: r.try_get("created_at")?,
                    finished_at: r.try_get("finished_at")?,
                    step_count: r.try_get("step_count")?,
                })
            })
            .transpose()
        }

        async fn list_runs(&self, workspace: WorkspaceId, thread_id: &str, limit: i64) -> Result<Vec<RunView>, StoreError> {
            let rows = sqlx::query(
                "SELECT * FROM proj_runs WHERE workspace_id = $1 AND thread_id = $2 ORDER BY created_at DESC LIMIT $3",
            )
            .bind(workspace.0)
            .bind(thread_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter()
                .map(|r| {
                    Ok(RunView {
                        run_id: r.try_get("run_id")?,
                        workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                        thread_id: r.try_get("thread_id")?,
                        status: r.try_get("status")?,
                        created_at: r.try_get("created_at")?,
                        finished_at: r.try_get("finished_at")?,
                        step_count: r.try_get("step_count")?,
                    })
                })
                .collect()
        }

        async fn find_approval(&self, workspace: WorkspaceId, approval_id: &str) -> Result<Option<ApprovalView>, StoreError> {
            let row = sqlx::query("SELECT * FROM proj_approvals WHERE workspace_id = $1 AND approval_id = $2")
                .bind(workspace.0)
                .bind(approval_id)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| {
                Ok(ApprovalView {
                    approval_id: r.try_get("approval_id")?,
                    workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                    entity_type: r.try_get("entity_type")?,
                    entity_id: r.try_get("entity_id")?,
                    status: r.try_get("status")?,
                    decided_by: r.try_get("decided_by")?,
                    created_at: r.try_get("created_at")?,
                    decided_at: r.try_get("decided_at")?,
                })
            })
            .transpose()
        }

        async fn list_open_incidents(&self, workspace: WorkspaceId) -> Result<Vec<IncidentView>, StoreError> {
            let rows = sqlx::query(
                "SELECT * FROM proj_incidents WHERE workspace_id = $1 AND status != 'closed' ORDER BY opened_at DESC",
            )
            .bind(workspace.0)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter()
                .map(|r| {
                    Ok(IncidentView {
                        incident_id: r.try_get("incident_id")?,
                        workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                        category: r.try_get("category")?,
                        status: r.try_get("status")?,
                        opened_at: r.try_get("opened_at")?,
                        closed_at: r.try_get("closed_at")?,
                        has_rca: r.try_get("has_rca")?,
                        has_learning: r.try_get("has_learning")?,
                    })
                })
                .collect()
        }

        async fn find_incident(&self, workspace: WorkspaceId, incident_id: &str) -> Result<Option<IncidentView>, StoreError> {
            let row = sqlx::query("SELECT * FROM proj_incidents WHERE workspace_id = $1 AND incident_id = $2")
                .bind(workspace.0)
                .bind(incident_id)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| {
                Ok(IncidentView {
                    incident_id: r.try_get("incident_id")?,
                    workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                    category: r.try_get("category")?,
                    status: r.try_get("status")?,
                    opened_at: r.try_get("opened_at")?,
                    closed_at: r.try_get("closed_at")?,
                    has_rca: r.try_get("has_rca")?,
                    has_learning: r.try_get("has_learning")?,
                })
            })
            .transpose()
        }

        async fn find_experiment(&self, workspace: WorkspaceId, experiment_id: &str) -> Result<Option<ExperimentView>, StoreError> {
            let row = sqlx::query("SELECT * FROM proj_experiments WHERE workspace_id = $1 AND experiment_id = $2")
                .bind(workspace.0)
                .bind(experiment_id)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| {
                Ok(ExperimentView {
                    experiment_id: r.try_get("experiment_id")?,
                    workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                    hypothesis: r.try_get("hypothesis")?,
                    status: r.try_get("status")?,
                    outcome: r.try_get("outcome")?,
                    opened_at: r.try_get("opened_at")?,
                    closed_at: r.try_get("closed_at")?,
                })
            })
            .transpose()
        }

        async fn find_workspace(&self, workspace: WorkspaceId) -> Result<Option<WorkspaceView>, StoreError> {
            let row = sqlx::query("SELECT * FROM proj_workspaces WHERE workspace_id = $1")
                .bind(workspace.0)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| {
                Ok(WorkspaceView {
                    workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                    bootstrap_owner_actor_id: r.try_get("bootstrap_owner_actor_id")?,
                    created_at: r.try_get("created_at")?,
                })
            })
            .transpose()
        }

        async fn find_agent(&self, workspace: WorkspaceId, agent_id: &str) -> Result<Option<AgentView>, StoreError> {
            let row = sqlx::query("SELECT * FROM proj_agents WHERE workspace_id = $1 AND agent_id = $2")
                .bind(workspace.0)
                .bind(agent_id)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| {
                Ok(AgentView {
                    agent_id: r.try_get("agent_id")?,
                    workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                    lifecycle_state: r.try_get("lifecycle_state")?,
                    updated_at: r.try_get("updated_at")?,
                })
            })
            .transpose()
        }

        async fn get_watermark(&self, workspace: WorkspaceId, projector_name: &str) -> Result<Option<ProjectorWatermark>, StoreError> {
            let row = sqlx::query(
                "SELECT * FROM projector_watermarks WHERE workspace_id = $1 AND projector_name = $2",
            )
            .bind(workspace.0)
            .bind(projector_name)
            .fetch_optional(&self.pool)
            .await?;
            row.map(|r| {
                Ok(ProjectorWatermark {
                    workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                    projector_name: r.try_get("projector_name")?,
                    last_event_id: r.try_get("last_event_id")?,
                    last_stream_seq: r.try_get("last_stream_seq")?,
                    updated_at: r.try_get("updated_at")?,
                })
            })
            .transpose()
        }

        async fn list_stale_runs(&self, workspace: WorkspaceId, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<RunView>, StoreError> {
            let rows = sqlx::query(
                "SELECT * FROM proj_runs WHERE workspace_id = $1 AND status = 'running' AND created_at < $2 ORDER BY created_at ASC LIMIT $3",
            )
            .bind(workspace.0)
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter()
                .map(|r| {
                    Ok(RunView {
                        run_id: r.try_get("run_id")?,
                        workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                        thread_id: r.try_get("thread_id")?,
                        status: r.try_get("status")?,
                        created_at: r.try_get("created_at")?,
                        finished_at: r.try_get("finished_at")?,
                        step_count: r.try_get("step_count")?,
                    })
                })
                .collect()
        }

        async fn list_stale_pending_approvals(&self, workspace: WorkspaceId, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<ApprovalView>, StoreError> {
            let rows = sqlx::query(
                "SELECT * FROM proj_approvals WHERE workspace_id = $1 AND status = 'pending' AND created_at < $2 ORDER BY created_at ASC LIMIT $3",
            )
            .bind(workspace.0)
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter()
                .map(|r| {
                    Ok(ApprovalView {
                        approval_id: r.try_get("approval_id")?,
                        workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                        entity_type: r.try_get("entity_type")?,
                        entity_id: r.try_get("entity_id")?,
                        status: r.try_get("status")?,
                        decided_by: r.try_get("decided_by")?,
                        created_at: r.try_get("created_at")?,
                        decided_at: r.try_get("decided_at")?,
                    })
                })
                .collect()
        }
    }
}
