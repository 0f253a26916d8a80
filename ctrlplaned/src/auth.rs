//! Auth & workspace gate (§4.9): resolves every inbound call to an
//! `IdentityScope` before any handler body runs, via session lookup
//! first and a legacy header fallback second. The resolved scope is
//! threaded explicitly through call arguments, never read back out of
//! a global or task-local.

use std::sync::Arc;

use chrono::Utc;
use ctrlplane_domain::event::{Actor, ActorType};
use ctrlplane_domain::ids::{CorrelationId, WorkspaceId};
use ctrlplane_store::{ProjectionReader, SessionRepository};
use uuid::Uuid;

use crate::error::ApiError;
use crate::session::hash_token;

#[derive(Debug, Clone)]
pub struct IdentityScope {
    pub workspace_id: WorkspaceId,
    pub actor: Actor,
    pub correlation_id: CorrelationId,
}

impl IdentityScope {
    /// Looks up the calling workspace's provisioned bootstrap owner in
    /// `proj_workspaces` and compares it against this caller's actor id.
    /// A workspace that hasn't been bootstrapped yet has no owner at
    /// all, so every caller is rejected until `bootstrap_workspace`
    /// provisions one.
    pub async fn require_bootstrap_owner(&self, projections: &Arc<dyn ProjectionReader>) -> Result<(), ApiError> {
        let workspace = projections
            .find_workspace(self.workspace_id)
            .await
            .map_err(ApiError::Store)?
            .ok_or(ApiError::BootstrapForbidden)?;
        if workspace.bootstrap_owner_actor_id == self.actor.actor_id {
            Ok(())
        } else {
            Err(ApiError::BootstrapForbidden)
        }
    }
}

/// Resolves an `IdentityScope` from request headers: bearer session
/// token first, then the legacy `x-workspace-id`/`x-agent-id` pair.
pub async fn resolve_identity(
    sessions: &Arc<dyn SessionRepository>,
    headers: &axum::http::HeaderMap,
) -> Result<IdentityScope, ApiError> {
    let correlation_id = headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| CorrelationId(s.to_string()))
        .unwrap_or_else(CorrelationId::new);

    if let Some(token) = bearer_token(headers) {
        let token_hash = hash_token(&token);
        let session = sessions
            .find_by_token_hash(&token_hash)
            .await
            .map_err(ApiError::Store)?
            .ok_or(ApiError::UnauthorizedWorkspace)?;
        if !session.is_live(Utc::now()) {
            return Err(ApiError::UnauthorizedWorkspace);
        }
        return Ok(IdentityScope {
            workspace_id: session.workspace_id,
            actor: Actor::new(ActorType::Agent, session.actor_id),
            correlation_id,
        });
    }

    let workspace_header = headers
        .get("x-workspace-id")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::MissingWorkspaceHeader)?;
    let workspace_id = workspace_header
        .parse::<Uuid>()
        .map(WorkspaceId)
        .map_err(|_| ApiError::MissingWorkspaceHeader)?;
    let agent_id = headers
        .get("x-agent-id")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::MissingWorkspaceHeader)?;

    Ok(IdentityScope {
        workspace_id,
        actor: Actor::new(ActorType::Agent, agent_id),
        correlation_id,
    })
}

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use ctrlplane_store::{AgentView, ApprovalView, ExperimentView, IncidentView, ProjectorWatermark, RunView, StoreError, WorkspaceView};

    struct FakeProjections {
        workspace: Option<WorkspaceView>,
    }

    #[async_trait]
    impl ProjectionReader for FakeProjections {
        async fn find_run(&self, _: WorkspaceId, _: &str) -> Result<Option<RunView>, StoreError> { Ok(None) }
        async fn list_runs(&self, _: WorkspaceId, _: &str, _: i64) -> Result<Vec<RunView>, StoreError> { Ok(vec![]) }
        async fn find_approval(&self, _: WorkspaceId, _: &str) -> Result<Option<ApprovalView>, StoreError> { Ok(None) }
        async fn list_open_incidents(&self, _: WorkspaceId) -> Result<Vec<IncidentView>, StoreError> { Ok(vec![]) }
        async fn find_incident(&self, _: WorkspaceId, _: &str) -> Result<Option<IncidentView>, StoreError> { Ok(None) }
        async fn find_experiment(&self, _: WorkspaceId, _: &str) -> Result<Option<ExperimentView>, StoreError> { Ok(None) }
        async fn find_agent(&self, _: WorkspaceId, _: &str) -> Result<Option<AgentView>, StoreError> { Ok(None) }
        async fn find_workspace(&self, _: WorkspaceId) -> Result<Option<WorkspaceView>, StoreError> {
            Ok(self.workspace.clone())
        }
        async fn get_watermark(&self, _: WorkspaceId, _: &str) -> Result<Option<ProjectorWatermark>, StoreError> { Ok(None) }
        async fn list_stale_runs(&self, _: WorkspaceId, _: DateTime<Utc>, _: i64) -> Result<Vec<RunView>, StoreError> { Ok(vec![]) }
        async fn list_stale_pending_approvals(&self, _: WorkspaceId, _: DateTime<Utc>, _: i64) -> Result<Vec<ApprovalView>, StoreError> { Ok(vec![]) }
    }

    #[tokio::test]
    async fn bootstrap_owner_check_rejects_unprovisioned_workspace() {
        let scope = IdentityScope {
            workspace_id: WorkspaceId::new(),
            actor: Actor::new(ActorType::Agent, "agent-7"),
            correlation_id: CorrelationId::new(),
        };
        let projections: Arc<dyn ProjectionReader> = Arc::new(FakeProjections { workspace: None });
        assert!(scope.require_bootstrap_owner(&projections).await.is_err());
    }

    #[tokio::test]
    async fn bootstrap_owner_check_rejects_other_actors() {
        let workspace_id = WorkspaceId::new();
        let scope = IdentityScope {
            workspace_id,
            actor: Actor::new(ActorType::Agent, "agent-7"),
            correlation_id: CorrelationId::new(),
        };
        let projections: Arc<dyn ProjectionReader> = Arc::new(FakeProjections {
            workspace: Some(WorkspaceView { workspace_id, bootstrap_owner_actor_id: "owner-1".to_string(), created_at: Utc::now() }),
        });
        assert!(scope.require_bootstrap_owner(&projections).await.is_err());
    }

    #[tokio::test]
    async fn bootstrap_owner_check_accepts_provisioned_owner() {
        let workspace_id = WorkspaceId::new();
        let scope = IdentityScope {
            workspace_id,
            actor: Actor::new(ActorType::Agent, "owner-1"),
            correlation_id: CorrelationId::new(),
        };
        let projections: Arc<dyn ProjectionReader> = Arc::new(FakeProjections {
            workspace: Some(WorkspaceView { workspace_id, bootstrap_owner_actor_id: "owner-1".to_string(), created_at: Utc::now() }),
        });
        assert!(scope.require_bootstrap_owner(&projections).await.is_ok());
    }
}
