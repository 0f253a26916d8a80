//! HTTP surface (§6): axum router over the write path. Every mutating
//! route resolves an `IdentityScope` first, then runs
//! policy → lease → append inside one transaction, mirroring the
//! control-flow order this whole system is built around.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration as ChronoDuration;
use ctrlplane_domain::event::{EventDraft, EventKind, StreamRef, StreamType};
use ctrlplane_eventlog::query::{query_events, QueryOptions};
use ctrlplane_eventlog::{append, AppendedEvent, EventRow};
use ctrlplane_leases::coordinator as leases;
use ctrlplane_policy::{ActionKind, DataAccessMode, DecisionRequest, Outcome, ResourceLabel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{resolve_identity, IdentityScope};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/system/health", get(system_health_handler))
        .route("/v1/workspaces/bootstrap", post(bootstrap_workspace_handler))
        .route("/v1/rooms", post(create_room_handler))
        .route("/v1/rooms/:id/threads", post(create_thread_handler))
        .route("/v1/threads/:id/messages", post(create_message_handler))
        .route("/v1/runs", post(queue_run_handler))
        .route("/v1/runs/claim", post(claim_run_handler))
        .route("/v1/runs/:id/start", post(start_run_handler))
        .route("/v1/runs/:id/complete", post(complete_run_handler))
        .route("/v1/runs/:id/fail", post(fail_run_handler))
        .route("/v1/runs/:id/steps", post(record_run_step_handler))
        .route("/v1/runs/:id/lease/heartbeat", post(heartbeat_run_lease_handler))
        .route("/v1/runs/:id/lease/release", post(release_run_lease_handler))
        .route("/v1/work-items/claim", post(claim_work_item_handler))
        .route("/v1/work-items/heartbeat", post(heartbeat_work_item_handler))
        .route("/v1/work-items/release", post(release_work_item_handler))
        .route("/v1/approvals", post(create_approval_handler))
        .route("/v1/approvals/:id/decide", post(decide_approval_handler))
        .route("/v1/incidents", post(open_incident_handler))
        .route("/v1/incidents/:id/rca", post(record_incident_rca_handler))
        .route("/v1/incidents/:id/learning", post(record_incident_learning_handler))
        .route("/v1/incidents/:id/close", post(close_incident_handler))
        .route("/v1/experiments", post(open_experiment_handler))
        .route("/v1/experiments/:id/close", post(close_experiment_handler))
        .route("/v1/tool-calls", post(record_tool_call_handler))
        .route("/v1/evidence-manifests", post(record_evidence_manifest_handler))
        .route("/v1/policy/evaluate", post(policy_evaluate_handler))
        .route("/v1/egress/requests", post(egress_request_handler))
        .route("/v1/data/access/requests", post(data_access_request_handler))
        .route("/v1/capabilities/grant", post(grant_capability_handler))
        .route("/v1/capabilities/revoke", post(revoke_capability_handler))
        .route("/v1/events", get(list_events_handler))
        .route("/v1/events/:id", get(get_event_handler))
        .route("/v1/pipeline/projection", get(projection_watermark_handler))
        .route("/v1/streams/:stream_type/:stream_id", get(stream_fanout_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize, Default)]
struct IdempotencyQuery {
    idempotency_key: Option<String>,
}

/// Process-liveness check — no workspace binding, no DB round trip.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy", "version": env!("CARGO_PKG_VERSION") }))
}

async fn system_health_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let report = crate::daemon::health_report(&state, scope.workspace_id).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct CreateRoomRequest {
    room_id: String,
    name: String,
    idempotency_key: Option<String>,
}

async fn create_room_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateRoomRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::RoomCreated { room_id: req.room_id.clone(), name: req.name };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Room, req.room_id), req.idempotency_key, &kind).await?;
    Ok((StatusCode::CREATED, Json(appended.row)))
}

#[derive(Debug, Deserialize)]
struct CreateThreadRequest {
    thread_id: String,
    title: String,
    idempotency_key: Option<String>,
}

async fn create_thread_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
    Json(req): Json<CreateThreadRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::ThreadCreated { thread_id: req.thread_id.clone(), room_id, title: req.title };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Thread, req.thread_id), req.idempotency_key, &kind).await?;
    Ok((StatusCode::CREATED, Json(appended.row)))
}

#[derive(Debug, Deserialize)]
struct CreateMessageRequest {
    message_id: String,
    intent: Option<String>,
    body: String,
    idempotency_key: Option<String>,
}

async fn create_message_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
    Json(req): Json<CreateMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::MessageCreated {
        message_id: req.message_id.clone(),
        thread_id: thread_id.clone(),
        intent: req.intent,
        body: req.body,
    };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Thread, thread_id), req.idempotency_key, &kind).await?;
    Ok((StatusCode::CREATED, Json(appended.row)))
}

#[derive(Debug, Deserialize)]
struct QueueRunRequest {
    run_id: String,
    agent_id: String,
    idempotency_key: Option<String>,
}

async fn queue_run_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<QueueRunRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::RunQueued { run_id: req.run_id.clone(), agent_id: req.agent_id };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Run, req.run_id), req.idempotency_key, &kind).await?;
    Ok((StatusCode::CREATED, Json(appended.row)))
}

async fn start_run_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Query(q): Query<IdempotencyQuery>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::RunStarted { run_id: run_id.clone() };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Run, run_id), q.idempotency_key, &kind).await?;
    Ok(Json(appended.row))
}

async fn complete_run_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Query(q): Query<IdempotencyQuery>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::RunSucceeded { run_id: run_id.clone() };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Run, run_id), q.idempotency_key, &kind).await?;
    Ok(Json(appended.row))
}

#[derive(Debug, Deserialize)]
struct FailRunRequest {
    reason: String,
    idempotency_key: Option<String>,
}

async fn fail_run_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Json(req): Json<FailRunRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::RunFailed { run_id: run_id.clone(), reason: req.reason };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Run, run_id), req.idempotency_key, &kind).await?;
    Ok(Json(appended.row))
}

#[derive(Debug, Deserialize)]
struct RecordRunStepRequest {
    step_id: String,
    summary: String,
    idempotency_key: Option<String>,
}

async fn record_run_step_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Json(req): Json<RecordRunStepRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::RunStepRecorded { run_id: run_id.clone(), step_id: req.step_id, summary: req.summary };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Run, run_id), req.idempotency_key, &kind).await?;
    Ok((StatusCode::CREATED, Json(appended.row)))
}

#[derive(Debug, Deserialize)]
struct ClaimRunRequest {
    run_id: String,
    lease_duration_sec: i64,
}

async fn claim_run_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ClaimRunRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let claimed = leases::claim_run(
        &state.pool,
        scope.workspace_id,
        &req.run_id,
        &scope.actor,
        &scope.correlation_id,
        ChronoDuration::seconds(req.lease_duration_sec),
    )
    .await
    .map_err(ApiError::Lease)?;
    Ok(Json(ClaimResponse {
        lease_id: claimed.lease_id,
        version: claimed.version,
        expires_at: claimed.expires_at,
        replay: claimed.outcome == leases::ClaimOutcome::Replay,
    }))
}

async fn heartbeat_run_lease_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(_run_id): Path<String>,
    Json(req): Json<HeartbeatWorkItemRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let (version, expires_at) = leases::heartbeat(
        &state.pool,
        scope.workspace_id,
        req.lease_id,
        req.version,
        ChronoDuration::seconds(req.lease_duration_sec),
        ChronoDuration::seconds(state.heartbeat_min_interval_sec),
    )
    .await
    .map_err(ApiError::Lease)?;
    Ok(Json(ClaimResponse { lease_id: req.lease_id, version, expires_at, replay: false }))
}

async fn release_run_lease_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Json(req): Json<ReleaseRunLeaseRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let outcome = leases::release(&state.pool, scope.workspace_id, req.lease_id, &scope.actor, &scope.correlation_id, "run", &run_id)
        .await
        .map_err(ApiError::Lease)?;
    Ok(Json(ReleaseResponse { released: outcome.released }))
}

#[derive(Debug, Deserialize)]
struct ReleaseRunLeaseRequest {
    lease_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ClaimWorkItemRequest {
    work_item_type: String,
    work_item_id: String,
    lease_duration_sec: i64,
}

#[derive(Debug, Serialize)]
struct ClaimResponse {
    lease_id: Uuid,
    version: i64,
    expires_at: chrono::DateTime<chrono::Utc>,
    replay: bool,
}

async fn claim_work_item_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ClaimWorkItemRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let claimed = leases::claim(
        &state.pool,
        scope.workspace_id,
        &req.work_item_type,
        &req.work_item_id,
        &scope.actor,
        &scope.correlation_id,
        ChronoDuration::seconds(req.lease_duration_sec),
    )
    .await
    .map_err(ApiError::Lease)?;
    Ok(Json(ClaimResponse {
        lease_id: claimed.lease_id,
        version: claimed.version,
        expires_at: claimed.expires_at,
        replay: claimed.outcome == leases::ClaimOutcome::Replay,
    }))
}

#[derive(Debug, Deserialize)]
struct HeartbeatWorkItemRequest {
    lease_id: Uuid,
    version: i64,
    lease_duration_sec: i64,
}

async fn heartbeat_work_item_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<HeartbeatWorkItemRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let (version, expires_at) = leases::heartbeat(
        &state.pool,
        scope.workspace_id,
        req.lease_id,
        req.version,
        ChronoDuration::seconds(req.lease_duration_sec),
        ChronoDuration::seconds(state.heartbeat_min_interval_sec),
    )
    .await
    .map_err(ApiError::Lease)?;
    Ok(Json(ClaimResponse { lease_id: req.lease_id, version, expires_at, replay: false }))
}

#[derive(Debug, Deserialize)]
struct ReleaseWorkItemRequest {
    work_item_type: String,
    work_item_id: String,
    lease_id: Uuid,
}

#[derive(Debug, Serialize)]
struct ReleaseResponse {
    released: bool,
}

async fn release_work_item_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ReleaseWorkItemRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let outcome = leases::release(
        &state.pool,
        scope.workspace_id,
        req.lease_id,
        &scope.actor,
        &scope.correlation_id,
        &req.work_item_type,
        &req.work_item_id,
    )
    .await
    .map_err(ApiError::Lease)?;
    Ok(Json(ReleaseResponse { released: outcome.released }))
}

#[derive(Debug, Deserialize)]
struct CreateApprovalRequest {
    approval_id: String,
    entity_type: String,
    entity_id: String,
    idempotency_key: Option<String>,
}

async fn create_approval_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateApprovalRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::ApprovalRequested {
        approval_id: req.approval_id.clone(),
        entity_type: req.entity_type,
        entity_id: req.entity_id,
    };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Workspace, req.approval_id), req.idempotency_key, &kind).await?;
    Ok((StatusCode::CREATED, Json(appended.row)))
}

#[derive(Debug, Deserialize)]
struct DecideApprovalRequest {
    approved: bool,
}

async fn decide_approval_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(approval_id): Path<String>,
    Json(req): Json<DecideApprovalRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::ApprovalDecided {
        approval_id: approval_id.clone(),
        approved: req.approved,
        decided_by: scope.actor.actor_id.clone(),
    };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Workspace, approval_id), None, &kind).await?;
    Ok(Json(appended.row))
}

#[derive(Debug, Deserialize)]
struct PolicyEvaluateRequest {
    action: String,
    tool: Option<String>,
    target_host: Option<String>,
}

#[derive(Debug, Serialize)]
struct PolicyEvaluateResponse {
    outcome: &'static str,
    reason_code: &'static str,
    approval_id: Option<String>,
}

async fn policy_evaluate_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PolicyEvaluateRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let action = match req.action.as_str() {
        "tool_invocation" => ActionKind::ToolInvocation { tool: req.tool.unwrap_or_default() },
        "egress" => ActionKind::Egress { target_host: req.target_host.unwrap_or_default() },
        "external_write" => ActionKind::ExternalWrite,
        _ => ActionKind::InternalRead,
    };
    let decision = state
        .policy
        .decide(
            &DecisionRequest { workspace: scope.workspace_id, actor: scope.actor.clone(), action, room_id: None, capability_token_id: None },
            &scope.correlation_id,
        )
        .await
        .map_err(ApiError::Policy)?;
    Ok(Json(PolicyEvaluateResponse {
        outcome: match decision.outcome {
            Outcome::Allow => "allow",
            Outcome::Deny => "deny",
            Outcome::RequireApproval => "require_approval",
        },
        reason_code: decision.reason_code,
        approval_id: decision.approval_id,
    }))
}

#[derive(Debug, Deserialize)]
struct EgressRequest {
    target_host: String,
}

async fn egress_request_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<EgressRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let decision = state
        .policy
        .decide(
            &DecisionRequest {
                workspace: scope.workspace_id,
                actor: scope.actor.clone(),
                action: ActionKind::Egress { target_host: req.target_host },
                room_id: None,
                capability_token_id: None,
            },
            &scope.correlation_id,
        )
        .await
        .map_err(ApiError::Policy)?;
    Ok(Json(PolicyEvaluateResponse {
        outcome: match decision.outcome {
            Outcome::Allow => "allow",
            Outcome::Deny => "deny",
            Outcome::RequireApproval => "require_approval",
        },
        reason_code: decision.reason_code,
        approval_id: decision.approval_id,
    }))
}

#[derive(Debug, Deserialize)]
struct DataAccessRequest {
    resource: String,
    mode: String,
    label: Option<String>,
    resource_room_id: Option<String>,
    purpose_tag: Option<String>,
    required_purpose_tag: Option<String>,
    justification: Option<String>,
}

async fn data_access_request_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DataAccessRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let action = ActionKind::DataAccess {
        resource: req.resource,
        mode: match req.mode.as_str() {
            "write" => DataAccessMode::Write,
            _ => DataAccessMode::Read,
        },
        label: match req.label.as_deref() {
            Some("restricted") => Some(ResourceLabel::Restricted),
            Some("confidential") => Some(ResourceLabel::Confidential),
            _ => None,
        },
        resource_room_id: req.resource_room_id,
        purpose_tag: req.purpose_tag,
        required_purpose_tag: req.required_purpose_tag,
        justification: req.justification,
    };
    let decision = state
        .policy
        .decide(
            &DecisionRequest { workspace: scope.workspace_id, actor: scope.actor.clone(), action, room_id: None, capability_token_id: None },
            &scope.correlation_id,
        )
        .await
        .map_err(ApiError::Policy)?;
    Ok(Json(PolicyEvaluateResponse {
        outcome: match decision.outcome {
            Outcome::Allow => "allow",
            Outcome::Deny => "deny",
            Outcome::RequireApproval => "require_approval",
        },
        reason_code: decision.reason_code,
        approval_id: decision.approval_id,
    }))
}

#[derive(Debug, Deserialize)]
struct BootstrapWorkspaceRequest {
    idempotency_key: Option<String>,
}

/// Provisions the calling workspace's bootstrap owner, the identity the
/// capability-grant/revoke routes trust (§4.9). Idempotent: a workspace
/// that already has an owner rejects a second bootstrap rather than
/// reassigning it.
async fn bootstrap_workspace_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BootstrapWorkspaceRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    if state.projections.find_workspace(scope.workspace_id).await.map_err(ApiError::Store)?.is_some() {
        return Err(ApiError::BootstrapForbidden);
    }
    let kind = EventKind::WorkspaceCreated {
        workspace_id: scope.workspace_id.to_string(),
        bootstrap_owner_actor_id: scope.actor.actor_id.clone(),
    };
    let appended = emit(
        &state,
        &scope,
        StreamRef::new(StreamType::Workspace, scope.workspace_id.to_string()),
        req.idempotency_key,
        &kind,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(appended.row)))
}

#[derive(Debug, Deserialize)]
struct OpenIncidentRequest {
    incident_id: String,
    category: String,
    summary: String,
    idempotency_key: Option<String>,
}

async fn open_incident_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<OpenIncidentRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::IncidentOpened { incident_id: req.incident_id.clone(), category: req.category, summary: req.summary };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Incident, req.incident_id), req.idempotency_key, &kind).await?;
    Ok((StatusCode::CREATED, Json(appended.row)))
}

#[derive(Debug, Deserialize)]
struct RecordIncidentRcaRequest {
    rca: String,
    idempotency_key: Option<String>,
}

async fn record_incident_rca_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(incident_id): Path<String>,
    Json(req): Json<RecordIncidentRcaRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::IncidentRcaRecorded { incident_id: incident_id.clone(), rca: req.rca };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Incident, incident_id), req.idempotency_key, &kind).await?;
    Ok(Json(appended.row))
}

#[derive(Debug, Deserialize)]
struct RecordIncidentLearningRequest {
    learning: String,
    idempotency_key: Option<String>,
}

async fn record_incident_learning_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(incident_id): Path<String>,
    Json(req): Json<RecordIncidentLearningRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::IncidentLearningRecorded { incident_id: incident_id.clone(), learning: req.learning };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Incident, incident_id), req.idempotency_key, &kind).await?;
    Ok(Json(appended.row))
}

/// Closing an incident requires both an RCA and a learning to already
/// be on record — the automation loop's own gate (§4.6), enforced here
/// rather than trusted to the caller.
async fn close_incident_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(incident_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let incident = state
        .projections
        .find_incident(scope.workspace_id, &incident_id)
        .await
        .map_err(ApiError::Store)?
        .ok_or(ApiError::NotFound)?;
    if !incident.has_rca {
        return Err(ApiError::IncidentCloseBlockedMissingRca);
    }
    if !incident.has_learning {
        return Err(ApiError::IncidentCloseBlockedMissingLearning);
    }
    let kind = EventKind::IncidentClosed { incident_id: incident_id.clone() };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Incident, incident_id), None, &kind).await?;
    Ok(Json(appended.row))
}

#[derive(Debug, Deserialize)]
struct OpenExperimentRequest {
    experiment_id: String,
    hypothesis: String,
    idempotency_key: Option<String>,
}

async fn open_experiment_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<OpenExperimentRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::ExperimentOpened { experiment_id: req.experiment_id.clone(), hypothesis: req.hypothesis };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Experiment, req.experiment_id), req.idempotency_key, &kind).await?;
    Ok((StatusCode::CREATED, Json(appended.row)))
}

#[derive(Debug, Deserialize)]
struct CloseExperimentRequest {
    outcome: String,
}

/// Closing an experiment requires it to be open, with no live leased
/// work still claimed against it (§4.2/§4.3: the lease coordinator is
/// the only place work against an experiment is tracked).
async fn close_experiment_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(experiment_id): Path<String>,
    Json(req): Json<CloseExperimentRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let experiment = state
        .projections
        .find_experiment(scope.workspace_id, &experiment_id)
        .await
        .map_err(ApiError::Store)?
        .ok_or(ApiError::NotFound)?;
    if experiment.status != "open" {
        return Err(ApiError::ExperimentNotOpen);
    }
    let has_active_lease = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM work_item_leases WHERE workspace_id = $1 AND work_item_type = 'experiment' AND work_item_id = $2 AND status = 'active')",
    )
    .bind(scope.workspace_id.0)
    .bind(&experiment_id)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| ApiError::Internal(e.into()))?;
    if has_active_lease {
        return Err(ApiError::ExperimentHasActiveRuns);
    }
    let kind = EventKind::ExperimentClosed { experiment_id: experiment_id.clone(), outcome: req.outcome };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Experiment, experiment_id), None, &kind).await?;
    Ok(Json(appended.row))
}

#[derive(Debug, Deserialize)]
struct RecordToolCallRequest {
    tool_call_id: String,
    run_id: String,
    tool_name: String,
    status: String,
    idempotency_key: Option<String>,
}

async fn record_tool_call_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RecordToolCallRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::ToolCallRecorded {
        tool_call_id: req.tool_call_id.clone(),
        run_id: req.run_id.clone(),
        tool_name: req.tool_name,
        status: req.status,
    };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Run, req.run_id), req.idempotency_key, &kind).await?;
    Ok((StatusCode::CREATED, Json(appended.row)))
}

#[derive(Debug, Deserialize)]
struct RecordEvidenceManifestRequest {
    manifest_id: String,
    run_id: String,
    digest: String,
    idempotency_key: Option<String>,
}

async fn record_evidence_manifest_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RecordEvidenceManifestRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let kind = EventKind::EvidenceManifestRecorded { manifest_id: req.manifest_id.clone(), run_id: req.run_id.clone(), digest: req.digest };
    let appended = emit(&state, &scope, StreamRef::new(StreamType::Run, req.run_id), req.idempotency_key, &kind).await?;
    Ok((StatusCode::CREATED, Json(appended.row)))
}

#[derive(Debug, Deserialize)]
struct GrantCapabilityRequest {
    subject: String,
    scopes: Vec<String>,
    ttl_sec: i64,
}

async fn grant_capability_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<GrantCapabilityRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    scope.require_bootstrap_owner(&state.projections).await?;

    let now = chrono::Utc::now();
    let token = ctrlplane_store::CapabilityToken {
        token_id: Uuid::now_v7(),
        workspace_id: scope.workspace_id,
        actor_id: req.subject.clone(),
        scopes: req.scopes,
        issued_at: now,
        expires_at: now + ChronoDuration::seconds(req.ttl_sec),
        revoked_at: None,
    };
    state.tokens.insert(&token).await.map_err(ApiError::Store)?;

    let kind = EventKind::CapabilityGranted { token_id: token.token_id.to_string(), subject: req.subject };
    emit(&state, &scope, StreamRef::new(StreamType::Workspace, token.token_id.to_string()), None, &kind).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "token_id": token.token_id }))))
}

#[derive(Debug, Deserialize)]
struct RevokeCapabilityRequest {
    token_id: Uuid,
}

async fn revoke_capability_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RevokeCapabilityRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    scope.require_bootstrap_owner(&state.projections).await?;
    state.tokens.revoke(scope.workspace_id, req.token_id).await.map_err(ApiError::Store)?;
    let kind = EventKind::CapabilityRevoked { token_id: req.token_id.to_string() };
    emit(&state, &scope, StreamRef::new(StreamType::Workspace, req.token_id.to_string()), None, &kind).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    correlation_id: Option<String>,
    entity_type: Option<String>,
    entity_id: Option<String>,
    limit: Option<i64>,
}

async fn list_events_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<EventsQuery>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let mut opts = QueryOptions::new(scope.workspace_id).limit(q.limit.unwrap_or(100));
    if let Some(c) = q.correlation_id {
        opts = opts.correlation_id(c);
    }
    if let (Some(et), Some(eid)) = (q.entity_type, q.entity_id) {
        opts = opts.entity(et, eid);
    }
    let rows: Vec<EventRow> = query_events(&state.pool, &opts).await.map_err(ApiError::EventLog)?;
    Ok(Json(rows))
}

async fn get_event_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(event_id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let row = sqlx::query_as::<_, EventRow>("SELECT * FROM evt_events WHERE workspace_id = $1 AND event_id = $2")
        .bind(scope.workspace_id.0)
        .bind(event_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
struct ProjectionWatermarkQuery {
    projector_name: String,
}

async fn projection_watermark_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ProjectionWatermarkQuery>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let watermark = state
        .projections
        .get_watermark(scope.workspace_id, &q.projector_name)
        .await
        .map_err(ApiError::Store)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(watermark))
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    from_seq: Option<i64>,
}

async fn stream_fanout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((stream_type, stream_id)): Path<(String, String)>,
    Query(q): Query<StreamQuery>,
) -> ApiResult<impl IntoResponse> {
    let scope = resolve_identity(&state.sessions, &headers).await?;
    let stream_type: StreamType = stream_type.parse().map_err(ApiError::Domain)?;
    Ok(crate::sse::fanout(state.pool.clone(), scope.workspace_id, stream_type, stream_id, q.from_seq.unwrap_or(0)))
}

/// Appends one event under the caller's resolved identity, inside its
/// own short transaction, then projects it synchronously before commit.
async fn emit(
    state: &AppState,
    scope: &IdentityScope,
    stream: StreamRef,
    idempotency_key: Option<String>,
    kind: &EventKind,
) -> ApiResult<AppendedEvent> {
    let draft = EventDraft::from_kind(scope.workspace_id, scope.actor.clone(), stream, scope.correlation_id.clone(), None, idempotency_key, kind)
        .map_err(ApiError::Domain)?;
    let mut tx = state.pool.begin().await.map_err(|e| ApiError::Internal(e.into()))?;
    let appended = append(&mut tx, scope.workspace_id, draft).await.map_err(ApiError::EventLog)?;
    ctrlplane_projector::apply_event(&mut tx, &appended.row).await.map_err(ApiError::Projection)?;
    tx.commit().await.map_err(|e| ApiError::Internal(e.into()))?;
    Ok(appended)
}
