//! API error types and the single conversion site at the HTTP edge
//! (§7): every domain error maps to `(StatusCode, reason_code, reason,
//! details)`; infrastructure failures collapse into `Internal` and
//! never leak their message to the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ctrlplane_domain::error::DomainError;
use ctrlplane_eventlog::EventLogError;
use ctrlplane_leases::LeaseError;
use ctrlplane_policy::PolicyError;
use ctrlplane_projector::ProjectionError;
use ctrlplane_store::StoreError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing workspace header")]
    MissingWorkspaceHeader,
    #[error("unauthorized workspace")]
    UnauthorizedWorkspace,
    #[error("bootstrap forbidden")]
    BootstrapForbidden,
    #[error("unsupported schema version")]
    UnsupportedVersion,
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),
    #[error("not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("incident cannot close without a recorded RCA")]
    IncidentCloseBlockedMissingRca,
    #[error("incident cannot close without a recorded learning")]
    IncidentCloseBlockedMissingLearning,
    #[error("experiment is not open")]
    ExperimentNotOpen,
    #[error("experiment has active leased work")]
    ExperimentHasActiveRuns,

    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: bool,
    reason_code: &'static str,
    reason: String,
    details: serde_json::Value,
}

impl ApiError {
    fn reason_code(&self) -> &'static str {
        match self {
            ApiError::MissingWorkspaceHeader => "missing_workspace_header",
            ApiError::UnauthorizedWorkspace => "unauthorized_workspace",
            ApiError::BootstrapForbidden => "bootstrap_forbidden",
            ApiError::UnsupportedVersion => "unsupported_version",
            ApiError::MissingRequiredField(_) => "missing_required_field",
            ApiError::NotFound => "not_found",
            ApiError::RateLimited => "rate_limited",
            ApiError::IncidentCloseBlockedMissingRca => "incident_close_blocked_missing_rca",
            ApiError::IncidentCloseBlockedMissingLearning => "incident_close_blocked_missing_learning",
            ApiError::ExperimentNotOpen => "experiment_not_open",
            ApiError::ExperimentHasActiveRuns => "experiment_has_active_runs",
            ApiError::EventLog(e) => e.reason_code(),
            ApiError::Lease(e) => e.reason_code(),
            ApiError::Policy(ctrlplane_policy::PolicyError::RateLimited { .. }) => "rate_limited",
            ApiError::Policy(_) => "internal",
            ApiError::Domain(_) => "missing_required_field",
            ApiError::Projection(_) | ApiError::Store(_) | ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingWorkspaceHeader => StatusCode::UNAUTHORIZED,
            ApiError::UnauthorizedWorkspace => StatusCode::FORBIDDEN,
            ApiError::BootstrapForbidden => StatusCode::FORBIDDEN,
            ApiError::UnsupportedVersion => StatusCode::BAD_REQUEST,
            ApiError::MissingRequiredField(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::IncidentCloseBlockedMissingRca => StatusCode::CONFLICT,
            ApiError::IncidentCloseBlockedMissingLearning => StatusCode::CONFLICT,
            ApiError::ExperimentNotOpen => StatusCode::CONFLICT,
            ApiError::ExperimentHasActiveRuns => StatusCode::CONFLICT,
            ApiError::EventLog(EventLogError::UnauthorizedWorkspace) => StatusCode::FORBIDDEN,
            ApiError::EventLog(EventLogError::IdempotencyConflictUnresolved) => StatusCode::CONFLICT,
            ApiError::EventLog(EventLogError::StreamSeqConflict { .. }) => StatusCode::CONFLICT,
            ApiError::EventLog(EventLogError::LockContention { .. }) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::EventLog(EventLogError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Lease(LeaseError::AlreadyClaimed)
            | ApiError::Lease(LeaseError::CorrelationIdMismatch)
            | ApiError::Lease(LeaseError::VersionMismatch { .. }) => StatusCode::CONFLICT,
            ApiError::Lease(LeaseError::HeartbeatRateLimited) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Lease(LeaseError::DisallowedWorkItemType(_)) => StatusCode::BAD_REQUEST,
            ApiError::Lease(LeaseError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Policy(ctrlplane_policy::PolicyError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Domain(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "internal error serving request");
        }
        let body = ErrorBody {
            error: true,
            reason_code: self.reason_code(),
            reason: if status == StatusCode::INTERNAL_SERVER_ERROR {
                "internal error".to_string()
            } else {
                self.to_string()
            },
            details: serde_json::Value::Null,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
