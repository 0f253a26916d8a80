//! Event shapes: the draft a caller builds, the stream it targets, and
//! the per-event-type payload enum known consumers deserialize into.
//!
//! A tagged enum (`#[serde(tag = "type")]`), one variant per handled
//! type; unknown types pass through as raw JSON at the store layer
//! rather than failing to deserialize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{CorrelationId, WorkspaceId};

/// The kind of actor that caused an event: a human operator, an
/// autonomous agent, or the system itself (cron, automation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Human,
    Agent,
    System,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::Human => write!(f, "human"),
            ActorType::Agent => write!(f, "agent"),
            ActorType::System => write!(f, "system"),
        }
    }
}

/// Who did it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub actor_type: ActorType,
    pub actor_id: String,
}

impl Actor {
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
        }
    }

    pub fn system() -> Self {
        Self::new(ActorType::System, "system")
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.actor_type, self.actor_id)
    }
}

/// The unit of sequencing and hashing: `(stream_type, stream_id)`.
///
/// Each pair owns its own independent hash chain — a `workspace` stream
/// is one more chain among many, not a parent of entity streams in the
/// same workspace (see SPEC_FULL.md §9 Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Workspace,
    Room,
    Run,
    Thread,
    Agent,
    Incident,
    Experiment,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamType::Workspace => "workspace",
            StreamType::Room => "room",
            StreamType::Run => "run",
            StreamType::Thread => "thread",
            StreamType::Agent => "agent",
            StreamType::Incident => "incident",
            StreamType::Experiment => "experiment",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for StreamType {
    type Err = crate::error::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workspace" => Ok(StreamType::Workspace),
            "room" => Ok(StreamType::Room),
            "run" => Ok(StreamType::Run),
            "thread" => Ok(StreamType::Thread),
            "agent" => Ok(StreamType::Agent),
            "incident" => Ok(StreamType::Incident),
            "experiment" => Ok(StreamType::Experiment),
            other => Err(crate::error::DomainError::UnknownStreamType(other.to_string())),
        }
    }
}

/// Reference to a stream: the sequencing/hashing unit an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamRef {
    pub stream_type: StreamType,
    pub stream_id: String,
}

impl StreamRef {
    pub fn new(stream_type: StreamType, stream_id: impl Into<String>) -> Self {
        Self {
            stream_type,
            stream_id: stream_id.into(),
        }
    }
}

/// An event not yet appended: everything the caller supplies. The store
/// fills in `stream_seq`, `prev_event_hash`, `event_hash`, and
/// `recorded_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDraft {
    pub event_type: String,
    pub event_version: i32,
    pub occurred_at: DateTime<Utc>,
    pub workspace_id: WorkspaceId,
    pub actor: Actor,
    pub stream: StreamRef,
    pub correlation_id: CorrelationId,
    pub causation_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub contains_secrets: bool,
}

impl EventDraft {
    /// Build a draft for a known `EventKind`, serializing it to `data`
    /// and deriving `event_type`/`entity_type`/`entity_id` from it.
    #[allow(clippy::too_many_arguments)]
    pub fn from_kind(
        workspace_id: WorkspaceId,
        actor: Actor,
        stream: StreamRef,
        correlation_id: CorrelationId,
        causation_id: Option<Uuid>,
        idempotency_key: Option<String>,
        kind: &EventKind,
    ) -> Result<Self, crate::error::DomainError> {
        let data = serde_json::to_value(kind)
            .map_err(|e| crate::error::DomainError::Serialization(e.to_string()))?;
        Ok(Self {
            event_type: kind.event_type().to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            workspace_id,
            actor,
            stream,
            correlation_id,
            causation_id,
            idempotency_key,
            entity_type: kind.entity_type().to_string(),
            entity_id: kind.entity_id(),
            data,
            contains_secrets: false,
        })
    }
}

/// Tagged payload for every event type the projection engine and
/// automation loop know how to handle. Unknown types never reach this
/// enum — the store keeps `data` as opaque JSON and handlers that don't
/// recognize `event_type` pass the raw bytes through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RoomCreated { room_id: String, name: String },
    ThreadCreated { thread_id: String, room_id: String, title: String },
    MessageCreated { message_id: String, thread_id: String, intent: Option<String>, body: String },

    RunQueued { run_id: String, agent_id: String },
    RunStarted { run_id: String },
    RunStepRecorded { run_id: String, step_id: String, summary: String },
    RunSucceeded { run_id: String },
    RunFailed { run_id: String, reason: String },

    LeaseClaimed { work_item_type: String, work_item_id: String, lease_id: Uuid, agent_id: String },
    LeasePreempted { work_item_type: String, work_item_id: String, old_lease_id: Uuid, new_lease_id: Uuid },
    LeaseReleased { work_item_type: String, work_item_id: String, lease_id: Uuid },

    ApprovalRequested { approval_id: String, entity_type: String, entity_id: String },
    ApprovalDecided { approval_id: String, approved: bool, decided_by: String },

    IncidentOpened { incident_id: String, category: String, summary: String },
    IncidentRcaRecorded { incident_id: String, rca: String },
    IncidentLearningRecorded { incident_id: String, learning: String },
    IncidentClosed { incident_id: String },

    PolicyAllowed { action: String, reason_code: String },
    PolicyDenied { action: String, reason_code: String },
    PolicyRequireApproval { action: String, reason_code: String, approval_id: String },

    EgressBlocked { request_id: String, target: String, reason_code: String },
    DataAccessJustified { request_id: String, resource: String },
    DataAccessUnjustified { request_id: String, resource: String },
    DataAccessPurposeHintMismatch { request_id: String, resource: String },

    MistakeRepeated { reason_code: String, pattern: String, count: i64 },
    ConstraintLearned { reason_code: String, pattern: String },

    CapabilityGranted { token_id: String, subject: String },
    CapabilityRevoked { token_id: String },

    ScorecardRecorded { scorecard_id: String, run_id: String, risk_tier: String, passed: bool },
    AgentLifecycleTransitioned { agent_id: String, from_state: String, to_state: String },

    WorkspaceCreated { workspace_id: String, bootstrap_owner_actor_id: String },

    ExperimentOpened { experiment_id: String, hypothesis: String },
    ExperimentClosed { experiment_id: String, outcome: String },

    ToolCallRecorded { tool_call_id: String, run_id: String, tool_name: String, status: String },

    EvidenceManifestRecorded { manifest_id: String, run_id: String, digest: String },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::RoomCreated { .. } => "room.created",
            EventKind::ThreadCreated { .. } => "thread.created",
            EventKind::MessageCreated { .. } => "message.created",
            EventKind::RunQueued { .. } => "run.queued",
            EventKind::RunStarted { .. } => "run.started",
            EventKind::RunStepRecorded { .. } => "run.step_recorded",
            EventKind::RunSucceeded { .. } => "run.succeeded",
            EventKind::RunFailed { .. } => "run.failed",
            EventKind::LeaseClaimed { .. } => "lease.claimed",
            EventKind::LeasePreempted { .. } => "lease.preempted",
            EventKind::LeaseReleased { .. } => "lease.released",
            EventKind::ApprovalRequested { .. } => "approval.requested",
            EventKind::ApprovalDecided { .. } => "approval.decided",
            EventKind::IncidentOpened { .. } => "incident.opened",
            EventKind::IncidentRcaRecorded { .. } => "incident.rca_recorded",
            EventKind::IncidentLearningRecorded { .. } => "incident.learning_recorded",
            EventKind::IncidentClosed { .. } => "incident.closed",
            EventKind::PolicyAllowed { .. } => "policy.allowed",
            EventKind::PolicyDenied { .. } => "policy.denied",
            EventKind::PolicyRequireApproval { .. } => "policy.require_approval",
            EventKind::EgressBlocked { .. } => "egress.blocked",
            EventKind::DataAccessJustified { .. } => "data.access.justified",
            EventKind::DataAccessUnjustified { .. } => "data.access.unjustified",
            EventKind::DataAccessPurposeHintMismatch { .. } => "data.access.purpose_hint_mismatch",
            EventKind::MistakeRepeated { .. } => "mistake.repeated",
            EventKind::ConstraintLearned { .. } => "constraint.learned",
            EventKind::CapabilityGranted { .. } => "capability.granted",
            EventKind::CapabilityRevoked { .. } => "capability.revoked",
            EventKind::ScorecardRecorded { .. } => "scorecard.recorded",
            EventKind::AgentLifecycleTransitioned { .. } => "agent.lifecycle_transitioned",
            EventKind::WorkspaceCreated { .. } => "workspace.created",
            EventKind::ExperimentOpened { .. } => "experiment.opened",
            EventKind::ExperimentClosed { .. } => "experiment.closed",
            EventKind::ToolCallRecorded { .. } => "tool_call.recorded",
            EventKind::EvidenceManifestRecorded { .. } => "evidence_manifest.recorded",
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self {
            EventKind::RoomCreated { .. } => "room",
            EventKind::ThreadCreated { .. } => "thread",
            EventKind::MessageCreated { .. } => "message",
            EventKind::RunQueued { .. }
            | EventKind::RunStarted { .. }
            | EventKind::RunStepRecorded { .. }
            | EventKind::RunSucceeded { .. }
            | EventKind::RunFailed { .. } => "run",
            EventKind::LeaseClaimed { .. }
            | EventKind::LeasePreempted { .. }
            | EventKind::LeaseReleased { .. } => "lease",
            EventKind::ApprovalRequested { .. } | EventKind::ApprovalDecided { .. } => "approval",
            EventKind::IncidentOpened { .. }
            | EventKind::IncidentRcaRecorded { .. }
            | EventKind::IncidentLearningRecorded { .. }
            | EventKind::IncidentClosed { .. } => "incident",
            EventKind::PolicyAllowed { .. }
            | EventKind::PolicyDenied { .. }
            | EventKind::PolicyRequireApproval { .. } => "policy_decision",
            EventKind::EgressBlocked { .. } => "egress_request",
            EventKind::DataAccessJustified { .. }
            | EventKind::DataAccessUnjustified { .. }
            | EventKind::DataAccessPurposeHintMismatch { .. } => "data_access_request",
            EventKind::MistakeRepeated { .. } | EventKind::ConstraintLearned { .. } => "policy_pattern",
            EventKind::CapabilityGranted { .. } | EventKind::CapabilityRevoked { .. } => "capability_token",
            EventKind::ScorecardRecorded { .. } => "scorecard",
            EventKind::AgentLifecycleTransitioned { .. } => "agent",
            EventKind::WorkspaceCreated { .. } => "workspace",
            EventKind::ExperimentOpened { .. } | EventKind::ExperimentClosed { .. } => "experiment",
            EventKind::ToolCallRecorded { .. } => "tool_call",
            EventKind::EvidenceManifestRecorded { .. } => "evidence_manifest",
        }
    }

    pub fn entity_id(&self) -> String {
        match self {
            EventKind::RoomCreated { room_id, .. } => room_id.clone(),
            EventKind::ThreadCreated { thread_id, .. } => thread_id.clone(),
            EventKind::MessageCreated { message_id, .. } => message_id.clone(),
            EventKind::RunQueued { run_id, .. }
            | EventKind::RunStarted { run_id }
            | EventKind::RunSucceeded { run_id }
            | EventKind::RunFailed { run_id, .. } => run_id.clone(),
            EventKind::RunStepRecorded { run_id, .. } => run_id.clone(),
            EventKind::LeaseClaimed { work_item_id, .. }
            | EventKind::LeasePreempted { work_item_id, .. }
            | EventKind::LeaseReleased { work_item_id, .. } => work_item_id.clone(),
            EventKind::ApprovalRequested { approval_id, .. }
            | EventKind::ApprovalDecided { approval_id, .. } => approval_id.clone(),
            EventKind::IncidentOpened { incident_id, .. }
            | EventKind::IncidentRcaRecorded { incident_id, .. }
            | EventKind::IncidentLearningRecorded { incident_id, .. }
            | EventKind::IncidentClosed { incident_id } => incident_id.clone(),
            EventKind::PolicyAllowed { action, .. }
            | EventKind::PolicyDenied { action, .. }
            | EventKind::PolicyRequireApproval { action, .. } => action.clone(),
            EventKind::EgressBlocked { request_id, .. } => request_id.clone(),
            EventKind::DataAccessJustified { request_id, .. }
            | EventKind::DataAccessUnjustified { request_id, .. }
            | EventKind::DataAccessPurposeHintMismatch { request_id, .. } => request_id.clone(),
            EventKind::MistakeRepeated { reason_code, .. }
            | EventKind::ConstraintLearned { reason_code, .. } => reason_code.clone(),
            EventKind::CapabilityGranted { token_id, .. }
            | EventKind::CapabilityRevoked { token_id } => token_id.clone(),
            EventKind::ScorecardRecorded { scorecard_id, .. } => scorecard_id.clone(),
            EventKind::AgentLifecycleTransitioned { agent_id, .. } => agent_id.clone(),
            EventKind::WorkspaceCreated { workspace_id, .. } => workspace_id.clone(),
            EventKind::ExperimentOpened { experiment_id, .. }
            | EventKind::ExperimentClosed { experiment_id, .. } => experiment_id.clone(),
            EventKind::ToolCallRecorded { tool_call_id, .. } => tool_call_id.clone(),
            EventKind::EvidenceManifestRecorded { manifest_id, .. } => manifest_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_serializes_with_type_tag() {
        let kind = EventKind::RoomCreated {
            room_id: "room_1".into(),
            name: "general".into(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "room_created");
        assert_eq!(kind.event_type(), "room.created");
        assert_eq!(kind.entity_type(), "room");
        assert_eq!(kind.entity_id(), "room_1");
    }

    #[test]
    fn stream_type_roundtrips_through_display_and_from_str() {
        for st in [
            StreamType::Workspace,
            StreamType::Room,
            StreamType::Run,
            StreamType::Thread,
            StreamType::Agent,
            StreamType::Incident,
            StreamType::Experiment,
        ] {
            let s = st.to_string();
            let parsed: StreamType = s.parse().unwrap();
            assert_eq!(st, parsed);
        }
    }

    #[test]
    fn unknown_stream_type_is_rejected() {
        let result: Result<StreamType, _> = "bogus".parse();
        assert!(result.is_err());
    }
}
