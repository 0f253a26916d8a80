//! The decision request shape and its possible outcomes (§4.4).

use ctrlplane_domain::event::Actor;
use ctrlplane_domain::ids::WorkspaceId;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum DataAccessMode {
    Read,
    Write,
}

/// What kind of resource label, if any, gates this action. Mirrors the
/// DAC label vocabulary named in §4.4: `restricted` scopes a resource to
/// its own room, `confidential` requires a matching purpose tag (or an
/// explicit justification) to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceLabel {
    Restricted,
    Confidential,
}

#[derive(Debug, Clone)]
pub enum ActionKind {
    ToolInvocation { tool: String },
    Egress { target_host: String },
    DataAccess {
        resource: String,
        mode: DataAccessMode,
        label: Option<ResourceLabel>,
        resource_room_id: Option<String>,
        purpose_tag: Option<String>,
        required_purpose_tag: Option<String>,
        justification: Option<String>,
    },
    ExternalWrite,
    InternalRead,
}

impl ActionKind {
    pub fn is_external_write(&self) -> bool {
        matches!(self, ActionKind::ExternalWrite)
    }

    fn kill_switch_name(&self) -> &'static str {
        match self {
            ActionKind::ToolInvocation { .. } => "KILL_SWITCH_TOOL_INVOCATION",
            ActionKind::Egress { .. } => "KILL_SWITCH_EGRESS",
            ActionKind::DataAccess { .. } => "KILL_SWITCH_DATA_ACCESS",
            ActionKind::ExternalWrite => "KILL_SWITCH_EXTERNAL_WRITE",
            ActionKind::InternalRead => "KILL_SWITCH_INTERNAL_READ",
        }
    }
}

impl ActionKind {
    pub fn env_kill_switch_name(&self) -> &'static str {
        self.kill_switch_name()
    }
}

#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub workspace: WorkspaceId,
    pub actor: Actor,
    pub action: ActionKind,
    pub room_id: Option<String>,
    pub capability_token_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Allow,
    Deny,
    RequireApproval,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub outcome: Outcome,
    pub reason_code: &'static str,
    pub approval_id: Option<String>,
}

impl Decision {
    pub fn allow(reason_code: &'static str) -> Self {
        Self { outcome: Outcome::Allow, reason_code, approval_id: None }
    }

    pub fn deny(reason_code: &'static str) -> Self {
        Self { outcome: Outcome::Deny, reason_code, approval_id: None }
    }

    pub fn require_approval(reason_code: &'static str, approval_id: String) -> Self {
        Self { outcome: Outcome::RequireApproval, reason_code, approval_id: Some(approval_id) }
    }
}
