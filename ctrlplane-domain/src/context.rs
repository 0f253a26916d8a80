//! Request-scoped context for every inbound call.
//!
//! Carries `workspace_id`, the resolved `actor`, and `correlation_id`
//! explicitly through handler → policy → lease → store, the way
//! `IdentityScope` used to carry tenant/user/profile for credential
//! resolution. Never read from a global or task-local: every store and
//! pipeline method takes this (or its workspace id) as an argument.

use serde::{Deserialize, Serialize};

use crate::event::Actor;
use crate::ids::{CorrelationId, WorkspaceId};

/// The identity and tenancy a single request is bound to.
///
/// Resolved once by the auth/workspace gate before any handler body
/// runs (see `ctrlplaned::auth`), then threaded explicitly end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub workspace_id: WorkspaceId,
    pub actor: Actor,
    pub correlation_id: CorrelationId,
}

impl RequestContext {
    pub fn new(workspace_id: WorkspaceId, actor: Actor, correlation_id: CorrelationId) -> Self {
        Self {
            workspace_id,
            actor,
            correlation_id,
        }
    }

    /// A context with a freshly minted correlation id, for flows that
    /// don't propagate one from the caller (e.g. internal cron ticks).
    pub fn new_uncorrelated(workspace_id: WorkspaceId, actor: Actor) -> Self {
        Self::new(workspace_id, actor, CorrelationId::new())
    }
}

impl std::fmt::Display for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "workspace={}/actor={}/correlation={}",
            self.workspace_id, self.actor, self.correlation_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ActorType;

    #[test]
    fn display_includes_all_three_fields() {
        let ctx = RequestContext::new_uncorrelated(
            WorkspaceId::new(),
            Actor::new(ActorType::Agent, "agent_1"),
        );
        let rendered = format!("{}", ctx);
        assert!(rendered.contains("workspace="));
        assert!(rendered.contains("actor="));
        assert!(rendered.contains("correlation="));
    }
}
