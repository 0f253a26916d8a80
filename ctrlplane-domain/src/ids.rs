//! Newtype identifiers shared across the write path.
//!
//! `WorkspaceId` is the tenant boundary: every store method takes one as
//! its first argument so filtering by tenant can't be forgotten at a call
//! site. `CorrelationId` is opaque and propagated end to end; it defaults
//! to the request id when the caller doesn't supply one.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Tenant boundary. Every entity and event is scoped to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub Uuid);

impl WorkspaceId {
    /// Mint a fresh, time-ordered workspace id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WorkspaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WorkspaceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Opaque identifier propagated across every event of a logical flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Mint a fresh correlation id (used when a request arrives without one).
    pub fn new() -> Self {
        Self(format!("corr_{}", Uuid::now_v7()))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_id_roundtrips_through_json() {
        let id = WorkspaceId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: WorkspaceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn correlation_id_defaults_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }
}
