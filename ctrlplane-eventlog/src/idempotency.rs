//! Idempotency key parsing and canonicalization.
//!
//! Keys are caller-chosen, not derived by hashing the payload: format is
//! `scope:{verb}:{workspace}:{entity_type}:{entity_id}[:{discriminator}]`.
//! The store's uniqueness constraint on `(workspace_id, idempotency_key)`
//! is what actually enforces at-most-once append; this module only
//! validates shape and builds keys for call sites that derive them
//! (lease claim/preempt, outbox re-entry, poison-message incidents).

use ctrlplane_domain::ids::WorkspaceId;

/// A parsed idempotency key, useful for logging/debugging without
/// re-splitting the string everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey {
    pub scope: String,
    pub verb: String,
    pub workspace: String,
    pub entity_type: String,
    pub entity_id: String,
    pub discriminator: Option<String>,
}

impl IdempotencyKey {
    pub fn build(
        scope: &str,
        verb: &str,
        workspace: WorkspaceId,
        entity_type: &str,
        entity_id: &str,
        discriminator: Option<&str>,
    ) -> String {
        match discriminator {
            Some(d) => format!("{scope}:{verb}:{workspace}:{entity_type}:{entity_id}:{d}"),
            None => format!("{scope}:{verb}:{workspace}:{entity_type}:{entity_id}"),
        }
    }

    /// Parse a key into its parts. Returns `None` for malformed input;
    /// callers that only need validation can use `is_valid`.
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.splitn(6, ':');
        let scope = parts.next()?.to_string();
        let verb = parts.next()?.to_string();
        let workspace = parts.next()?.to_string();
        let entity_type = parts.next()?.to_string();
        let entity_id = parts.next()?.to_string();
        let discriminator = parts.next().map(|s| s.to_string());
        if scope.is_empty() || verb.is_empty() || workspace.is_empty() || entity_type.is_empty() || entity_id.is_empty() {
            return None;
        }
        Some(Self {
            scope,
            verb,
            workspace,
            entity_type,
            entity_id,
            discriminator,
        })
    }
}

/// Canonicalize (validate + pass through unchanged) a caller-supplied
/// idempotency key. Returns `None` if it doesn't match the required
/// `scope:verb:workspace:entity_type:entity_id[:discriminator]` shape.
pub fn canonicalize_idempotency_key(key: &str) -> Option<String> {
    IdempotencyKey::parse(key).map(|_| key.to_string())
}

/// Idempotency key for a lease claim: `claim:{ws}:{type}:{id}:{lease_id}`.
pub fn claim_key(workspace: WorkspaceId, work_item_type: &str, work_item_id: &str, lease_id: uuid::Uuid) -> String {
    format!("claim:{workspace}:{work_item_type}:{work_item_id}:{lease_id}")
}

/// Idempotency key for a lease preempt:
/// `preempt:{ws}:{type}:{id}:{old_lease}:{new_lease}`.
pub fn preempt_key(
    workspace: WorkspaceId,
    work_item_type: &str,
    work_item_id: &str,
    old_lease_id: uuid::Uuid,
    new_lease_id: uuid::Uuid,
) -> String {
    format!("preempt:{workspace}:{work_item_type}:{work_item_id}:{old_lease_id}:{new_lease_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_five_mandatory_parts() {
        let parsed = IdempotencyKey::parse("scope:verb:ws_1:message:msg_1").unwrap();
        assert_eq!(parsed.scope, "scope");
        assert_eq!(parsed.verb, "verb");
        assert_eq!(parsed.workspace, "ws_1");
        assert_eq!(parsed.entity_type, "message");
        assert_eq!(parsed.entity_id, "msg_1");
        assert_eq!(parsed.discriminator, None);
    }

    #[test]
    fn parses_optional_discriminator() {
        let parsed = IdempotencyKey::parse("scope:verb:ws_1:message:msg_1:disc").unwrap();
        assert_eq!(parsed.discriminator.as_deref(), Some("disc"));
    }

    #[test]
    fn rejects_too_few_parts() {
        assert!(IdempotencyKey::parse("scope:verb:ws_1").is_none());
    }

    #[test]
    fn claim_key_is_stable_for_same_inputs() {
        let ws = WorkspaceId::new();
        let lease_id = uuid::Uuid::now_v7();
        assert_eq!(
            claim_key(ws, "incident", "inc_1", lease_id),
            claim_key(ws, "incident", "inc_1", lease_id)
        );
    }
}
