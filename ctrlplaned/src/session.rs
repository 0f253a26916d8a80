//! Session issuance for the bearer-token half of the auth gate (§4.9).
//! The store only ever sees a token's hash; the raw token is returned
//! to the caller exactly once, at issuance.

use chrono::{Duration, Utc};
use ctrlplane_domain::ids::WorkspaceId;
use ctrlplane_store::{Session, SessionRepository, StoreError};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const SESSION_LIFETIME_HOURS: i64 = 24;

pub fn hash_token(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)
}

/// Mints a fresh bearer token, stores its hash, and returns the raw
/// token to hand back to the caller. Never logged, never re-derivable
/// from the stored row.
pub async fn issue(
    sessions: &dyn SessionRepository,
    workspace_id: WorkspaceId,
    actor_id: &str,
) -> Result<String, StoreError> {
    let raw_token = format!("sess_{}", Uuid::now_v7());
    let now = Utc::now();
    let session = Session {
        session_id: Uuid::now_v7(),
        workspace_id,
        actor_id: actor_id.to_string(),
        token_hash: hash_token(&raw_token),
        created_at: now,
        expires_at: now + Duration::hours(SESSION_LIFETIME_HOURS),
    };
    sessions.insert(&session).await?;
    Ok(raw_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_token_is_deterministic_and_not_the_raw_token() {
        let h1 = hash_token("sess_abc");
        let h2 = hash_token("sess_abc");
        assert_eq!(h1, h2);
        assert_ne!(h1, "sess_abc");
    }
}
