//! Bearer sessions backing the workspace gate (§4.9). A session binds a
//! token hash to a workspace and an actor; the gate never sees the raw
//! token after issuance, only its hash.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctrlplane_domain::ids::WorkspaceId;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub workspace_id: WorkspaceId,
    pub actor_id: String,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<(), StoreError>;
    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError>;
    async fn delete(&self, session_id: Uuid) -> Result<(), StoreError>;
}

#[cfg(feature = "postgres")]
pub use pg::PgSessionRepository;

#[cfg(feature = "postgres")]
mod pg {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PgSessionRepository {
        pool: PgPool,
    }

    impl PgSessionRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl SessionRepository for PgSessionRepository {
        async fn insert(&self, session: &Session) -> Result<(), StoreError> {
            sqlx::query(
                r#"
                INSERT INTO sessions (session_id, workspace_id, actor_id, token_hash, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(session.session_id)
            .bind(session.workspace_id.0)
            .bind(&session.actor_id)
            .bind(&session.token_hash)
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_insert_error(e, "session", session.session_id.to_string()))?;
            Ok(())
        }

        async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError> {
            let row = sqlx::query("SELECT * FROM sessions WHERE token_hash = $1")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| {
                Ok(Session {
                    session_id: r.try_get("session_id")?,
                    workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                    actor_id: r.try_get("actor_id")?,
                    token_hash: r.try_get("token_hash")?,
                    created_at: r.try_get("created_at")?,
                    expires_at: r.try_get("expires_at")?,
                })
            })
            .transpose()
        }

        async fn delete(&self, session_id: Uuid) -> Result<(), StoreError> {
            sqlx::query("DELETE FROM sessions WHERE session_id = $1")
                .bind(session_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_session_is_not_live() {
        let s = Session {
            session_id: Uuid::now_v7(),
            workspace_id: WorkspaceId::new(),
            actor_id: "agent:1".to_string(),
            token_hash: "deadbeef".to_string(),
            created_at: Utc::now() - chrono::Duration::hours(2),
            expires_at: Utc::now() - chrono::Duration::hours(1),
        };
        assert!(!s.is_live(Utc::now()));
    }
}
