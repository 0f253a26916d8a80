//! Capability tokens: scoped grants an actor presents to the policy
//! pipeline so it can authorize an action without re-deriving trust
//! from scratch on every call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctrlplane_domain::ids::WorkspaceId;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct CapabilityToken {
    pub token_id: Uuid,
    pub workspace_id: WorkspaceId,
    pub actor_id: String,
    pub scopes: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl CapabilityToken {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }

    pub fn grants(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope || s == "*")
    }
}

#[async_trait]
pub trait CapabilityTokenRepository: Send + Sync {
    async fn insert(&self, token: &CapabilityToken) -> Result<(), StoreError>;
    async fn find_live(&self, workspace: WorkspaceId, actor_id: &str) -> Result<Vec<CapabilityToken>, StoreError>;
    async fn revoke(&self, workspace: WorkspaceId, token_id: Uuid) -> Result<(), StoreError>;
}

#[cfg(feature = "postgres")]
pub use pg::PgCapabilityTokenRepository;

#[cfg(feature = "postgres")]
mod pg {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PgCapabilityTokenRepository {
        pool: PgPool,
    }

    impl PgCapabilityTokenRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    fn row_to_token(row: &sqlx::postgres::PgRow) -> Result<CapabilityToken, StoreError> {
        let scopes_json: serde_json::Value = row.try_get("scopes")?;
        let scopes = scopes_json
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        Ok(CapabilityToken {
            token_id: row.try_get("token_id")?,
            workspace_id: WorkspaceId(row.try_get("workspace_id")?),
            actor_id: row.try_get("actor_id")?,
            scopes,
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
            revoked_at: row.try_get("revoked_at")?,
        })
    }

    #[async_trait]
    impl CapabilityTokenRepository for PgCapabilityTokenRepository {
        async fn insert(&self, token: &CapabilityToken) -> Result<(), StoreError> {
            sqlx::query(
                r#"
                INSERT INTO capability_tokens (
                    token_id, workspace_id, actor_id, scopes, issued_at, expires_at, revoked_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(token.token_id)
            .bind(token.workspace_id.0)
            .bind(&token.actor_id)
            .bind(serde_json::json!(token.scopes))
            .bind(token.issued_at)
            .bind(token.expires_at)
            .bind(token.revoked_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_insert_error(e, "capability_token", token.token_id.to_string()))?;
            Ok(())
        }

        async fn find_live(&self, workspace: WorkspaceId, actor_id: &str) -> Result<Vec<CapabilityToken>, StoreError> {
            let rows = sqlx::query(
                r#"
                SELECT * FROM capability_tokens
                WHERE workspace_id = $1 AND actor_id = $2 AND revoked_at IS NULL AND expires_at > now()
                "#,
            )
            .bind(workspace.0)
            .bind(actor_id)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(row_to_token).collect()
        }

        async fn revoke(&self, workspace: WorkspaceId, token_id: Uuid) -> Result<(), StoreError> {
            sqlx::query(
                "UPDATE capability_tokens SET revoked_at = now() WHERE workspace_id = $1 AND token_id = $2",
            )
            .bind(workspace.0)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(scopes: Vec<&str>, expires_at: DateTime<Utc>, revoked: bool) -> CapabilityToken {
        CapabilityToken {
            token_id: Uuid::now_v7(),
            workspace_id: WorkspaceId::new(),
            actor_id: "agent:1".to_string(),
            scopes: scopes.into_iter().map(String::from).collect(),
            issued_at: Utc::now(),
            expires_at,
            revoked_at: if revoked { Some(Utc::now()) } else { None },
        }
    }

    #[test]
    fn expired_token_is_not_live() {
        let t = token(vec!["egress:http"], Utc::now() - chrono::Duration::seconds(1), false);
        assert!(!t.is_live(Utc::now()));
    }

    #[test]
    fn revoked_token_is_not_live_even_before_expiry() {
        let t = token(vec!["egress:http"], Utc::now() + chrono::Duration::hours(1), true);
        assert!(!t.is_live(Utc::now()));
    }

    #[test]
    fn wildcard_scope_grants_anything() {
        let t = token(vec!["*"], Utc::now() + chrono::Duration::hours(1), false);
        assert!(t.grants("egress:http"));
        assert!(t.grants("anything"));
    }
}
