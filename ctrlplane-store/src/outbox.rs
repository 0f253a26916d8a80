//! Outbox rows: transactional side-effect dispatch (§4.5). Entries are
//! written in the same transaction as the event they ride on; a
//! separate worker drains them with `SKIP LOCKED` so draining never
//! blocks the append path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctrlplane_domain::ids::WorkspaceId;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub outbox_id: Uuid,
    pub workspace_id: WorkspaceId,
    pub event_id: Uuid,
    pub event_type: String,
    pub idempotency_key: Option<String>,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Failed,
    DeadLettered,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Failed => "failed",
            OutboxStatus::DeadLettered => "dead_lettered",
        }
    }
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Claim up to `limit` pending entries for this workspace, locking
    /// them against other drainers via `SKIP LOCKED`.
    async fn claim_batch(&self, workspace: WorkspaceId, limit: i64) -> Result<Vec<OutboxEntry>, StoreError>;

    async fn mark_done(&self, outbox_id: Uuid) -> Result<(), StoreError>;

    /// Records a failed attempt. Callers decide the dead-letter
    /// threshold (three strikes) and call `mark_dead_lettered` themselves.
    async fn mark_failed(&self, outbox_id: Uuid, error: &str) -> Result<(), StoreError>;

    async fn mark_dead_lettered(&self, outbox_id: Uuid) -> Result<(), StoreError>;
}

#[cfg(feature = "postgres")]
pub use pg::PgOutboxRepository;

#[cfg(feature = "postgres")]
mod pg {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PgOutboxRepository {
        pool: PgPool,
    }

    impl PgOutboxRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<OutboxEntry, StoreError> {
        let status = match row.try_get::<String, _>("status")?.as_str() {
            "failed" => OutboxStatus::Failed,
            "dead_lettered" => OutboxStatus::DeadLettered,
            _ => OutboxStatus::Pending,
        };
        Ok(OutboxEntry {
            outbox_id: row.try_get("outbox_id")?,
            workspace_id: WorkspaceId(row.try_get("workspace_id")?),
            event_id: row.try_get("event_id")?,
            event_type: row.try_get("event_type")?,
            idempotency_key: row.try_get("idempotency_key")?,
            status,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
        })
    }

    #[async_trait]
    impl OutboxRepository for PgOutboxRepository {
        async fn claim_batch(&self, workspace: WorkspaceId, limit: i64) -> Result<Vec<OutboxEntry>, StoreError> {
            let rows = sqlx::query(
                r#"
                SELECT * FROM outbox_entries
                WHERE workspace_id = $1 AND status IN ('pending', 'failed')
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
                "#,
            )
            .bind(workspace.0)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(row_to_entry).collect()
        }

        async fn mark_done(&self, outbox_id: Uuid) -> Result<(), StoreError> {
            sqlx::query("DELETE FROM outbox_entries WHERE outbox_id = $1")
                .bind(outbox_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn mark_failed(&self, outbox_id: Uuid, error: &str) -> Result<(), StoreError> {
            sqlx::query(
                r#"
                UPDATE outbox_entries
                SET status = 'failed', attempts = attempts + 1, last_error = $1
                WHERE outbox_id = $2
                "#,
            )
            .bind(error)
            .bind(outbox_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn mark_dead_lettered(&self, outbox_id: Uuid) -> Result<(), StoreError> {
            sqlx::query("UPDATE outbox_entries SET status = 'dead_lettered' WHERE outbox_id = $1")
                .bind(outbox_id)
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
    fn outbox_status_as_str() {
        assert_eq!(OutboxStatus::Pending.as_str(), "pending");
        assert_eq!(OutboxStatus::Failed.as_str(), "failed");
        assert_eq!(OutboxStatus::DeadLettered.as_str(), "dead_lettered");
    }
}
