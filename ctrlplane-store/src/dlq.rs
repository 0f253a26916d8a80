//! Dead-letter entries: an outbox entry graduates here after its third
//! failed attempt, and the automation loop opens a `poison_message`
//! incident alongside each insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctrlplane_domain::ids::WorkspaceId;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct DlqEntry {
    pub dlq_id: Uuid,
    pub workspace_id: WorkspaceId,
    pub event_id: Uuid,
    pub event_type: String,
    pub attempts: i32,
    pub last_error: String,
    pub incident_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait DlqRepository: Send + Sync {
    async fn insert(&self, entry: &DlqEntry) -> Result<(), StoreError>;
    async fn list(&self, workspace: WorkspaceId, limit: i64) -> Result<Vec<DlqEntry>, StoreError>;
}

#[cfg(feature = "postgres")]
pub use pg::PgDlqRepository;

#[cfg(feature = "postgres")]
mod pg {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PgDlqRepository {
        pool: PgPool,
    }

    impl PgDlqRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl DlqRepository for PgDlqRepository {
        async fn insert(&self, entry: &DlqEntry) -> Result<(), StoreError> {
            sqlx::query(
                r#"
                INSERT INTO dead_letter_entries (
                    dlq_id, workspace_id, event_id, event_type, attempts, last_error, incident_id, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, now())
                "#,
            )
            .bind(entry.dlq_id)
            .bind(entry.workspace_id.0)
            .bind(entry.event_id)
            .bind(&entry.event_type)
            .bind(entry.attempts)
            .bind(&entry.last_error)
            .bind(&entry.incident_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_insert_error(e, "dlq_entry", entry.dlq_id.to_string()))?;
            Ok(())
        }

        async fn list(&self, workspace: WorkspaceId, limit: i64) -> Result<Vec<DlqEntry>, StoreError> {
            let rows = sqlx::query(
                "SELECT * FROM dead_letter_entries WHERE workspace_id = $1 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(workspace.0)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter()
                .map(|row| {
                    Ok(DlqEntry {
                        dlq_id: row.try_get("dlq_id")?,
                        workspace_id: WorkspaceId(row.try_get("workspace_id")?),
                        event_id: row.try_get("event_id")?,
                        event_type: row.try_get("event_type")?,
                        attempts: row.try_get("attempts")?,
                        last_error: row.try_get("last_error")?,
                        incident_id: row.try_get("incident_id")?,
                        created_at: row.try_get("created_at")?,
                    })
                })
                .collect()
        }
    }
}
