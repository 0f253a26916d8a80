//! Work-item lease rows: the durable half of the claim/heartbeat/release/
//! preempt state machine (the decision logic itself lives upstream, in
//! the leases crate; this module only ever moves rows).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctrlplane_domain::ids::WorkspaceId;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStatus {
    Active,
    Released,
    Expired,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Active => "active",
            LeaseStatus::Released => "released",
            LeaseStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "released" => LeaseStatus::Released,
            "expired" => LeaseStatus::Expired,
            _ => LeaseStatus::Active,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkItemLease {
    pub lease_id: Uuid,
    pub workspace_id: WorkspaceId,
    pub work_item_type: String,
    pub work_item_id: String,
    pub holder_actor_id: String,
    pub status: LeaseStatus,
    /// Monotonic fencing token. Bumped on every claim/preempt; a writer
    /// presenting a stale version is rejected rather than allowed to
    /// clobber a newer holder's work.
    pub version: i64,
    pub claimed_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Port over the lease table. Implementations run inside a transaction
/// the caller owns, so a claim/preempt decision and its accompanying
/// event append land together.
#[async_trait]
pub trait LeaseRepository: Send + Sync {
    async fn find_active(
        &self,
        workspace: WorkspaceId,
        work_item_type: &str,
        work_item_id: &str,
    ) -> Result<Option<WorkItemLease>, StoreError>;

    async fn find_by_id(&self, workspace: WorkspaceId, lease_id: Uuid) -> Result<WorkItemLease, StoreError>;

    /// Insert a brand-new active lease row for a work item with no
    /// current holder. Callers must have already verified there is no
    /// active lease (or relied on the unique index racing safely).
    async fn insert(&self, lease: &WorkItemLease) -> Result<(), StoreError>;

    /// Replace the current holder of a work item, bumping `version` by
    /// one and resetting the heartbeat/expiry clocks. Fails with
    /// `VersionConflict` if `expected_version` doesn't match the row's
    /// current version (someone else claimed or heartbeat'd first).
    async fn preempt(
        &self,
        workspace: WorkspaceId,
        lease_id: Uuid,
        expected_version: i64,
        new_holder_actor_id: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<WorkItemLease, StoreError>;

    async fn heartbeat(
        &self,
        workspace: WorkspaceId,
        lease_id: Uuid,
        expected_version: i64,
        new_expires_at: DateTime<Utc>,
    ) -> Result<WorkItemLease, StoreError>;

    async fn release(
        &self,
        workspace: WorkspaceId,
        lease_id: Uuid,
        expected_version: i64,
    ) -> Result<(), StoreError>;

    /// Leases whose `expires_at` has passed and are still `active`,
    /// oldest first. Used by the cron watchdog to surface abandoned work.
    async fn find_expired(&self, workspace: WorkspaceId, limit: i64) -> Result<Vec<WorkItemLease>, StoreError>;
}

#[cfg(feature = "postgres")]
pub use pg::PgLeaseRepository;

#[cfg(feature = "postgres")]
mod pg {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PgLeaseRepository {
        pool: PgPool,
    }

    impl PgLeaseRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    fn row_to_lease(row: &sqlx::postgres::PgRow) -> Result<WorkItemLease, StoreError> {
        Ok(WorkItemLease {
            lease_id: row.try_get("lease_id")?,
            workspace_id: WorkspaceId(row.try_get("workspace_id")?),
            work_item_type: row.try_get("work_item_type")?,
            work_item_id: row.try_get("work_item_id")?,
            holder_actor_id: row.try_get("holder_actor_id")?,
            status: LeaseStatus::parse(row.try_get::<String, _>("status")?.as_str()),
            version: row.try_get("version")?,
            claimed_at: row.try_get("claimed_at")?,
            heartbeat_at: row.try_get("heartbeat_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    #[async_trait]
    impl LeaseRepository for PgLeaseRepository {
        async fn find_active(
            &self,
            workspace: WorkspaceId,
            work_item_type: &str,
            work_item_id: &str,
        ) -> Result<Option<WorkItemLease>, StoreError> {
            let row = sqlx::query(
                r#"
                SELECT * FROM work_item_leases
                WHERE workspace_id = $1 AND work_item_type = $2 AND work_item_id = $3 AND status = 'active'
                "#,
            )
            .bind(workspace.0)
            .bind(work_item_type)
            .bind(work_item_id)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(row_to_lease).transpose()
        }

        async fn find_by_id(&self, workspace: WorkspaceId, lease_id: Uuid) -> Result<WorkItemLease, StoreError> {
            let row = sqlx::query("SELECT * FROM work_item_leases WHERE workspace_id = $1 AND lease_id = $2")
                .bind(workspace.0)
                .bind(lease_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    entity_type: "lease",
                    id: lease_id.to_string(),
                })?;
            row_to_lease(&row)
        }

        async fn insert(&self, lease: &WorkItemLease) -> Result<(), StoreError> {
            sqlx::query(
                r#"
                INSERT INTO work_item_leases (
                    lease_id, workspace_id, work_item_type, work_item_id,
                    holder_actor_id, status, version, claimed_at, heartbeat_at, expires_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(lease.lease_id)
            .bind(lease.workspace_id.0)
            .bind(&lease.work_item_type)
            .bind(&lease.work_item_id)
            .bind(&lease.holder_actor_id)
            .bind(lease.status.as_str())
            .bind(lease.version)
            .bind(lease.claimed_at)
            .bind(lease.heartbeat_at)
            .bind(lease.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_insert_error(e, "lease", lease.lease_id.to_string()))?;
            Ok(())
        }

        async fn preempt(
            &self,
            workspace: WorkspaceId,
            lease_id: Uuid,
            expected_version: i64,
            new_holder_actor_id: &str,
            new_expires_at: DateTime<Utc>,
        ) -> Result<WorkItemLease, StoreError> {
            let row = sqlx::query(
                r#"
                UPDATE work_item_leases
                SET holder_actor_id = $1, version = version + 1, claimed_at = now(),
                    heartbeat_at = now(), expires_at = $2, status = 'active'
                WHERE workspace_id = $3 AND lease_id = $4 AND version = $5
                RETURNING *
                "#,
            )
            .bind(new_holder_actor_id)
            .bind(new_expires_at)
            .bind(workspace.0)
            .bind(lease_id)
            .bind(expected_version)
            .fetch_optional(&self.pool)
            .await?;
            match row {
                Some(r) => row_to_lease(&r),
                None => {
                    let current = self.find_by_id(workspace, lease_id).await?;
                    Err(StoreError::VersionConflict {
                        expected: expected_version,
                        found: current.version,
                    })
                }
            }
        }

        async fn heartbeat(
            &self,
            workspace: WorkspaceId,
            lease_id: Uuid,
            expected_version: i64,
            new_expires_at: DateTime<Utc>,
        ) -> Result<WorkItemLease, StoreError> {
            let row = sqlx::query(
                r#"
                UPDATE work_item_leases
                SET version = version + 1, heartbeat_at = now(), expires_at = $1
                WHERE workspace_id = $2 AND lease_id = $3 AND version = $4 AND status = 'active'
                RETURNING *
                "#,
            )
            .bind(new_expires_at)
            .bind(workspace.0)
            .bind(lease_id)
            .bind(expected_version)
            .fetch_optional(&self.pool)
            .await?;
            match row {
                Some(r) => row_to_lease(&r),
                None => {
                    let current = self.find_by_id(workspace, lease_id).await?;
                    Err(StoreError::VersionConflict {
                        expected: expected_version,
                        found: current.version,
                    })
                }
            }
        }

        async fn release(
            &self,
            workspace: WorkspaceId,
            lease_id: Uuid,
            expected_version: i64,
        ) -> Result<(), StoreError> {
            let result = sqlx::query(
                r#"
                UPDATE work_item_leases
                SET status = 'released', version = version + 1
                WHERE workspace_id = $1 AND lease_id = $2 AND version = $3
                "#,
            )
            .bind(workspace.0)
            .bind(lease_id)
            .bind(expected_version)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                let current = self.find_by_id(workspace, lease_id).await?;
                return Err(StoreError::VersionConflict {
                    expected: expected_version,
                    found: current.version,
                });
            }
            Ok(())
        }

        async fn find_expired(&self, workspace: WorkspaceId, limit: i64) -> Result<Vec<WorkItemLease>, StoreError> {
            let rows = sqlx::query(
                r#"
                SELECT * FROM work_item_leases
                WHERE workspace_id = $1 AND status = 'active' AND expires_at < now()
                ORDER BY expires_at ASC
                LIMIT $2
                "#,
            )
            .bind(workspace.0)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(row_to_lease).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_status_roundtrips_through_str() {
        assert_eq!(LeaseStatus::parse("active").as_str(), "active");
        assert_eq!(LeaseStatus::parse("released").as_str(), "released");
        assert_eq!(LeaseStatus::parse("expired").as_str(), "expired");
        assert_eq!(LeaseStatus::parse("bogus").as_str(), "active");
    }
}
