//! Cron watchdog locking: a single advisory-style row per job name
//! guarantees only one process runs a given scheduled job at a time,
//! even across a multi-instance deployment. The returned fencing token
//! lets a caller detect if it was preempted mid-run before it writes
//! results back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct CronLock {
    pub job_name: String,
    pub fencing_token: i64,
    pub locked_by: String,
    pub locked_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait CronLockRepository: Send + Sync {
    /// Attempt to acquire (or steal an expired) lock for `job_name`.
    /// Returns `None` if another process currently holds a live lock.
    async fn try_acquire(
        &self,
        job_name: &str,
        locked_by: &str,
        lease_duration_secs: i64,
    ) -> Result<Option<CronLock>, StoreError>;

    /// Releases the lock only if `fencing_token` still matches — a
    /// stale holder's release is a no-op rather than clobbering a
    /// newer holder's lock.
    async fn release(&self, job_name: &str, fencing_token: i64) -> Result<(), StoreError>;
}

#[cfg(feature = "postgres")]
pub use pg::PgCronLockRepository;

#[cfg(feature = "postgres")]
mod pg {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PgCronLockRepository {
        pool: PgPool,
    }

    impl PgCronLockRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl CronLockRepository for PgCronLockRepository {
        async fn try_acquire(
            &self,
            job_name: &str,
            locked_by: &str,
            lease_duration_secs: i64,
        ) -> Result<Option<CronLock>, StoreError> {
            sqlx::query(
                r#"
                INSERT INTO cron_locks (job_name, fencing_token, locked_by, locked_at, lease_expires_at)
                VALUES ($1, 1, $2, now(), now() + ($3 || ' seconds')::interval)
                ON CONFLICT (job_name) DO UPDATE SET
                    fencing_token = cron_locks.fencing_token + 1,
                    locked_by = EXCLUDED.locked_by,
                    locked_at = now(),
                    lease_expires_at = now() + ($3 || ' seconds')::interval
                WHERE cron_locks.lease_expires_at < now()
                "#,
            )
            .bind(job_name)
            .bind(locked_by)
            .bind(lease_duration_secs)
            .execute(&self.pool)
            .await?;

            let row = sqlx::query("SELECT * FROM cron_locks WHERE job_name = $1 AND locked_by = $2")
                .bind(job_name)
                .bind(locked_by)
                .fetch_optional(&self.pool)
                .await?;

            row.map(|r| {
                Ok(CronLock {
                    job_name: r.try_get("job_name")?,
                    fencing_token: r.try_get("fencing_token")?,
                    locked_by: r.try_get("locked_by")?,
                    locked_at: r.try_get("locked_at")?,
                    lease_expires_at: r.try_get("lease_expires_at")?,
                })
            })
            .transpose()
        }

        async fn release(&self, job_name: &str, fencing_token: i64) -> Result<(), StoreError> {
            sqlx::query(
                "UPDATE cron_locks SET lease_expires_at = now() WHERE job_name = $1 AND fencing_token = $2",
            )
            .bind(job_name)
            .bind(fencing_token)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }
}
