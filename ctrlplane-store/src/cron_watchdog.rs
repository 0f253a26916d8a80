//! Per-job consecutive-failure counter the cron watchdog consults to
//! decide whether a scheduled job should keep running or halt itself
//! until an operator intervenes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct CronWatchdogState {
    pub job_name: String,
    pub consecutive_failures: i32,
    pub halted: bool,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CronWatchdogRepository: Send + Sync {
    async fn get(&self, job_name: &str) -> Result<Option<CronWatchdogState>, StoreError>;

    /// Records a run's outcome: on failure, bumps the streak and halts
    /// once it reaches `halt_after`; on success, resets the streak and
    /// clears any halt.
    async fn record_outcome(&self, job_name: &str, succeeded: bool, halt_after: i32) -> Result<CronWatchdogState, StoreError>;
}

#[cfg(feature = "postgres")]
pub use pg::PgCronWatchdogRepository;

#[cfg(feature = "postgres")]
mod pg {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PgCronWatchdogRepository {
        pool: PgPool,
    }

    impl PgCronWatchdogRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    fn row_to_state(r: sqlx::postgres::PgRow) -> Result<CronWatchdogState, StoreError> {
        Ok(CronWatchdogState {
            job_name: r.try_get("job_name")?,
            consecutive_failures: r.try_get("consecutive_failures")?,
            halted: r.try_get("halted")?,
            updated_at: r.try_get("updated_at")?,
        })
    }

    #[async_trait]
    impl CronWatchdogRepository for PgCronWatchdogRepository {
        async fn get(&self, job_name: &str) -> Result<Option<CronWatchdogState>, StoreError> {
            let row = sqlx::query("SELECT * FROM cron_watchdog_state WHERE job_name = $1")
                .bind(job_name)
                .fetch_optional(&self.pool)
                .await?;
            row.map(row_to_state).transpose()
        }

        async fn record_outcome(&self, job_name: &str, succeeded: bool, halt_after: i32) -> Result<CronWatchdogState, StoreError> {
            let row = if succeeded {
                sqlx::query(
                    r#"
                    INSERT INTO cron_watchdog_state (job_name, consecutive_failures, halted, updated_at)
                    VALUES ($1, 0, false, now())
                    ON CONFLICT (job_name) DO UPDATE SET
                        consecutive_failures = 0,
                        halted = false,
                        updated_at = now()
                    RETURNING *
                    "#,
                )
                .bind(job_name)
                .fetch_one(&self.pool)
                .await?
            } else {
                sqlx::query(
                    r#"
                    INSERT INTO cron_watchdog_state (job_name, consecutive_failures, halted, updated_at)
                    VALUES ($1, 1, false, now())
                    ON CONFLICT (job_name) DO UPDATE SET
                        consecutive_failures = cron_watchdog_state.consecutive_failures + 1,
                        halted = (cron_watchdog_state.consecutive_failures + 1) >= $2,
                        updated_at = now()
                    RETURNING *
                    "#,
                )
                .bind(job_name)
                .bind(halt_after)
                .fetch_one(&self.pool)
                .await?
            };
            row_to_state(row)
        }
    }
}
