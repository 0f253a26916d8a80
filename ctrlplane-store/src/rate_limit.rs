//! Token-bucket rate limit state, one row per `(workspace, bucket_key)`.
//! The bucket key is caller-chosen (e.g. `egress:{actor_id}` or
//! `egress:workspace`), letting the policy pipeline enforce both
//! per-actor and per-workspace ceilings from the same table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctrlplane_domain::ids::WorkspaceId;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct RateLimitBucket {
    pub workspace_id: WorkspaceId,
    pub bucket_key: String,
    pub tokens_remaining: i32,
    pub capacity: i32,
    pub refill_per_hour: i32,
    pub last_refill_at: DateTime<Utc>,
    /// Consecutive exhausted-bucket hits since the last successful
    /// consume. Drives the `agent_flooding` incident trigger; reset to
    /// zero on any successful consume.
    pub consecutive_throttled: i32,
    /// Set once the flooding incident for this streak has been opened,
    /// so repeated exhaustion doesn't open a second one every request.
    pub muted_until: Option<DateTime<Utc>>,
}

impl RateLimitBucket {
    /// Refill proportionally to elapsed time, capped at `capacity`.
    /// Call before checking/decrementing so the bucket always reflects
    /// "now" rather than whenever it was last touched.
    pub fn refilled(&self, now: DateTime<Utc>) -> Self {
        let elapsed_hours = (now - self.last_refill_at).num_seconds() as f64 / 3600.0;
        let grant = (elapsed_hours * self.refill_per_hour as f64).floor() as i32;
        let tokens_remaining = (self.tokens_remaining + grant.max(0)).min(self.capacity);
        Self {
            tokens_remaining,
            last_refill_at: if grant > 0 { now } else { self.last_refill_at },
            ..self.clone()
        }
    }

    pub fn try_consume(&self, now: DateTime<Utc>) -> Option<Self> {
        let refreshed = self.refilled(now);
        if refreshed.tokens_remaining > 0 {
            Some(Self {
                tokens_remaining: refreshed.tokens_remaining - 1,
                consecutive_throttled: 0,
                ..refreshed
            })
        } else {
            None
        }
    }

    /// Bump the throttled streak after a failed `try_consume`. Returns
    /// the post-increment bucket; the caller decides whether the new
    /// streak crosses the flooding threshold.
    pub fn throttled(&self, now: DateTime<Utc>) -> Self {
        Self {
            consecutive_throttled: self.consecutive_throttled + 1,
            ..self.refilled(now)
        }
    }

    pub fn is_muted(&self, now: DateTime<Utc>) -> bool {
        self.muted_until.map(|until| now < until).unwrap_or(false)
    }
}

#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    async fn get_or_init(
        &self,
        workspace: WorkspaceId,
        bucket_key: &str,
        capacity: i32,
        refill_per_hour: i32,
    ) -> Result<RateLimitBucket, StoreError>;

    /// Persist the post-consumption bucket state. Uses an
    /// `UPDATE ... WHERE tokens_remaining = $old` style compare-and-swap
    /// so two concurrent consumers never both succeed off a stale read.
    async fn save(&self, bucket: &RateLimitBucket, expected_tokens: i32) -> Result<bool, StoreError>;

    /// Persist a throttled-streak update (no token movement, so no CAS
    /// on `tokens_remaining` is needed).
    async fn save_throttle(&self, bucket: &RateLimitBucket) -> Result<(), StoreError>;
}

#[cfg(feature = "postgres")]
pub use pg::PgRateLimitRepository;

#[cfg(feature = "postgres")]
mod pg {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PgRateLimitRepository {
        pool: PgPool,
    }

    impl PgRateLimitRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl RateLimitRepository for PgRateLimitRepository {
        async fn get_or_init(
            &self,
            workspace: WorkspaceId,
            bucket_key: &str,
            capacity: i32,
            refill_per_hour: i32,
        ) -> Result<RateLimitBucket, StoreError> {
            sqlx::query(
                r#"
                INSERT INTO rate_limit_buckets (workspace_id, bucket_key, tokens_remaining, capacity, refill_per_hour, last_refill_at)
                VALUES ($1, $2, $3, $3, $4, now())
                ON CONFLICT (workspace_id, bucket_key) DO NOTHING
                "#,
            )
            .bind(workspace.0)
            .bind(bucket_key)
            .bind(capacity)
            .bind(refill_per_hour)
            .execute(&self.pool)
            .await?;

            let row = sqlx::query(
                "SELECT * FROM rate_limit_buckets WHERE workspace_id = $1 AND bucket_key = $2",
            )
            .bind(workspace.0)
            .bind(bucket_key)
            .fetch_one(&self.pool)
            .await?;

            Ok(RateLimitBucket {
                workspace_id: WorkspaceId(row.try_get("workspace_id")?),
                bucket_key: row.try_get("bucket_key")?,
                tokens_remaining: row.try_get("tokens_remaining")?,
                capacity: row.try_get("capacity")?,
                refill_per_hour: row.try_get("refill_per_hour")?,
                last_refill_at: row.try_get("last_refill_at")?,
                consecutive_throttled: row.try_get("consecutive_throttled")?,
                muted_until: row.try_get("muted_until")?,
            })
        }

        async fn save(&self, bucket: &RateLimitBucket, expected_tokens: i32) -> Result<bool, StoreError> {
            let result = sqlx::query(
                r#"
                UPDATE rate_limit_buckets
                SET tokens_remaining = $1, last_refill_at = $2, consecutive_throttled = $3, muted_until = $4
                WHERE workspace_id = $5 AND bucket_key = $6 AND tokens_remaining = $7
                "#,
            )
            .bind(bucket.tokens_remaining)
            .bind(bucket.last_refill_at)
            .bind(bucket.consecutive_throttled)
            .bind(bucket.muted_until)
            .bind(bucket.workspace_id.0)
            .bind(&bucket.bucket_key)
            .bind(expected_tokens)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn save_throttle(&self, bucket: &RateLimitBucket) -> Result<(), StoreError> {
            sqlx::query(
                r#"
                UPDATE rate_limit_buckets
                SET consecutive_throttled = $1, muted_until = $2, last_refill_at = $3
                WHERE workspace_id = $4 AND bucket_key = $5
                "#,
            )
            .bind(bucket.consecutive_throttled)
            .bind(bucket.muted_until)
            .bind(bucket.last_refill_at)
            .bind(bucket.workspace_id.0)
            .bind(&bucket.bucket_key)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(tokens: i32, last_refill_at: DateTime<Utc>) -> RateLimitBucket {
        RateLimitBucket {
            workspace_id: WorkspaceId::new(),
            bucket_key: "egress:workspace".to_string(),
            tokens_remaining: tokens,
            capacity: 2,
            refill_per_hour: 2,
            last_refill_at,
            consecutive_throttled: 0,
            muted_until: None,
        }
    }

    #[test]
    fn consuming_an_empty_bucket_with_no_elapsed_time_fails() {
        let b = bucket(0, Utc::now());
        assert!(b.try_consume(Utc::now()).is_none());
    }

    #[test]
    fn consuming_decrements_by_one() {
        let b = bucket(2, Utc::now());
        let after = b.try_consume(Utc::now()).unwrap();
        assert_eq!(after.tokens_remaining, 1);
    }

    #[test]
    fn bucket_refills_proportionally_to_elapsed_hours() {
        let b = bucket(0, Utc::now() - chrono::Duration::hours(1));
        let refreshed = b.refilled(Utc::now());
        assert_eq!(refreshed.tokens_remaining, 2);
    }

    #[test]
    fn throttled_streak_increments_and_consume_resets_it() {
        let b = bucket(0, Utc::now());
        let once = b.throttled(Utc::now());
        let twice = once.throttled(Utc::now());
        assert_eq!(twice.consecutive_throttled, 2);

        let refilled = twice.refilled(Utc::now() + chrono::Duration::hours(1));
        let consumed = refilled.try_consume(Utc::now() + chrono::Duration::hours(1)).unwrap();
        assert_eq!(consumed.consecutive_throttled, 0);
    }

    #[test]
    fn mute_window_is_respected() {
        let mut b = bucket(0, Utc::now());
        b.muted_until = Some(Utc::now() + chrono::Duration::seconds(60));
        assert!(b.is_muted(Utc::now()));
        assert!(!b.is_muted(Utc::now() + chrono::Duration::seconds(120)));
    }
}
