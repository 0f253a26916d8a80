//! Per-(reason_code, pattern) mistake counter. Any non-allow decision
//! increments its counter; at count ≥ 2 the caller emits
//! `mistake.repeated` and `constraint.learned` once and the counter
//! keeps climbing — the learning event fires on crossing the
//! threshold, not on every subsequent repeat.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::PolicyError;
use crate::secrets::redact;
use ctrlplane_domain::ids::WorkspaceId;

pub const REPEAT_THRESHOLD: i64 = 2;

/// Bump the counter for `(reason_code, pattern)` and return the new
/// count along with the redacted pattern actually stored.
pub async fn record_mistake(
    pool: &PgPool,
    workspace: WorkspaceId,
    reason_code: &str,
    pattern: &str,
) -> Result<i64, PolicyError> {
    let redacted_pattern = redact(pattern);
    let row = sqlx::query(
        r#"
        INSERT INTO policy_mistake_counters (id, workspace_id, reason_code, pattern, count, updated_at)
        VALUES ($1, $2, $3, $4, 1, now())
        ON CONFLICT (workspace_id, reason_code, pattern) DO UPDATE
            SET count = policy_mistake_counters.count + 1, updated_at = now()
        RETURNING count
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(workspace.0)
    .bind(reason_code)
    .bind(&redacted_pattern)
    .fetch_one(pool)
    .await?;
    Ok(sqlx::Row::try_get(&row, "count")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_two() {
        assert_eq!(REPEAT_THRESHOLD, 2);
    }
}
