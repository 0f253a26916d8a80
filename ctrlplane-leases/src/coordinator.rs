//! Claim / heartbeat / release / preempt state machine (§4.3).
//!
//! Claim and preempt both append an event in the same transaction as
//! the lease row mutation, mirroring the event log's own sentinel-lock
//! pattern: lock first, decide, mutate, append, commit. Heartbeat never
//! appends — logging every heartbeat would flood the stream for no
//! benefit.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ctrlplane_domain::event::{Actor, EventDraft, EventKind, StreamRef, StreamType};
use ctrlplane_domain::ids::{CorrelationId, WorkspaceId};
use ctrlplane_eventlog::idempotency::{claim_key, preempt_key};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::error::LeaseError;

/// Work item types claimable through this coordinator. `run` is
/// deliberately excluded: runs use their own claim mechanism tied to
/// the lifecycle state machine, not a generic lease.
const ALLOWED_WORK_ITEM_TYPES: &[&str] = &["approval", "experiment", "incident", "message", "artifact"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Created,
    Replay,
    Preempted,
}

#[derive(Debug, Clone)]
pub struct ClaimedLease {
    pub lease_id: Uuid,
    pub version: i64,
    pub expires_at: DateTime<Utc>,
    pub outcome: ClaimOutcome,
}

fn check_allowed(work_item_type: &str) -> Result<(), LeaseError> {
    if ALLOWED_WORK_ITEM_TYPES.contains(&work_item_type) {
        Ok(())
    } else {
        Err(LeaseError::DisallowedWorkItemType(work_item_type.to_string()))
    }
}

struct ActiveRow {
    lease_id: Uuid,
    holder_actor_id: String,
    version: i64,
    expires_at: DateTime<Utc>,
}

#[instrument(skip(pool, agent), fields(%work_item_type, %work_item_id))]
pub async fn claim(
    pool: &PgPool,
    workspace: WorkspaceId,
    work_item_type: &str,
    work_item_id: &str,
    agent: &Actor,
    correlation_id: &CorrelationId,
    lease_duration: ChronoDuration,
) -> Result<ClaimedLease, LeaseError> {
    check_allowed(work_item_type)?;
    claim_any(pool, workspace, work_item_type, work_item_id, agent, correlation_id, lease_duration).await
}

/// Claims a run's own lease. Runs aren't in `ALLOWED_WORK_ITEM_TYPES` —
/// a generic work-item lease claim never targets one — but the engine
/// side of a run still needs the same claim/heartbeat/release/preempt
/// mechanics to hold exclusive execution rights over it, so this calls
/// the same state machine directly, skipping the generic allowlist.
#[instrument(skip(pool, agent), fields(%run_id))]
pub async fn claim_run(
    pool: &PgPool,
    workspace: WorkspaceId,
    run_id: &str,
    agent: &Actor,
    correlation_id: &CorrelationId,
    lease_duration: ChronoDuration,
) -> Result<ClaimedLease, LeaseError> {
    claim_any(pool, workspace, "run", run_id, agent, correlation_id, lease_duration).await
}

async fn claim_any(
    pool: &PgPool,
    workspace: WorkspaceId,
    work_item_type: &str,
    work_item_id: &str,
    agent: &Actor,
    correlation_id: &CorrelationId,
    lease_duration: ChronoDuration,
) -> Result<ClaimedLease, LeaseError> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        r#"
        SELECT lease_id, holder_actor_id, version, expires_at
        FROM work_item_leases
        WHERE workspace_id = $1 AND work_item_type = $2 AND work_item_id = $3 AND status = 'active'
        FOR UPDATE NOWAIT
        "#,
    )
    .bind(workspace.0)
    .bind(work_item_type)
    .bind(work_item_id)
    .fetch_optional(&mut *tx)
    .await?
    .map(|row| -> Result<ActiveRow, sqlx::Error> {
        Ok(ActiveRow {
            lease_id: row.try_get("lease_id")?,
            holder_actor_id: row.try_get("holder_actor_id")?,
            version: row.try_get("version")?,
            expires_at: row.try_get("expires_at")?,
        })
    })
    .transpose()?;

    let now = Utc::now();
    let new_expires_at = now + lease_duration;

    let (new_lease_id, outcome, draft) = match existing {
        None => {
            let lease_id = Uuid::now_v7();
            let idempotency_key = claim_key(workspace, work_item_type, work_item_id, lease_id);
            let draft = EventDraft::from_kind(
                workspace,
                agent.clone(),
                StreamRef::new(StreamType::Agent, work_item_id.to_string()),
                correlation_id.clone(),
                None,
                Some(idempotency_key),
                &EventKind::LeaseClaimed {
                    lease_id,
                    work_item_type: work_item_type.to_string(),
                    work_item_id: work_item_id.to_string(),
                    agent_id: agent.actor_id.clone(),
                },
            )?;
            sqlx::query(
                r#"
                INSERT INTO work_item_leases (
                    lease_id, workspace_id, work_item_type, work_item_id,
                    holder_actor_id, status, version, claimed_at, heartbeat_at, expires_at
                ) VALUES ($1, $2, $3, $4, $5, 'active', 1, now(), now(), $6)
                "#,
            )
            .bind(lease_id)
            .bind(workspace.0)
            .bind(work_item_type)
            .bind(work_item_id)
            .bind(agent.actor_id.clone())
            .bind(new_expires_at)
            .execute(&mut *tx)
            .await?;
            (lease_id, ClaimOutcome::Created, Some(draft))
        }
        Some(row) if row.holder_actor_id == agent.actor_id && row.expires_at > now => {
            // Alive row, same agent: replay if same correlation, else
            // reject — the caller doesn't get to silently switch
            // correlation under an unchanged lease.
            (row.lease_id, ClaimOutcome::Replay, None)
        }
        Some(row) if row.expires_at > now => {
            return Err(LeaseError::AlreadyClaimed);
        }
        Some(row) => {
            // Expired: preempt atomically. stream_seq for the preempt
            // event is assigned (and committed) strictly before the
            // following claim event within the same transaction.
            let new_lease_id = Uuid::now_v7();
            let preempt_idem = preempt_key(workspace, work_item_type, work_item_id, row.lease_id, new_lease_id);
            let claim_idem = claim_key(workspace, work_item_type, work_item_id, new_lease_id);

            sqlx::query(
                r#"
                UPDATE work_item_leases
                SET status = 'expired'
                WHERE workspace_id = $1 AND lease_id = $2
                "#,
            )
            .bind(workspace.0)
            .bind(row.lease_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO work_item_leases (
                    lease_id, workspace_id, work_item_type, work_item_id,
                    holder_actor_id, status, version, claimed_at, heartbeat_at, expires_at
                ) VALUES ($1, $2, $3, $4, $5, 'active', 1, now(), now(), $6)
                "#,
            )
            .bind(new_lease_id)
            .bind(workspace.0)
            .bind(work_item_type)
            .bind(work_item_id)
            .bind(agent.actor_id.clone())
            .bind(new_expires_at)
            .execute(&mut *tx)
            .await?;

            let preempted = EventDraft::from_kind(
                workspace,
                agent.clone(),
                StreamRef::new(StreamType::Agent, work_item_id.to_string()),
                correlation_id.clone(),
                None,
                Some(preempt_idem),
                &EventKind::LeasePreempted {
                    old_lease_id: row.lease_id,
                    new_lease_id,
                    work_item_type: work_item_type.to_string(),
                    work_item_id: work_item_id.to_string(),
                },
            )?;
            ctrlplane_eventlog::append::append(&mut tx, workspace, preempted).await?;

            let claimed = EventDraft::from_kind(
                workspace,
                agent.clone(),
                StreamRef::new(StreamType::Agent, work_item_id.to_string()),
                correlation_id.clone(),
                None,
                Some(claim_idem),
                &EventKind::LeaseClaimed {
                    lease_id: new_lease_id,
                    work_item_type: work_item_type.to_string(),
                    work_item_id: work_item_id.to_string(),
                    agent_id: agent.actor_id.clone(),
                },
            )?;
            (new_lease_id, ClaimOutcome::Preempted, Some(claimed))
        }
    };

    if outcome == ClaimOutcome::Replay {
        let existing_correlation_matches = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM evt_events
                WHERE workspace_id = $1 AND event_type = 'lease.claimed'
                  AND data->>'lease_id' = $2 AND correlation_id = $3
            )
            "#,
        )
        .bind(workspace.0)
        .bind(new_lease_id.to_string())
        .bind(&correlation_id.0)
        .fetch_one(&mut *tx)
        .await?;
        if !existing_correlation_matches {
            return Err(LeaseError::CorrelationIdMismatch);
        }
    } else if let Some(draft) = draft {
        ctrlplane_eventlog::append::append(&mut tx, workspace, draft).await?;
    }

    let final_row = sqlx::query("SELECT version, expires_at FROM work_item_leases WHERE workspace_id = $1 AND lease_id = $2")
        .bind(workspace.0)
        .bind(new_lease_id)
        .fetch_one(&mut *tx)
        .await?;
    let version: i64 = final_row.try_get("version")?;
    let expires_at: DateTime<Utc> = final_row.try_get("expires_at")?;

    tx.commit().await?;

    Ok(ClaimedLease {
        lease_id: new_lease_id,
        version,
        expires_at,
        outcome,
    })
}

#[instrument(skip(pool))]
pub async fn heartbeat(
    pool: &PgPool,
    workspace: WorkspaceId,
    lease_id: Uuid,
    expected_version: i64,
    lease_duration: ChronoDuration,
    min_interval: ChronoDuration,
) -> Result<(i64, DateTime<Utc>), LeaseError> {
    let row = sqlx::query(
        "SELECT version, heartbeat_at FROM work_item_leases WHERE workspace_id = $1 AND lease_id = $2 AND status = 'active'",
    )
    .bind(workspace.0)
    .bind(lease_id)
    .fetch_optional(pool)
    .await?
    .ok_or(LeaseError::NotFound(lease_id))?;

    let current_version: i64 = row.try_get("version")?;
    let last_heartbeat: DateTime<Utc> = row.try_get("heartbeat_at")?;

    if current_version != expected_version {
        return Err(LeaseError::VersionMismatch { lease_id, current_version });
    }
    if Utc::now() - last_heartbeat < min_interval {
        return Err(LeaseError::HeartbeatRateLimited);
    }

    let new_expires_at = Utc::now() + lease_duration;
    let result = sqlx::query(
        r#"
        UPDATE work_item_leases
        SET version = version + 1, heartbeat_at = now(), expires_at = $1
        WHERE workspace_id = $2 AND lease_id = $3 AND version = $4 AND status = 'active'
        "#,
    )
    .bind(new_expires_at)
    .bind(workspace.0)
    .bind(lease_id)
    .bind(expected_version)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LeaseError::VersionMismatch { lease_id, current_version: expected_version + 1 });
    }

    Ok((expected_version + 1, new_expires_at))
}

pub struct ReleaseOutcome {
    pub released: bool,
    pub stale: bool,
}

#[instrument(skip(pool, agent))]
pub async fn release(
    pool: &PgPool,
    workspace: WorkspaceId,
    lease_id: Uuid,
    agent: &Actor,
    correlation_id: &CorrelationId,
    work_item_type: &str,
    work_item_id: &str,
) -> Result<ReleaseOutcome, LeaseError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        "SELECT holder_actor_id, status FROM work_item_leases WHERE workspace_id = $1 AND lease_id = $2 FOR UPDATE",
    )
    .bind(workspace.0)
    .bind(lease_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(LeaseError::NotFound(lease_id))?;

    let holder_actor_id: String = row.try_get("holder_actor_id")?;
    let status: String = row.try_get("status")?;

    if status != "active" || holder_actor_id != agent.actor_id {
        return Ok(ReleaseOutcome { released: false, stale: true });
    }

    sqlx::query("UPDATE work_item_leases SET status = 'released' WHERE workspace_id = $1 AND lease_id = $2")
        .bind(workspace.0)
        .bind(lease_id)
        .execute(&mut *tx)
        .await?;

    let draft = EventDraft::from_kind(
        workspace,
        agent.clone(),
        StreamRef::new(StreamType::Agent, work_item_id.to_string()),
        correlation_id.clone(),
        None,
        None,
        &EventKind::LeaseReleased {
            lease_id,
            work_item_type: work_item_type.to_string(),
            work_item_id: work_item_id.to_string(),
        },
    )?;
    ctrlplane_eventlog::append::append(&mut tx, workspace, draft).await?;

    tx.commit().await?;

    Ok(ReleaseOutcome { released: true, stale: false })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_work_items_are_not_claimable() {
        assert!(check_allowed("run").is_err());
        assert!(check_allowed("tool_call").is_err());
        assert!(check_allowed("message").is_ok());
        assert!(check_allowed("artifact").is_ok());
    }
}
