//! The append path: the sole gateway for all state change (§4.1).
//!
//! Runs inside a transaction the caller owns (so projection apply and
//! outbox insertion share its atomicity). Uses a `FOR UPDATE`
//! sentinel-lock pattern for sequence assignment, plus a hash chain and
//! caller-chosen idempotency keys for exactly-once appends.

use ctrlplane_domain::event::EventDraft;
use ctrlplane_domain::ids::WorkspaceId;
use sqlx::{PgConnection, Row};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::hash::{compute_event_hash, Hashable, GENESIS_PREV_HASH};
use crate::types::{AppendOutcome, AppendedEvent, EventLogError, EventRow};

/// Event types with a registered automation handler: appending one of
/// these also writes an outbox row in the same transaction (§4.5).
fn has_outbox_binding(event_type: &str) -> bool {
    matches!(
        event_type,
        "scorecard.recorded"
            | "incident.opened"
            | "run.failed"
            | "message.created"
            | "lease.preempted"
    )
}

/// Append a single event draft. See module docs for the transactional
/// contract.
#[instrument(skip(conn, draft), fields(event_type = %draft.event_type, stream_type = %draft.stream.stream_type, stream_id = %draft.stream.stream_id))]
pub async fn append(
    conn: &mut PgConnection,
    bound_workspace: WorkspaceId,
    draft: EventDraft,
) -> Result<AppendedEvent, EventLogError> {
    if draft.workspace_id != bound_workspace {
        return Err(EventLogError::UnauthorizedWorkspace);
    }

    if let Some(key) = draft.idempotency_key.as_deref() {
        if let Some(existing) = find_by_idempotency_key(conn, bound_workspace, key).await? {
            if existing.actor_id == draft.actor.actor_id && existing.data == draft.data {
                return Ok(AppendedEvent {
                    row: existing,
                    outcome: AppendOutcome::IdempotentReplay,
                });
            }
            return Err(EventLogError::IdempotencyConflictUnresolved);
        }
    }

    let stream_type = draft.stream.stream_type.to_string();
    let stream_id = draft.stream.stream_id.clone();

    // Create the sentinel row for this stream if it doesn't exist yet,
    // then lock it. This is the single point of serialization for
    // `(stream_type, stream_id)`.
    if let Err(e) = sqlx::query(
        r#"
        INSERT INTO stream_state (workspace_id, stream_type, stream_id, max_seq, last_event_hash)
        VALUES ($1, $2, $3, 0, '')
        ON CONFLICT (workspace_id, stream_type, stream_id) DO NOTHING
        "#,
    )
    .bind(bound_workspace.0)
    .bind(&stream_type)
    .bind(&stream_id)
    .execute(&mut *conn)
    .await
    {
        warn!(error = %e, "stream sentinel upsert failed");
        return Err(EventLogError::Database(e));
    }

    let locked = sqlx::query(
        r#"
        SELECT max_seq, last_event_hash
        FROM stream_state
        WHERE workspace_id = $1 AND stream_type = $2 AND stream_id = $3
        FOR UPDATE NOWAIT
        "#,
    )
    .bind(bound_workspace.0)
    .bind(&stream_type)
    .bind(&stream_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("55P03") => EventLogError::LockContention {
            stream_type: stream_type.clone(),
            stream_id: stream_id.clone(),
        },
        _ => EventLogError::Database(e),
    })?;

    let max_seq: i64 = locked.try_get("max_seq")?;
    let last_event_hash: String = locked.try_get("last_event_hash")?;

    let next_seq = max_seq + 1;
    let prev_event_hash = if next_seq == 1 {
        GENESIS_PREV_HASH.to_string()
    } else {
        last_event_hash
    };

    let occurred_at = draft.occurred_at.to_rfc3339();
    let workspace_str = bound_workspace.to_string();
    let causation_str = draft.causation_id.map(|c| c.to_string());
    let hashable = Hashable {
        event_type: &draft.event_type,
        event_version: draft.event_version,
        occurred_at: &occurred_at,
        workspace_id: &workspace_str,
        actor_type: &draft.actor.actor_type.to_string(),
        actor_id: &draft.actor.actor_id,
        stream_type: &stream_type,
        stream_id: &stream_id,
        stream_seq: next_seq,
        correlation_id: &draft.correlation_id.0,
        causation_id: causation_str.as_deref(),
        idempotency_key: draft.idempotency_key.as_deref(),
        entity_type: &draft.entity_type,
        entity_id: &draft.entity_id,
        data: &draft.data,
        contains_secrets: draft.contains_secrets,
    };
    let event_hash = compute_event_hash(&hashable, &prev_event_hash);
    let event_id = Uuid::now_v7();

    let insert_result = sqlx::query(
        r#"
        INSERT INTO evt_events (
            event_id, event_type, event_version, occurred_at, workspace_id,
            actor_type, actor_id, stream_type, stream_id, stream_seq,
            correlation_id, causation_id, idempotency_key,
            prev_event_hash, event_hash, entity_type, entity_id, data,
            contains_secrets, recorded_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, now()
        )
        "#,
    )
    .bind(event_id)
    .bind(&draft.event_type)
    .bind(draft.event_version)
    .bind(draft.occurred_at)
    .bind(bound_workspace.0)
    .bind(draft.actor.actor_type.to_string())
    .bind(&draft.actor.actor_id)
    .bind(&stream_type)
    .bind(&stream_id)
    .bind(next_seq)
    .bind(&draft.correlation_id.0)
    .bind(draft.causation_id)
    .bind(&draft.idempotency_key)
    .bind(&prev_event_hash)
    .bind(&event_hash)
    .bind(&draft.entity_type)
    .bind(&draft.entity_id)
    .bind(&draft.data)
    .bind(draft.contains_secrets)
    .execute(&mut *conn)
    .await;

    if let Err(e) = insert_result {
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some("23505") {
                return Err(EventLogError::StreamSeqConflict { stream_type, stream_id });
            }
        }
        return Err(EventLogError::Database(e));
    }

    sqlx::query(
        r#"
        UPDATE stream_state
        SET max_seq = $1, last_event_hash = $2
        WHERE workspace_id = $3 AND stream_type = $4 AND stream_id = $5
        "#,
    )
    .bind(next_seq)
    .bind(&event_hash)
    .bind(bound_workspace.0)
    .bind(&stream_type)
    .bind(&stream_id)
    .execute(&mut *conn)
    .await?;

    if has_outbox_binding(&draft.event_type) {
        sqlx::query(
            r#"
            INSERT INTO outbox_entries (outbox_id, workspace_id, event_id, event_type, idempotency_key, status, attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, now())
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(bound_workspace.0)
        .bind(event_id)
        .bind(&draft.event_type)
        .bind(&draft.idempotency_key)
        .execute(&mut *conn)
        .await?;
    }

    let row = sqlx::query_as::<_, EventRow>("SELECT * FROM evt_events WHERE event_id = $1")
        .bind(event_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(AppendedEvent {
        row,
        outcome: AppendOutcome::Inserted,
    })
}

/// Append several drafts in order within the same transaction. Used by
/// call sites that need more than one event to become visible
/// atomically (e.g. `lease.preempted` immediately followed by
/// `lease.claimed`, with strictly increasing `stream_seq`).
pub async fn append_many(
    conn: &mut PgConnection,
    bound_workspace: WorkspaceId,
    drafts: Vec<EventDraft>,
) -> Result<Vec<AppendedEvent>, EventLogError> {
    let mut out = Vec::with_capacity(drafts.len());
    for draft in drafts {
        out.push(append(conn, bound_workspace, draft).await?);
    }
    Ok(out)
}

async fn find_by_idempotency_key(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    key: &str,
) -> Result<Option<EventRow>, EventLogError> {
    let row = sqlx::query_as::<_, EventRow>(
        "SELECT * FROM evt_events WHERE workspace_id = $1 AND idempotency_key = $2",
    )
    .bind(workspace.0)
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbox_bindings_cover_the_named_automations() {
        assert!(has_outbox_binding("scorecard.recorded"));
        assert!(has_outbox_binding("incident.opened"));
        assert!(!has_outbox_binding("message.created.unrelated"));
    }
}
