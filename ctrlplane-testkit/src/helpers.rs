//! Seeding helpers for integration tests: appending events through the
//! real write path so tests exercise the same hash-chaining and
//! sequencing the production code does, rather than hand-inserting
//! projection rows.

use anyhow::Result;
use ctrlplane_domain::event::{Actor, EventDraft, EventKind, StreamRef, StreamType};
use ctrlplane_domain::ids::{CorrelationId, WorkspaceId};
use ctrlplane_eventlog::{append, AppendedEvent};
use sqlx::PgPool;
use uuid::Uuid;

/// Appends one event as `system`, with a fresh correlation id and no
/// idempotency key — the common case for seeding unrelated fixture
/// data that doesn't need replay protection.
pub async fn append_event(pool: &PgPool, workspace: WorkspaceId, stream: StreamRef, kind: &EventKind) -> Result<AppendedEvent> {
    append_event_with(pool, workspace, stream, CorrelationId::new(), None, kind).await
}

/// Same as [`append_event`] but lets the caller control correlation and
/// idempotency so tests can exercise replay and causation chaining.
pub async fn append_event_with(
    pool: &PgPool,
    workspace: WorkspaceId,
    stream: StreamRef,
    correlation_id: CorrelationId,
    idempotency_key: Option<String>,
    kind: &EventKind,
) -> Result<AppendedEvent> {
    let draft = EventDraft::from_kind(workspace, Actor::system(), stream, correlation_id, None, idempotency_key, kind)?;
    let mut conn = pool.acquire().await?;
    let appended = append::append(&mut conn, workspace, draft).await?;
    Ok(appended)
}

/// Seeds a fresh workspace id for a test — there is no workspace table
/// to insert into yet, `WorkspaceId` is just the tenant partition key
/// every event carries.
pub fn seed_workspace() -> WorkspaceId {
    WorkspaceId::new()
}

/// Seeds a room and a thread inside it, returning `(room_id, thread_id)`.
pub async fn seed_room_and_thread(pool: &PgPool, workspace: WorkspaceId, room_name: &str, thread_title: &str) -> Result<(String, String)> {
    let room_id = format!("room_{}", Uuid::now_v7());
    append_event(
        pool,
        workspace,
        StreamRef::new(StreamType::Room, room_id.clone()),
        &EventKind::RoomCreated { room_id: room_id.clone(), name: room_name.to_string() },
    )
    .await?;

    let thread_id = format!("thread_{}", Uuid::now_v7());
    append_event(
        pool,
        workspace,
        StreamRef::new(StreamType::Thread, thread_id.clone()),
        &EventKind::ThreadCreated { thread_id: thread_id.clone(), room_id: room_id.clone(), title: thread_title.to_string() },
    )
    .await?;

    Ok((room_id, thread_id))
}

/// Seeds a run through `queued` → `started`, leaving it `running` —
/// the shape most lease/projection tests want to start from.
pub async fn seed_running_run(pool: &PgPool, workspace: WorkspaceId, agent_id: &str) -> Result<String> {
    let run_id = format!("run_{}", Uuid::now_v7());
    let stream = StreamRef::new(StreamType::Run, run_id.clone());
    append_event(pool, workspace, stream.clone(), &EventKind::RunQueued { run_id: run_id.clone(), agent_id: agent_id.to_string() }).await?;
    append_event(pool, workspace, stream, &EventKind::RunStarted { run_id: run_id.clone() }).await?;
    Ok(run_id)
}

/// Seeds a passing scorecard for `run_id` at the given risk tier —
/// the event the promotion loop reacts to.
pub async fn seed_passing_scorecard(pool: &PgPool, workspace: WorkspaceId, run_id: &str, risk_tier: &str) -> Result<String> {
    let scorecard_id = format!("scorecard_{}", Uuid::now_v7());
    let stream = StreamRef::new(StreamType::Run, run_id);
    append_event(
        pool,
        workspace,
        stream,
        &EventKind::ScorecardRecorded {
            scorecard_id: scorecard_id.clone(),
            run_id: run_id.to_string(),
            risk_tier: risk_tier.to_string(),
            passed: true,
        },
    )
    .await?;
    Ok(scorecard_id)
}
