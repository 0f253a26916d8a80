//! Room/thread/message projections: the chat-shaped surface agents and
//! operators browse above the raw event log.

use ctrlplane_domain::ids::WorkspaceId;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;

pub(crate) async fn handle_room_created(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    room_id: &str,
    name: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proj_rooms (room_id, workspace_id, name, last_event_id, last_stream_seq, created_at)
        VALUES ($1, $2, $3, $4, $5, now())
        ON CONFLICT (room_id) DO UPDATE SET
            name = EXCLUDED.name,
            last_event_id = EXCLUDED.last_event_id,
            last_stream_seq = EXCLUDED.last_stream_seq
        WHERE proj_rooms.last_stream_seq < EXCLUDED.last_stream_seq
        "#,
    )
    .bind(room_id)
    .bind(workspace.0)
    .bind(name)
    .bind(event_id)
    .bind(stream_seq)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn handle_thread_created(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    thread_id: &str,
    room_id: &str,
    title: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proj_threads (thread_id, workspace_id, room_id, title, message_count, last_event_id, last_stream_seq, created_at)
        VALUES ($1, $2, $3, $4, 0, $5, $6, now())
        ON CONFLICT (thread_id) DO UPDATE SET
            title = EXCLUDED.title,
            last_event_id = EXCLUDED.last_event_id,
            last_stream_seq = EXCLUDED.last_stream_seq
        WHERE proj_threads.last_stream_seq < EXCLUDED.last_stream_seq
        "#,
    )
    .bind(thread_id)
    .bind(workspace.0)
    .bind(room_id)
    .bind(title)
    .bind(event_id)
    .bind(stream_seq)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn handle_message_created(
    conn: &mut PgConnection,
    workspace: WorkspaceId,
    event_id: Uuid,
    stream_seq: i64,
    thread_id: &str,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE proj_threads
        SET message_count = message_count + 1, last_event_id = $1, last_stream_seq = $2
        WHERE workspace_id = $3 AND thread_id = $4 AND last_stream_seq < $2
        "#,
    )
    .bind(event_id)
    .bind(stream_seq)
    .bind(workspace.0)
    .bind(thread_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        tracing::debug!(thread_id, "message.created projected against an unknown or stale thread");
    }
    Ok(())
}
