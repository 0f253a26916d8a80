//! Stream fanout (§4.7): `GET /v1/streams/{stream_type}/{stream_id}`
//! long-polls the event log for rows past the client's cursor and
//! serializes each as one SSE `data:` frame, with a heartbeat comment
//! on every empty poll interval. Cancels immediately on disconnect —
//! axum's `Sse` body drops the underlying stream, which drops this
//! task, the instant the client goes away.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use ctrlplane_domain::event::StreamType;
use ctrlplane_domain::ids::WorkspaceId;
use ctrlplane_eventlog::{read_stream, EventRow};
use sqlx::PgPool;
use tokio::time::interval;
use tokio_stream::Stream;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const PAGE_SIZE: i64 = 100;

/// Builds the long-poll stream for one `(stream_type, stream_id)`,
/// starting strictly after `from_seq`.
pub fn fanout(
    pool: PgPool,
    workspace: WorkspaceId,
    stream_type: StreamType,
    stream_id: String,
    from_seq: i64,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let mut cursor = from_seq;
        let mut ticks = interval(POLL_INTERVAL);
        loop {
            ticks.tick().await;
            match read_stream(&pool, workspace, stream_type, &stream_id, cursor, PAGE_SIZE).await {
                Ok(rows) if rows.is_empty() => continue,
                Ok(rows) => {
                    for row in rows {
                        cursor = row.stream_seq;
                        yield Ok(to_sse_event(&row));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stream fanout read failed, ending subscription");
                    break;
                }
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("keep-alive"))
}

fn to_sse_event(row: &EventRow) -> Event {
    Event::default()
        .id(row.event_id.to_string())
        .event(row.event_type.clone())
        .json_data(row)
        .unwrap_or_else(|_| Event::default().data("{}"))
}
