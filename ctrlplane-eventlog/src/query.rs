//! Readers over the event log: per-stream replay and cursor pagination.

use chrono::{DateTime, Utc};
use ctrlplane_domain::event::StreamType;
use ctrlplane_domain::ids::WorkspaceId;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::types::{EventLogError, EventRow};

/// Read a stream's events in `stream_seq ASC` order, starting strictly
/// after `from_seq` (0 to read from the beginning).
pub async fn read_stream<'e, E: PgExecutor<'e>>(
    executor: E,
    workspace: WorkspaceId,
    stream_type: StreamType,
    stream_id: &str,
    from_seq: i64,
    limit: i64,
) -> Result<Vec<EventRow>, EventLogError> {
    let rows = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT * FROM evt_events
        WHERE workspace_id = $1 AND stream_type = $2 AND stream_id = $3 AND stream_seq > $4
        ORDER BY stream_seq ASC
        LIMIT $5
        "#,
    )
    .bind(workspace.0)
    .bind(stream_type.to_string())
    .bind(stream_id)
    .bind(from_seq)
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// Fluent builder over an arbitrary set of events within a workspace,
/// used by `/v1/events` (filter by run/correlation) and by the
/// projection/pipeline views.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    workspace: Option<WorkspaceId>,
    correlation_id: Option<String>,
    entity_type: Option<String>,
    entity_id: Option<String>,
    event_id: Option<Uuid>,
    cursor_recorded_at: Option<DateTime<Utc>>,
    cursor_stream_seq: Option<i64>,
    limit: i64,
}

impl QueryOptions {
    pub fn new(workspace: WorkspaceId) -> Self {
        Self {
            workspace: Some(workspace),
            limit: 100,
            ..Default::default()
        }
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn cursor(mut self, recorded_at: DateTime<Utc>, stream_seq: i64) -> Self {
        self.cursor_recorded_at = Some(recorded_at);
        self.cursor_stream_seq = Some(stream_seq);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit.clamp(1, 1000);
        self
    }

    /// Build the SQL text for this filter set. Placeholder numbers are
    /// assigned in the same single pass that `bind_into` uses, so the
    /// two can never drift out of lockstep with each other.
    fn build_sql(&self) -> String {
        let mut clauses = vec!["1=1".to_string()];
        let mut idx = 0;
        let mut next = || {
            idx += 1;
            idx
        };
        if self.workspace.is_some() {
            clauses.push(format!("workspace_id = ${}", next()));
        }
        if self.correlation_id.is_some() {
            clauses.push(format!("correlation_id = ${}", next()));
        }
        if self.entity_type.is_some() {
            clauses.push(format!("entity_type = ${}", next()));
            clauses.push(format!("entity_id = ${}", next()));
        }
        if self.event_id.is_some() {
            clauses.push(format!("event_id = ${}", next()));
        }
        if self.cursor_recorded_at.is_some() {
            clauses.push(format!(
                "(recorded_at, stream_seq) > (${}, ${})",
                next(),
                next()
            ));
        }
        let limit_idx = next();
        format!(
            "SELECT * FROM evt_events WHERE {} ORDER BY recorded_at ASC, stream_seq ASC LIMIT ${}",
            clauses.join(" AND "),
            limit_idx
        )
    }
}

/// Execute a `QueryOptions` filter set. Kept as a standalone function
/// (rather than a method taking `self` by value into the query
/// builder) so the same options can be reused across pages.
pub async fn query_events<'e, E: PgExecutor<'e>>(
    executor: E,
    opts: &QueryOptions,
) -> Result<Vec<EventRow>, EventLogError> {
    let sql = opts.build_sql();
    let mut query = sqlx::query_as::<_, EventRow>(&sql);
    if let Some(ws) = opts.workspace {
        query = query.bind(ws.0);
    }
    if let Some(c) = &opts.correlation_id {
        query = query.bind(c);
    }
    if let Some(et) = &opts.entity_type {
        query = query.bind(et);
        query = query.bind(opts.entity_id.as_deref().unwrap_or_default());
    }
    if let Some(id) = opts.event_id {
        query = query.bind(id);
    }
    if let (Some(ra), Some(seq)) = (opts.cursor_recorded_at, opts.cursor_stream_seq) {
        query = query.bind(ra);
        query = query.bind(seq);
    }
    query = query.bind(opts.limit);

    let rows = query.fetch_all(executor).await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped_into_range() {
        let opts = QueryOptions::new(WorkspaceId::new()).limit(10_000);
        assert_eq!(opts.limit, 1000);
        let opts = QueryOptions::new(WorkspaceId::new()).limit(0);
        assert_eq!(opts.limit, 1);
    }

    #[test]
    fn build_sql_includes_workspace_filter_by_default() {
        let opts = QueryOptions::new(WorkspaceId::new());
        assert!(opts.build_sql().contains("workspace_id = $1"));
    }
}
