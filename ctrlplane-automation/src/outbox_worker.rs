//! Drains the outbox (§4.5): claims pending/failed rows with
//! `SKIP LOCKED`, dispatches each to its handler, and promotes a row to
//! the dead-letter queue on its third failure, opening one
//! `poison_message` incident alongside it.
//!
//! Handler failures never roll back the event that produced the outbox
//! row — they run in this drain's own transaction, not the producer's.

use std::sync::Arc;

use ctrlplane_domain::ids::WorkspaceId;
use ctrlplane_eventlog::query::{query_events, QueryOptions};
use ctrlplane_store::{DlqEntry, DlqRepository, OutboxRepository, ProjectionReader};
use sqlx::PgPool;
use tracing::{instrument, warn};

use crate::error::{AutomationError, AutomationResult};
use crate::handlers::{poison, promotion};

const MAX_ATTEMPTS: i32 = 3;

pub struct OutboxWorker {
    pool: PgPool,
    outbox: Arc<dyn OutboxRepository>,
    dlq: Arc<dyn DlqRepository>,
    projections: Arc<dyn ProjectionReader>,
}

impl OutboxWorker {
    pub fn new(
        pool: PgPool,
        outbox: Arc<dyn OutboxRepository>,
        dlq: Arc<dyn DlqRepository>,
        projections: Arc<dyn ProjectionReader>,
    ) -> Self {
        Self { pool, outbox, dlq, projections }
    }

    /// Drain up to `limit` entries for one workspace. Returns the
    /// number of entries processed (successfully or not).
    #[instrument(skip(self))]
    pub async fn drain_once(&self, workspace: WorkspaceId, limit: i64) -> AutomationResult<usize> {
        let entries = self.outbox.claim_batch(workspace, limit).await?;
        let processed = entries.len();

        for entry in entries {
            match self.process_entry(workspace, entry.event_id, &entry.event_type).await {
                Ok(()) => self.outbox.mark_done(entry.outbox_id).await?,
                Err(err) => {
                    warn!(event_type = %entry.event_type, error = %err, "outbox entry handler failed");
                    self.outbox.mark_failed(entry.outbox_id, &err.to_string()).await?;
                    if entry.attempts + 1 >= MAX_ATTEMPTS {
                        self.dead_letter(workspace, entry.event_id, &entry.event_type, &err.to_string()).await?;
                        self.outbox.mark_dead_lettered(entry.outbox_id).await?;
                    }
                }
            }
        }
        Ok(processed)
    }

    async fn process_entry(&self, workspace: WorkspaceId, event_id: uuid::Uuid, event_type: &str) -> AutomationResult<()> {
        let opts = QueryOptions::new(workspace).event_id(event_id).limit(1);
        let row = query_events(&self.pool, &opts)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AutomationError::HandlerRejected(format!("outbox row references missing event {event_id}")))?;

        match event_type {
            "scorecard.recorded" => {
                let kind: ctrlplane_domain::event::EventKind = serde_json::from_value(row.data.clone())
                    .map_err(|e| AutomationError::HandlerRejected(e.to_string()))?;
                if let ctrlplane_domain::event::EventKind::ScorecardRecorded { scorecard_id, run_id, risk_tier, passed } = kind {
                    let mut conn = self.pool.acquire().await?;
                    promotion::handle_scorecard_recorded(
                        &mut conn,
                        &self.projections,
                        workspace,
                        &row,
                        &scorecard_id,
                        &run_id,
                        &risk_tier,
                        passed,
                    )
                    .await?;
                }
                Ok(())
            }
            // incident.opened / run.failed / message.created / lease.preempted
            // ride the outbox so future automation bindings can react to
            // them, but have no handler of their own yet — draining them
            // is a no-op that simply retires the row.
            _ => Ok(()),
        }
    }

    async fn dead_letter(&self, workspace: WorkspaceId, event_id: uuid::Uuid, event_type: &str, last_error: &str) -> AutomationResult<()> {
        let mut conn = self.pool.acquire().await?;
        let incident_id = poison::open_poison_message_incident(&mut conn, workspace, event_id, event_type, last_error).await?;
        self.dlq
            .insert(&DlqEntry {
                dlq_id: uuid::Uuid::now_v7(),
                workspace_id: workspace,
                event_id,
                event_type: event_type.to_string(),
                attempts: MAX_ATTEMPTS,
                last_error: last_error.to_string(),
                incident_id: Some(incident_id),
                created_at: chrono::Utc::now(),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_attempts_is_three() {
        assert_eq!(MAX_ATTEMPTS, 3);
    }
}
