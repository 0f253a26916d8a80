//! Per-agent rolling hysteresis counter the lifecycle state machine
//! consults before promoting/demoting an agent (§4.6): how many
//! consecutive daily rollups in a row have been "risky".

use async_trait::async_trait;
use chrono::NaiveDate;
use ctrlplane_domain::ids::WorkspaceId;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct AgentSurvivalLedger {
    pub workspace_id: WorkspaceId,
    pub agent_id: String,
    pub consecutive_risky_days: i32,
    pub last_rollup_date: NaiveDate,
}

#[async_trait]
pub trait SurvivalLedgerRepository: Send + Sync {
    async fn get(&self, workspace: WorkspaceId, agent_id: &str) -> Result<Option<AgentSurvivalLedger>, StoreError>;
    async fn save(&self, ledger: &AgentSurvivalLedger) -> Result<(), StoreError>;
}

#[cfg(feature = "postgres")]
pub use pg::PgSurvivalLedgerRepository;

#[cfg(feature = "postgres")]
mod pg {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PgSurvivalLedgerRepository {
        pool: PgPool,
    }

    impl PgSurvivalLedgerRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl SurvivalLedgerRepository for PgSurvivalLedgerRepository {
        async fn get(&self, workspace: WorkspaceId, agent_id: &str) -> Result<Option<AgentSurvivalLedger>, StoreError> {
            let row = sqlx::query(
                "SELECT * FROM agent_survival_ledger WHERE workspace_id = $1 AND agent_id = $2",
            )
            .bind(workspace.0)
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
            row.map(|r| {
                Ok(AgentSurvivalLedger {
                    workspace_id: WorkspaceId(r.try_get("workspace_id")?),
                    agent_id: r.try_get("agent_id")?,
                    consecutive_risky_days: r.try_get("consecutive_risky_days")?,
                    last_rollup_date: r.try_get("last_rollup_date")?,
                })
            })
            .transpose()
        }

        async fn save(&self, ledger: &AgentSurvivalLedger) -> Result<(), StoreError> {
            sqlx::query(
                r#"
                INSERT INTO agent_survival_ledger (workspace_id, agent_id, consecutive_risky_days, last_rollup_date)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (workspace_id, agent_id) DO UPDATE SET
                    consecutive_risky_days = EXCLUDED.consecutive_risky_days,
                    last_rollup_date = EXCLUDED.last_rollup_date
                WHERE agent_survival_ledger.last_rollup_date < EXCLUDED.last_rollup_date
                "#,
            )
            .bind(ledger.workspace_id.0)
            .bind(&ledger.agent_id)
            .bind(ledger.consecutive_risky_days)
            .bind(ledger.last_rollup_date)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }
}
