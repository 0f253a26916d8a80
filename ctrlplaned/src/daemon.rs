//! Daemon: main runtime orchestrator.
//!
//! Ties together the durable adapters, the policy pipeline, and the
//! automation loop behind one shared [`AppState`], then serves the
//! HTTP surface over it.
//!
//! # Lifecycle
//!
//! 1. Load configuration, connect the pool
//! 2. Build the shared state (repositories, policy pipeline, health checker)
//! 3. Spawn the automation loop: outbox drain, cron watchdog, daily lifecycle rollup
//! 4. Start the API server
//! 5. Main loop: wait for a shutdown signal
//! 6. Graceful shutdown: stop accepting new background ticks, let the server drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ctrlplane_automation::{apply_daily_rollup, CronWatchdog, OutboxWorker, SurvivalRollup};
use ctrlplane_domain::ids::WorkspaceId;
use ctrlplane_health::{HealthCache, HealthChecker};
use ctrlplane_policy::{EnvKillSwitches, PolicyPipeline};
use ctrlplane_store::{
    CapabilityTokenRepository, CronLockRepository, CronWatchdogRepository, DlqRepository,
    OutboxRepository, PgCapabilityTokenRepository, PgCronLockRepository,
    PgCronWatchdogRepository, PgDlqRepository, PgOutboxRepository, PgProjectionReader,
    PgRateLimitRepository, PgSessionRepository, PgSurvivalLedgerRepository, ProjectionReader,
    RateLimitRepository, SessionRepository, SurvivalLedgerRepository,
};
use sqlx::{PgPool, Row};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::create_router;
use crate::config::Config;
use crate::error::ApiResult;

/// State shared by every HTTP handler and every background task.
pub struct AppState {
    pub pool: PgPool,
    pub sessions: Arc<dyn SessionRepository>,
    pub tokens: Arc<dyn CapabilityTokenRepository>,
    pub projections: Arc<dyn ProjectionReader>,
    pub policy: PolicyPipeline,
    pub health_cache: Arc<HealthCache>,
    pub heartbeat_min_interval_sec: i64,
}

impl AppState {
    fn new(config: &Config, pool: PgPool) -> Self {
        let tokens: Arc<dyn CapabilityTokenRepository> = Arc::new(PgCapabilityTokenRepository::new(pool.clone()));
        let quota: Arc<dyn RateLimitRepository> = Arc::new(PgRateLimitRepository::new(pool.clone()));
        let projections: Arc<dyn ProjectionReader> = Arc::new(PgProjectionReader::new(pool.clone()));

        let policy = PolicyPipeline::new(
            pool.clone(),
            projections.clone(),
            tokens.clone(),
            quota,
            Arc::new(EnvKillSwitches),
            Arc::new(arc_swap::ArcSwap::from_pointee(config.policy.enforcement_mode)),
            config.policy.egress_max_requests_per_hour,
            config.policy.rate_limit_streak_threshold,
            config.policy.rate_limit_incident_mute_sec,
        );

        Self {
            sessions: Arc::new(PgSessionRepository::new(pool.clone())),
            tokens,
            projections,
            policy,
            health_cache: Arc::new(HealthCache::default()),
            heartbeat_min_interval_sec: config.policy.heartbeat_min_interval_sec,
            pool,
        }
    }
}

pub struct Daemon {
    config: Config,
    state: Arc<AppState>,
    background: Vec<JoinHandle<()>>,
}

impl Daemon {
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let pool = PgPool::connect(&config.database_url).await?;
        let state = Arc::new(AppState::new(&config, pool));
        Ok(Self { config, state, background: Vec::new() })
    }

    /// Run the daemon. Blocks until a shutdown signal arrives.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            "starting control plane daemon"
        );

        self.spawn_automation_loop();

        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server listening");

        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");

        self.shutdown().await;
        Ok(())
    }

    fn spawn_automation_loop(&mut self) {
        let outbox: Arc<dyn OutboxRepository> = Arc::new(PgOutboxRepository::new(self.state.pool.clone()));
        let dlq: Arc<dyn DlqRepository> = Arc::new(PgDlqRepository::new(self.state.pool.clone()));
        let worker = OutboxWorker::new(self.state.pool.clone(), outbox, dlq, self.state.projections.clone());
        let pool = self.state.pool.clone();
        let cron_batch_limit = self.config.automation.cron_batch_limit;
        self.background.push(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(Duration::from_secs(2));
            loop {
                ticks.tick().await;
                for workspace in active_workspaces(&pool).await {
                    if let Err(e) = worker.drain_once(workspace, cron_batch_limit).await {
                        warn!(error = %e, %workspace, "outbox drain failed");
                    }
                }
            }
        }));

        let locks: Arc<dyn CronLockRepository> = Arc::new(PgCronLockRepository::new(self.state.pool.clone()));
        let watchdog_repo: Arc<dyn CronWatchdogRepository> = Arc::new(PgCronWatchdogRepository::new(self.state.pool.clone()));
        let watchdog = CronWatchdog::new(
            self.state.pool.clone(),
            locks,
            watchdog_repo,
            self.state.projections.clone(),
            format!("ctrlplaned-{}", std::process::id()),
        );
        let pool = self.state.pool.clone();
        let stale_run_after = chrono::Duration::seconds(self.config.automation.cron_stale_run_after_sec);
        let stale_approval_after = chrono::Duration::seconds(self.config.automation.cron_stale_approval_after_sec);
        let cron_batch_limit = self.config.automation.cron_batch_limit;
        self.background.push(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticks.tick().await;
                for workspace in active_workspaces(&pool).await {
                    if let Err(e) = watchdog.scan_stale_runs(workspace, stale_run_after, cron_batch_limit).await {
                        warn!(error = %e, %workspace, "stale run scan failed");
                    }
                    if let Err(e) = watchdog.scan_stale_approvals(workspace, stale_approval_after, cron_batch_limit).await {
                        warn!(error = %e, %workspace, "stale approval scan failed");
                    }
                }
            }
        }));

        if self.config.automation.promotion_loop_enabled {
            let ledger: Arc<dyn SurvivalLedgerRepository> = Arc::new(PgSurvivalLedgerRepository::new(self.state.pool.clone()));
            let projections = self.state.projections.clone();
            let pool = self.state.pool.clone();
            self.background.push(tokio::spawn(async move {
                let mut ticks = tokio::time::interval(Duration::from_secs(3600));
                loop {
                    ticks.tick().await;
                    let today = Utc::now().date_naive();
                    for workspace in active_workspaces(&pool).await {
                        for rollup in daily_rollups(&pool, workspace, today).await {
                            let mut conn = match pool.acquire().await {
                                Ok(conn) => conn,
                                Err(e) => {
                                    warn!(error = %e, "failed to acquire connection for lifecycle rollup");
                                    continue;
                                }
                            };
                            if let Err(e) = apply_daily_rollup(
                                &mut conn,
                                &projections,
                                &ledger,
                                workspace,
                                &rollup.agent_id,
                                today,
                                rollup.survival,
                            )
                            .await
                            {
                                warn!(error = %e, agent_id = %rollup.agent_id, "daily lifecycle rollup failed");
                            }
                        }
                    }
                }
            }));
        }
    }

    async fn start_api_server(&self) -> anyhow::Result<SocketAddr> {
        let router = create_router(self.state.clone());
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }

    async fn shutdown(self) {
        info!("stopping background tasks");
        for handle in self.background {
            handle.abort();
        }
        self.state.pool.close().await;
        info!("shutdown complete");
    }
}

/// Enumerates workspaces with at least one appended event. There is no
/// dedicated workspace roster table — the event log is the only place
/// a workspace's existence is recorded.
async fn active_workspaces(pool: &PgPool) -> Vec<WorkspaceId> {
    match sqlx::query_scalar::<_, uuid::Uuid>("SELECT DISTINCT workspace_id FROM evt_events")
        .fetch_all(pool)
        .await
    {
        Ok(ids) => ids.into_iter().map(WorkspaceId).collect(),
        Err(e) => {
            warn!(error = %e, "failed to list active workspaces");
            Vec::new()
        }
    }
}

struct AgentDailyRollup {
    agent_id: String,
    survival: SurvivalRollup,
}

/// Aggregates each agent's scorecards for `day` into a survival rollup.
/// There's no dedicated agent-per-run index, so this attributes a run's
/// scorecards to the agent named in that run's `run.queued` event.
/// Budget utilization isn't tracked anywhere yet, so it's left at 0.0 —
/// a real implementation would source it from the quota/egress tables.
async fn daily_rollups(pool: &PgPool, workspace: WorkspaceId, day: chrono::NaiveDate) -> Vec<AgentDailyRollup> {
    let rows = sqlx::query(
        r#"
        SELECT e.data->>'agent_id' AS agent_id,
               count(*) FILTER (WHERE s.passed) AS success_count,
               count(*) FILTER (WHERE NOT s.passed) AS fail_count
        FROM proj_scorecards s
        JOIN evt_events e
          ON e.workspace_id = s.workspace_id
         AND e.event_type = 'run.queued'
         AND e.entity_type = 'run'
         AND e.entity_id = s.run_id
        WHERE s.workspace_id = $1 AND s.created_at::date = $2
        GROUP BY 1
        "#,
    )
    .bind(workspace.0)
    .bind(day)
    .fetch_all(pool)
    .await;

    match rows {
        Ok(rows) => rows
            .into_iter()
            .filter_map(|row| {
                let agent_id: Option<String> = row.try_get("agent_id").ok()?;
                let agent_id = agent_id?;
                let success_count: i64 = row.try_get("success_count").ok()?;
                let fail_count: i64 = row.try_get("fail_count").ok()?;
                Some(AgentDailyRollup {
                    agent_id,
                    survival: SurvivalRollup { success_count, fail_count, learning_count: 0, budget_utilization: 0.0 },
                })
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, %workspace, "failed to aggregate daily rollups");
            Vec::new()
        }
    }
}

pub async fn health_report(state: &AppState, workspace: WorkspaceId) -> ApiResult<ctrlplane_health::HealthReport> {
    let checker = HealthChecker::new(state.pool.clone(), state.health_cache.clone());
    checker.report(workspace).await.map_err(|e| crate::error::ApiError::Internal(e.into()))
}
