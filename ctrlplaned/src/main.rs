//! Control plane daemon
//!
//! Runtime orchestrator for the event log, leases, policy pipeline,
//! and HTTP/SSE surface.
//!
//! # Usage
//!
//! ```bash
//! # Start daemon with default configuration
//! ctrlplaned
//!
//! # Database migrations
//! ctrlplaned db migrate
//! ctrlplaned db status
//!
//! # Start with custom environment
//! CTRLPLANE_ENV=test CTRLPLANE_API_PORT=8081 ctrlplaned
//! ```
//!
//! # Environment Variables
//!
//! See `config.rs` for the full list (`DATABASE_URL`, `CTRLPLANE_ENV`,
//! `CTRLPLANE_API_HOST`/`CTRLPLANE_API_PORT`, `POLICY_ENFORCEMENT_MODE`,
//! the `CRON_*` and `HEALTH_*` knobs).

mod db;

use ctrlplaned::{Config, Daemon};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("ctrlplaned=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "db" {
        return db::run_db_command(args).await;
    }

    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        "control plane daemon"
    );

    let daemon = Daemon::connect(config).await?;
    daemon.run().await
}
