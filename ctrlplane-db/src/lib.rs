//! Database lifecycle management: running migrations and reporting
//! migration status for operators.

use sqlx::{PgPool, Row};
use tracing::{info, warn};

/// Result type for DB operations.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Run all pending migrations. Idempotent: safe to run multiple times.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("running database migrations");
    sqlx::migrate!("../migrations").run(pool).await?;
    info!("migrations completed");
    Ok(())
}

/// Checks database connectivity and prints the most recently applied
/// migrations.
pub async fn status(pool: &PgPool) -> Result<()> {
    let result: i64 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;
    if result != 1 {
        return Err(anyhow::anyhow!("database connectivity check failed"));
    }
    info!("database connectivity: OK");

    let rows = sqlx::query(
        r#"
        SELECT version, description, installed_on, success
        FROM _sqlx_migrations
        ORDER BY version DESC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await;

    match rows {
        Ok(migs) if !migs.is_empty() => {
            info!("latest migrations:");
            for mig in migs {
                let version: i64 = mig.get("version");
                let description: String = mig.get("description");
                let installed_on: chrono::DateTime<chrono::Utc> = mig.get("installed_on");
                let success: bool = mig.get("success");
                let mark = if success { "ok" } else { "FAILED" };
                info!("  [{}] v{}: {} ({})", mark, version, description, installed_on);
            }
        }
        Ok(_) => warn!("no migrations recorded yet (run `migrate` first)"),
        Err(e) => {
            if e.to_string().contains("_sqlx_migrations") {
                warn!("migration table not found (run `migrate` first)");
            } else {
                return Err(e.into());
            }
        }
    }
    Ok(())
}
