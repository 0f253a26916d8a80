//! Daemon configuration, loaded from environment variables (§6).

use std::env;
use std::str::FromStr;

use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database_url: String,
    pub policy: PolicyConfig,
    pub automation: AutomationConfig,
    pub health: HealthConfig,
    pub environment: Environment,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub enforcement_mode: ctrlplane_policy::EnforcementMode,
    pub egress_max_requests_per_hour: i32,
    pub heartbeat_min_interval_sec: i64,
    pub rate_limit_streak_threshold: i32,
    pub rate_limit_incident_mute_sec: i64,
}

#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub promotion_loop_enabled: bool,
    pub cron_batch_limit: i64,
    pub cron_stale_run_after_sec: i64,
    pub cron_stale_approval_after_sec: i64,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub projection_lag_degraded_after_sec: i64,
    pub dlq_backlog_degraded_after: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Test,
    Development,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let environment = match env::var("CTRLPLANE_ENV").unwrap_or_else(|_| "development".to_string()).to_lowercase().as_str() {
            "test" => Environment::Test,
            "development" | "dev" => Environment::Development,
            "production" | "prod" => Environment::Production,
            other => anyhow::bail!("invalid CTRLPLANE_ENV: {other}"),
        };

        let database_url = env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?;

        let api = ApiConfig {
            host: env::var("CTRLPLANE_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env("CTRLPLANE_API_PORT", 8080)?,
        };

        let policy = PolicyConfig {
            enforcement_mode: ctrlplane_policy::EnforcementMode::read_from_env(),
            egress_max_requests_per_hour: parse_env("EGRESS_MAX_REQUESTS_PER_HOUR", 100)?,
            heartbeat_min_interval_sec: parse_env("HEARTBEAT_MIN_INTERVAL_SEC", 5)?,
            rate_limit_streak_threshold: parse_env("RATE_LIMIT_STREAK_THRESHOLD", 3)?,
            rate_limit_incident_mute_sec: parse_env("RATE_LIMIT_INCIDENT_MUTE_SEC", 600)?,
        };

        let automation = AutomationConfig {
            promotion_loop_enabled: parse_env::<String>("PROMOTION_LOOP_ENABLED", "true".to_string())? == "true",
            cron_batch_limit: parse_env("CRON_BATCH_LIMIT", 100)?,
            cron_stale_run_after_sec: parse_env("CRON_STALE_RUN_AFTER_SEC", 3600)?,
            cron_stale_approval_after_sec: parse_env("CRON_STALE_APPROVAL_AFTER_SEC", 86_400)?,
        };

        let health = HealthConfig {
            projection_lag_degraded_after_sec: parse_env("HEALTH_PROJECTION_LAG_DEGRADED_AFTER_SEC", 60)?,
            dlq_backlog_degraded_after: parse_env("HEALTH_DLQ_BACKLOG_DEGRADED_AFTER", 1)?,
        };

        Ok(Self { api, database_url, policy, automation, health, environment })
    }

    /// Configuration for integration tests: no real `DATABASE_URL`
    /// requirement, ephemeral port, enforce mode on.
    pub fn test(database_url: impl Into<String>) -> Self {
        Self {
            api: ApiConfig { host: "127.0.0.1".to_string(), port: 0 },
            database_url: database_url.into(),
            policy: PolicyConfig {
                enforcement_mode: ctrlplane_policy::EnforcementMode::Enforce,
                egress_max_requests_per_hour: 100,
                heartbeat_min_interval_sec: 5,
                rate_limit_streak_threshold: 3,
                rate_limit_incident_mute_sec: 600,
            },
            automation: AutomationConfig {
                promotion_loop_enabled: true,
                cron_batch_limit: 100,
                cron_stale_run_after_sec: 3600,
                cron_stale_approval_after_sec: 86_400,
            },
            health: HealthConfig { projection_lag_degraded_after_sec: 60, dlq_backlog_degraded_after: 1 },
            environment: Environment::Test,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ApiError>
where
    T: ToString,
{
    match env::var(key) {
        Ok(val) => val.parse::<T>().map_err(|_| ApiError::MissingRequiredField("invalid env var")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_uses_ephemeral_port() {
        let config = Config::test("postgres://localhost/test");
        assert_eq!(config.api.port, 0);
        assert_eq!(config.environment, Environment::Test);
    }
}
