//! Repository traits (ports) and Postgres adapters for every piece of
//! durable state that isn't the event log itself: leases, capability
//! tokens, rate-limit buckets, the outbox and its dead-letter queue,
//! cron locks, sessions, and projection read models.
//!
//! Mirrors the trait-per-entity, `Pg*`-adapter-per-trait shape this
//! codebase has always used for storage, gated behind the `postgres`
//! feature so pure-domain crates can depend on the trait without
//! pulling in sqlx.

#![warn(clippy::all)]

mod capability;
mod cron_lock;
mod cron_watchdog;
mod dlq;
mod error;
mod lease;
mod outbox;
mod projections;
mod rate_limit;
mod session;
mod survival;

pub use capability::{CapabilityToken, CapabilityTokenRepository};
pub use cron_lock::{CronLock, CronLockRepository};
pub use cron_watchdog::{CronWatchdogRepository, CronWatchdogState};
pub use dlq::{DlqEntry, DlqRepository};
pub use error::StoreError;
pub use lease::{LeaseRepository, LeaseStatus, WorkItemLease};
pub use outbox::{OutboxEntry, OutboxRepository, OutboxStatus};
pub use projections::{
    AgentView, ApprovalView, ExperimentView, IncidentView, ProjectionReader, ProjectorWatermark, RunView,
    WorkspaceView,
};
pub use rate_limit::{RateLimitBucket, RateLimitRepository};
pub use session::{Session, SessionRepository};
pub use survival::{AgentSurvivalLedger, SurvivalLedgerRepository};

#[cfg(feature = "postgres")]
pub use capability::PgCapabilityTokenRepository;
#[cfg(feature = "postgres")]
pub use cron_lock::PgCronLockRepository;
#[cfg(feature = "postgres")]
pub use cron_watchdog::PgCronWatchdogRepository;
#[cfg(feature = "postgres")]
pub use dlq::PgDlqRepository;
#[cfg(feature = "postgres")]
pub use lease::PgLeaseRepository;
#[cfg(feature = "postgres")]
pub use outbox::PgOutboxRepository;
#[cfg(feature = "postgres")]
pub use projections::PgProjectionReader;
#[cfg(feature = "postgres")]
pub use rate_limit::PgRateLimitRepository;
#[cfg(feature = "postgres")]
pub use session::PgSessionRepository;
#[cfg(feature = "postgres")]
pub use survival::PgSurvivalLedgerRepository;
