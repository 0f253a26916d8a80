//! Automation loop: the background processes that react to events
//! after they've been appended and projected, rather than deciding
//! anything synchronously inside a request.
//!
//! # Components
//!
//! - **Outbox worker**: drains the transactional outbox, dispatching
//!   each entry to its handler and dead-lettering it after repeated
//!   failure.
//! - **Promotion**: turns a passing scorecard into the next step for
//!   its run — agent approval, human escalation, or an overflow
//!   incident.
//! - **Lifecycle**: the daily survival rollup that drives an agent
//!   between active, probation, and sunset.
//! - **Cron watchdog**: scans for runs and approvals automation left
//!   stranded, fenced by a lock and a consecutive-failure halt.

#![warn(clippy::all)]

mod cron;
mod error;
mod handlers;
mod lifecycle;
mod outbox_worker;

pub use cron::CronWatchdog;
pub use error::{AutomationError, AutomationResult};
pub use lifecycle::{apply_daily_rollup, transition, AgentLifecycleState, SurvivalRollup};
pub use outbox_worker::OutboxWorker;
