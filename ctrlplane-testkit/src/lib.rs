//! Test helpers for database-backed integration tests.
//!
//! Provides seeding helpers for workspaces, rooms/threads, runs, and
//! scorecards, on top of the real event-append write path.

mod helpers;

pub use helpers::{
    append_event, append_event_with, seed_passing_scorecard, seed_room_and_thread,
    seed_running_run, seed_workspace,
};

use anyhow::Result;
use sqlx::PgPool;

/// Runs every pending migration against a fresh test database.
pub async fn setup_test_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../migrations").run(pool).await?;
    Ok(())
}
