//! Append-only event log: the sole gateway for all state change.
//!
//! Per `(stream_type, stream_id)`: strictly monotonic, gapless
//! `stream_seq`; a SHA-256 hash chain over the canonical event bytes;
//! uniqueness on `(workspace_id, idempotency_key)` where present.
//!
//! # Usage
//!
//! ```rust,no_run
//! use ctrlplane_eventlog::{append, EventDraft};
//!
//! # async fn example(pool: &sqlx::PgPool, draft: EventDraft) -> Result<(), Box<dyn std::error::Error>> {
//! let mut tx = pool.begin().await?;
//! let appended = append(&mut tx, draft).await?;
//! tx.commit().await?;
//! # let _ = appended;
//! # Ok(())
//! # }
//! ```

pub mod append;
pub mod hash;
pub mod idempotency;
pub mod query;
pub mod types;

pub use append::append;
pub use ctrlplane_domain::event::EventDraft;
pub use idempotency::canonicalize_idempotency_key;
pub use query::{read_stream, QueryOptions};
pub use types::{AppendOutcome, AppendedEvent, EventLogError, EventRow};
