//! Domain-level error kinds.
//!
//! Pure validation failures only — no I/O, no sqlx. Each downstream
//! crate (eventlog, leases, policy, projector) defines its own
//! `thiserror` enum and wraps `DomainError` where a domain rule was
//! violated inside a larger operation.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown stream type: {0}")]
    UnknownStreamType(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}
