//! Work-item lease coordination: claim, heartbeat, release, and the
//! implicit preempt-on-expiry path (§4.3).

#![warn(clippy::all)]

pub mod coordinator;
pub mod error;

pub use coordinator::{claim, heartbeat, release, ClaimOutcome, ClaimedLease, ReleaseOutcome};
pub use error::LeaseError;
