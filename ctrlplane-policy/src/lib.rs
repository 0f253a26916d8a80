//! Decision pipeline for every agent-initiated mutation: quarantine,
//! kill switches, capability tokens, DAC labels, quota, and action
//! policy, with a mistake-counter learning loop (§4.4).

#![warn(clippy::all)]

pub mod error;
pub mod kill_switch;
pub mod mistake;
pub mod pipeline;
pub mod request;
pub mod secrets;

pub use error::PolicyError;
pub use kill_switch::{EnvKillSwitches, KillSwitchSource};
pub use pipeline::{EnforcementMode, PolicyPipeline};
pub use request::{ActionKind, DataAccessMode, Decision, DecisionRequest, Outcome, ResourceLabel};
