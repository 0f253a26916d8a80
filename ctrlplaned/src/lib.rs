//! Control plane daemon
//!
//! Runtime orchestrator for the event-sourced control plane: the HTTP
//! surface, the auth/workspace gate, stream fanout, and the background
//! automation loop all sit on one shared [`daemon::AppState`].
//!
//! # Architecture
//!
//! ```text
//! Auth gate → Policy pipeline → Lease coordinator → Event log → Projections
//!                                                        ↓
//!                                                     Outbox → Automation loop
//! ```
//!
//! # Components
//!
//! - **Daemon**: main runtime orchestrator, owns the background tasks
//! - **API**: HTTP surface over the event log, leases, and policy pipeline
//! - **Auth**: bearer-session and legacy-header workspace gate
//! - **Session**: bearer token issuance and hashing
//! - **SSE**: long-poll stream fanout for `/v1/streams/...`
//! - **Config**: environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use ctrlplaned::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let daemon = Daemon::connect(config).await?;
//!     daemon.run().await
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod auth;
pub mod config;
pub mod daemon;
pub mod error;
pub mod session;
pub mod sse;

pub use config::{ApiConfig, AutomationConfig, Config, Environment, HealthConfig, PolicyConfig};
pub use daemon::{AppState, Daemon};
pub use error::{ApiError, ApiResult};
