//! promtraild — the promtrail daemon.
//!
//! Assembles every promtrail subsystem into one process:
//! - State store (redb)
//! - Query ingester behind the capture API
//! - Inventory syncer against a Prometheus-compatible upstream
//! - Retention worker
//! - Leadership gating for the periodic loops
//! - REST API + Prometheus exposition

pub mod api;
pub mod config;
pub mod daemon;

pub use api::{AppState, build_router};
pub use config::DaemonConfig;
