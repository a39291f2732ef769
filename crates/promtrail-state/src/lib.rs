//! promtrail-state — storage layer for promtrail.
//!
//! Defines the [`Provider`] abstraction every background task writes
//! through, the domain types it persists, and [`StateStore`], a
//! [redb](https://docs.rs/redb)-backed provider usable on disk or in memory.
//!
//! # Architecture
//!
//! ```text
//! Provider (async trait, Arc<dyn Provider>)
//!   ├── insert()                         ← QueryIngester
//!   ├── upsert_metrics_catalog()         ← InventorySyncer
//!   ├── refresh_metrics_usage_summary()  ← InventorySyncer
//!   ├── upsert_metrics_job_index()       ← InventorySyncer workers
//!   ├── delete_queries_before()          ← RetentionWorker
//!   └── advisory_locks()                 → LeadershipCoordinator (optional)
//! ```
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and tolerates concurrent calls from every task.

pub mod error;
#[cfg(feature = "testing")]
pub mod memory;
pub mod provider;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
#[cfg(feature = "testing")]
pub use memory::MemoryProvider;
pub use provider::{AdvisoryLocks, LockSession, Provider};
pub use store::StateStore;
pub use types::*;
