//! # stratum-migrate
//!
//! Migration engine for Stratum.
//!
//! This crate provides functionality for:
//! - Diffing two normalized models into ordered, typed steps
//! - PostgreSQL SQL generation with up/down scripts and checksums
//! - Migration file management on the filesystem
//! - A ledger of applied migrations per environment
//! - Guarded, transactional apply (drift check, destructive-change guard,
//!   advisory lock, idempotent re-apply)
//! - Table snapshots, a trash bin for discarded artifacts, and semver-keyed
//!   plugin migrations
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────┐
//! │ Model (new)  │────▶│  Diff Engine   │────▶│  SQL Gen    │
//! └──────────────┘     └────────────────┘     └─────────────┘
//!        ▲                                           │
//! ┌──────────────┐                                   ▼
//! │ model.json   │                            ┌─────────────┐
//! │ (last gen.)  │                            │ migrations/ │
//! └──────────────┘                            └─────────────┘
//!                                                    │
//!                      ┌────────────────┐            ▼
//!                      │   Snapshots    │◀──── ┌─────────────┐
//!                      └────────────────┘      │   Applier   │
//!                                              └─────────────┘
//!                                                    │
//!                                                    ▼
//!                                             ┌─────────────┐
//!                                             │   Ledger    │
//!                                             └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stratum_migrate::{MigrationConfig, MigrationEngine, SqlLedgerStore};
//!
//! async fn run(executor: Arc<MyPgExecutor>, model: &stratum_schema::NormalizedModel)
//!     -> stratum_migrate::MigrateResult<()>
//! {
//!     let config = MigrationConfig::new().migrations_dir("./migrations");
//!     let ledger = Arc::new(SqlLedgerStore::new(Arc::clone(&executor)));
//!     let engine = MigrationEngine::new(config, executor, ledger);
//!
//!     engine.initialize().await?;
//!     engine.generate(model, "add_posts").await?;
//!
//!     let result = engine.apply_pending().await?;
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Migration Files
//!
//! ```text
//! migrations/
//! ├── 0001_init/
//! │   ├── up.sql
//! │   ├── down.sql
//! │   ├── migration.json
//! │   └── model.json
//! └── 0002_add_posts/
//!     └── ...
//! ```

pub mod applier;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod file;
pub mod ledger;
pub mod migration;
pub mod plugin;
pub mod snapshot;
pub mod sql;
pub mod trash;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports
pub use applier::{ApplyOptions, ApplyOutcome, ApplyReport, ApplyState, MigrationApplier};
pub use diff::{DiffStep, ModelDiff, ModelDiffer, apply_steps, diff, is_narrowing, summary};
pub use engine::{
    CheckReport, ChecksumIssue, MigrationConfig, MigrationEngine, MigrationResult, StatusReport,
};
pub use error::{MigrateResult, MigrationError};
pub use executor::{Row, SqlExecutor, count_rows};
pub use file::{MigrationFile, MigrationFileManager, MigrationMeta};
pub use ledger::{InMemoryLedger, LedgerRecord, LedgerStore, MigrationLock, SqlLedgerStore};
pub use migration::{Migration, MigrationKind};
pub use plugin::{
    InMemoryPluginLedger, PluginLedgerStore, PluginMigration, PluginMigrationTracker,
    PluginRecord, SqlPluginLedgerStore,
};
pub use snapshot::{Snapshot, SnapshotManager};
pub use sql::{
    MANUAL_INTERVENTION, MigrationSql, PostgresSqlGenerator, split_script, split_statements,
};
pub use trash::{TrashEntry, TrashKind, TrashManager};
