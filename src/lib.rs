//! # Stratum
//!
//! Declare entities, get a canonical content-addressed model, and move a
//! PostgreSQL database between model versions with guarded, transactional
//! migrations.
//!
//! Stratum provides:
//! - A compact field shorthand (`string! unique`, `User!`, `Tag[] through:post_tags`)
//! - Normalization into a canonical model with a SHA-256 model hash
//! - Model diffing into ordered steps and PostgreSQL up/down scripts
//! - A per-environment ledger with drift detection and destructive-change guards
//! - Table snapshots, a trash bin with retention, and plugin migrations keyed by semver
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stratum::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let raw = RawModel::from_json(&std::fs::read_to_string("entities.json")?)?;
//!     let model = normalize(&raw)?;
//!
//!     let executor = Arc::new(MyPgExecutor::connect("postgresql://localhost/app").await?);
//!     let ledger = Arc::new(SqlLedgerStore::new(Arc::clone(&executor)));
//!     let config = MigrationConfig::from_config(&StratumConfig::from_file("stratum.toml")?, "development");
//!     let engine = MigrationEngine::new(config, executor, ledger);
//!
//!     engine.initialize().await?;
//!     if !engine.check(&model).await?.in_sync() {
//!         engine.generate(&model, "sync").await?;
//!     }
//!     println!("{}", engine.apply_pending().await?.summary());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Entity declarations, normalization and model hashing.
pub mod schema {
    pub use stratum_schema::*;
}

/// Diffing, SQL generation and guarded apply.
pub mod migrate {
    pub use stratum_migrate::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        ApplyOptions, DiffStep, InMemoryLedger, LedgerStore, MigrateResult, Migration,
        MigrationConfig, MigrationEngine, MigrationError, SqlExecutor, SqlLedgerStore, diff,
    };
    pub use crate::schema::{
        NormalizedModel, RawModel, SchemaError, StratumConfig, hash_model, normalize,
    };
}

// Re-export key types at the crate root
pub use migrate::{MigrationEngine, MigrationError};
pub use schema::{NormalizedModel, SchemaError};
