//! Error types for the migration engine.

#![allow(unused_assignments)]

use miette::Diagnostic;
use stratum_schema::SchemaError;
use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error, Diagnostic)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(stratum::migrate::io))]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization error.
    #[error("JSON error: {0}")]
    #[diagnostic(code(stratum::migrate::json))]
    Json(#[from] serde_json::Error),

    /// Database operation error.
    #[error("Database error: {0}")]
    #[diagnostic(code(stratum::migrate::database))]
    Database(String),

    /// Entity model error.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    /// Invalid migration file or format.
    #[error("Invalid migration: {0}")]
    #[diagnostic(code(stratum::migrate::invalid_migration))]
    InvalidMigration(String),

    /// The ledger's latest hash is not the migration's starting point.
    #[error("Drift detected for migration '{migration}': expected database at {expected}, ledger records {actual}")]
    #[diagnostic(
        code(stratum::migrate::drift_mismatch),
        help("run `check --diff` to inspect the drift, then regenerate the migration against the current model")
    )]
    DriftMismatch {
        /// Migration name.
        migration: String,
        /// The migration's `from_model_hash`.
        expected: String,
        /// The latest recorded `to_model_hash`.
        actual: String,
    },

    /// A destructive step would run against a populated table without a snapshot.
    #[error("Destructive change blocked: {step} on table '{table}' ({rows} rows) has no snapshot")]
    #[diagnostic(
        code(stratum::migrate::destructive_change_blocked),
        help("create a snapshot of the table first, or use --allow-destructive after snapshotting")
    )]
    DestructiveChangeBlocked {
        /// Affected table.
        table: String,
        /// Step description.
        step: String,
        /// Rows currently in the table.
        rows: u64,
    },

    /// A statement failed during apply; the transaction was rolled back.
    #[error("Transaction failed while applying '{migration}': {message}")]
    #[diagnostic(
        code(stratum::migrate::transaction_failure),
        help("nothing was committed; fix the failing statement and apply again")
    )]
    TransactionFailure {
        /// Migration name.
        migration: String,
        /// Underlying failure.
        message: String,
    },

    /// Migration checksum mismatch.
    #[error("Checksum mismatch for migration '{id}': expected {expected}, got {actual}")]
    #[diagnostic(
        code(stratum::migrate::checksum_mismatch),
        help("a stored migration was edited after generation; restore the original file or generate a new migration")
    )]
    ChecksumMismatch {
        /// Migration ID.
        id: String,
        /// Expected checksum.
        expected: String,
        /// Actual checksum.
        actual: String,
    },

    /// Trash entry exists but its retention period has passed.
    #[error("Trash entry '{id}' expired at {expired_at}")]
    #[diagnostic(
        code(stratum::migrate::trash_entry_expired),
        help("expired entries cannot be restored; run `trash cleanup` to remove them")
    )]
    TrashEntryExpired {
        /// Entry id.
        id: String,
        /// Expiration time (RFC 3339).
        expired_at: String,
    },

    /// Trash entry does not exist.
    #[error("Trash entry '{0}' not found")]
    #[diagnostic(
        code(stratum::migrate::trash_entry_not_found),
        help("run `trash list` to see available entries")
    )]
    TrashEntryNotFound(String),

    /// A plugin migration version is not valid semver.
    #[error("Invalid semantic version '{version}' for plugin '{plugin}'")]
    #[diagnostic(
        code(stratum::migrate::invalid_semver),
        help("plugin versions must look like MAJOR.MINOR.PATCH, e.g. 1.2.0")
    )]
    InvalidSemver {
        /// Plugin name.
        plugin: String,
        /// The offending version string.
        version: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire migration lock: {0}")]
    #[diagnostic(
        code(stratum::migrate::lock_failed),
        help("another process is applying migrations; wait for it to finish and retry")
    )]
    LockFailed(String),

    /// No changes to migrate.
    #[error("No schema changes detected")]
    #[diagnostic(
        code(stratum::migrate::no_changes),
        help("the model already matches the latest migration")
    )]
    NoChanges,

    /// Rollback not possible.
    #[error("Cannot rollback: {0}")]
    #[diagnostic(code(stratum::migrate::rollback_failed))]
    RollbackFailed(String),

    /// Snapshot does not exist.
    #[error("Snapshot '{0}' not found")]
    #[diagnostic(
        code(stratum::migrate::snapshot_not_found),
        help("run `restore --list` to see available snapshots")
    )]
    SnapshotNotFound(String),
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a lock failed error.
    pub fn lock_failed(msg: impl Into<String>) -> Self {
        Self::LockFailed(msg.into())
    }

    /// Create a migration file error.
    pub fn migration_file(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Create a transaction failure for `migration`.
    pub fn transaction(migration: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransactionFailure {
            migration: migration.into(),
            message: message.into(),
        }
    }

    /// Stable snake_case name of the error category.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Database(_) => "database",
            Self::Schema(_) => "schema",
            Self::InvalidMigration(_) => "invalid_migration",
            Self::DriftMismatch { .. } => "drift_mismatch",
            Self::DestructiveChangeBlocked { .. } => "destructive_change_blocked",
            Self::TransactionFailure { .. } => "transaction_failure",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::TrashEntryExpired { .. } => "trash_entry_expired",
            Self::TrashEntryNotFound(_) => "trash_entry_not_found",
            Self::InvalidSemver { .. } => "invalid_semver",
            Self::LockFailed(_) => "lock_failed",
            Self::NoChanges => "no_changes",
            Self::RollbackFailed(_) => "rollback_failed",
            Self::SnapshotNotFound(_) => "snapshot_not_found",
        }
    }

    /// A concrete next step for the operator.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Io(_) => "check that the migrations and trash directories exist and are writable",
            Self::Json(_) => "a migration.json or trash metadata file is corrupt; restore it from version control",
            Self::Database(_) => "check the database connection and permissions",
            Self::Schema(_) => "fix the entity declaration named in the error and run `check` again",
            Self::InvalidMigration(_) => "inspect the migration directory; each needs up.sql, down.sql and migration.json",
            Self::DriftMismatch { .. } => "run `check --diff`, then `generate` a migration from the current state",
            Self::DestructiveChangeBlocked { .. } => "use --allow-destructive after snapshotting the affected table",
            Self::TransactionFailure { .. } => "nothing was committed; fix the failing statement and apply again",
            Self::ChecksumMismatch { .. } => "restore the original migration file; applied migrations must never be edited",
            Self::TrashEntryExpired { .. } => "run `trash cleanup` to remove expired entries",
            Self::TrashEntryNotFound(_) => "run `trash list` to see available entries",
            Self::InvalidSemver { .. } => "rename the plugin migration to a MAJOR.MINOR.PATCH version",
            Self::LockFailed(_) => "wait for the in-flight apply to finish and retry",
            Self::NoChanges => "nothing to do; the model matches the latest migration",
            Self::RollbackFailed(_) => "write the missing down script or restore from a snapshot",
            Self::SnapshotNotFound(_) => "run `restore --list` to see available snapshots",
        }
    }

    /// Whether the error signals tampering and must stop all further work.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }

    /// Check if this is a recoverable error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LockFailed(_)
                | Self::NoChanges
                | Self::DriftMismatch { .. }
                | Self::DestructiveChangeBlocked { .. }
                | Self::TrashEntryExpired { .. }
                | Self::TrashEntryNotFound(_)
                | Self::InvalidSemver { .. }
        )
    }
}
