//! Migration types.

use std::fmt;

use chrono::{DateTime, Utc};
use convert_case::{Case, Casing};
use serde::{Deserialize, Serialize};
use stratum_schema::{ModelHash, NormalizedModel, hash_model};

use crate::diff::{DiffStep, diff};
use crate::error::{MigrateResult, MigrationError};
use crate::sql::{MigrationSql, PostgresSqlGenerator, checksum, split_script, split_statements};

/// What a migration changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationKind {
    /// Generated from a model diff.
    Schema,
    /// Hand-authored data backfill; does not change the model.
    Data,
    /// Hand-authored SQL; does not change the model.
    Custom,
}

impl MigrationKind {
    /// Get the kind name as stored in the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Data => "data",
            Self::Custom => "custom",
        }
    }

    /// Parse a ledger kind name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "schema" => Some(Self::Schema),
            "data" => Some(Self::Data),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A database migration.
///
/// Once recorded in the ledger a migration is immutable history; changes are
/// made by new migrations.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    /// Position in the migration sequence, starting at 1.
    pub sequence: u32,
    /// Snake-case name.
    pub name: String,
    /// Migration kind.
    pub kind: MigrationKind,
    /// Model hash the database must be at before applying.
    pub from_model_hash: ModelHash,
    /// Model hash after applying.
    pub to_model_hash: ModelHash,
    /// Steps the SQL was rendered from (empty for data/custom migrations).
    pub steps: Vec<DiffStep>,
    /// SQL to apply the migration (up).
    pub up_sql: String,
    /// SQL to reverse the migration (down).
    pub down_sql: String,
    /// Whether `down_sql` fully reverses `up_sql`.
    pub reversible: bool,
    /// Recorded checksum of `up_sql`.
    pub checksum: String,
    /// When the migration was created.
    pub created_at: DateTime<Utc>,
    /// When the migration was applied, if known.
    pub applied_at: Option<DateTime<Utc>>,
}

impl Migration {
    /// Build a schema migration from already rendered steps.
    pub fn from_steps(
        sequence: u32,
        name: impl AsRef<str>,
        from_model_hash: ModelHash,
        to_model_hash: ModelHash,
        steps: Vec<DiffStep>,
        sql: MigrationSql,
    ) -> Self {
        let checksum = sql.checksum();
        Self {
            sequence,
            name: normalize_name(name.as_ref()),
            kind: MigrationKind::Schema,
            from_model_hash,
            to_model_hash,
            steps,
            up_sql: sql.up,
            down_sql: sql.down,
            reversible: sql.reversible,
            checksum,
            created_at: Utc::now(),
            applied_at: None,
        }
    }

    /// Diff two models and render a schema migration.
    ///
    /// Fails with [`MigrationError::NoChanges`] when the models are identical.
    pub fn schema(
        sequence: u32,
        name: impl AsRef<str>,
        from: &NormalizedModel,
        to: &NormalizedModel,
        generator: &PostgresSqlGenerator,
    ) -> MigrateResult<Self> {
        let steps = diff(from, to);
        if steps.is_empty() {
            return Err(MigrationError::NoChanges);
        }

        let from_hash = hash_model(from)?.hash;
        let to_hash = hash_model(to)?.hash;
        let sql = generator.generate(&steps);

        Ok(Self::from_steps(sequence, name, from_hash, to_hash, steps, sql))
    }

    /// A hand-authored data or custom migration.
    ///
    /// These do not change the model, so both hashes are the model hash the
    /// migration was written against.
    pub fn custom(
        sequence: u32,
        name: impl AsRef<str>,
        kind: MigrationKind,
        model_hash: ModelHash,
        up_sql: impl Into<String>,
        down_sql: Option<String>,
    ) -> Self {
        let sql = MigrationSql::custom(up_sql, down_sql);
        let checksum = sql.checksum();
        Self {
            sequence,
            name: normalize_name(name.as_ref()),
            kind,
            from_model_hash: model_hash.clone(),
            to_model_hash: model_hash,
            steps: Vec::new(),
            up_sql: sql.up,
            down_sql: sql.down,
            reversible: sql.reversible,
            checksum,
            created_at: Utc::now(),
            applied_at: None,
        }
    }

    /// Get the full migration id (`NNNN_name`), also its directory name.
    pub fn id(&self) -> String {
        format!("{:04}_{}", self.sequence, self.name)
    }

    /// Verify the recorded checksum matches the up script.
    pub fn verify_checksum(&self) -> bool {
        checksum(&self.up_sql) == self.checksum
    }

    /// Fail with [`MigrationError::ChecksumMismatch`] if the up script changed.
    pub fn ensure_checksum(&self) -> MigrateResult<()> {
        let actual = checksum(&self.up_sql);
        if actual != self.checksum {
            return Err(MigrationError::ChecksumMismatch {
                id: self.id(),
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Executable up statements.
    ///
    /// Generated schema SQL splits on blank lines; hand-written bodies split
    /// on `;` outside quotes and dollar-quoted blocks.
    pub fn up_statements(&self) -> Vec<String> {
        match self.kind {
            MigrationKind::Schema => split_statements(&self.up_sql),
            MigrationKind::Data | MigrationKind::Custom => split_script(&self.up_sql),
        }
    }

    /// Steps that can lose data.
    pub fn destructive_steps(&self) -> impl Iterator<Item = &DiffStep> {
        self.steps.iter().filter(|s| s.is_destructive())
    }

    /// Whether any step can lose data.
    pub fn has_destructive_steps(&self) -> bool {
        self.destructive_steps().next().is_some()
    }

    /// Check if this migration has been applied.
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Normalize a migration name to snake_case.
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    let snake = cleaned.trim().to_case(Case::Snake);
    if snake.is_empty() {
        "migration".to_string()
    } else {
        snake
    }
}
