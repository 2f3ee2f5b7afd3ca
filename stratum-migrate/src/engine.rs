//! Migration engine: the operations behind `check`, `generate`, `apply`,
//! `status`, `history` and `trash`.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use stratum_schema::{ModelHash, NormalizedModel, StratumConfig, hash_model};
use tracing::{info, warn};

use crate::applier::{ApplyOptions, ApplyReport, MigrationApplier};
use crate::diff::{DiffStep, diff, summary};
use crate::error::{MigrateResult, MigrationError};
use crate::executor::SqlExecutor;
use crate::file::{MigrationFile, MigrationFileManager};
use crate::ledger::{LedgerRecord, LedgerStore};
use crate::migration::{Migration, MigrationKind};
use crate::snapshot::SnapshotManager;
use crate::sql::{PostgresSqlGenerator, checksum};
use crate::trash::{TrashEntry, TrashKind, TrashManager};

/// Configuration for the migration engine.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Path to the migrations directory.
    pub migrations_dir: PathBuf,
    /// Path to the trash directory.
    pub trash_dir: PathBuf,
    /// Days a trashed artifact stays restorable.
    pub retention_days: u32,
    /// Environment the ledger is scoped to.
    pub environment: String,
    /// `VARCHAR` length for string fields.
    pub string_length: u32,
    /// Whether to validate without executing.
    pub dry_run: bool,
    /// Whether destructive steps may run without snapshots.
    pub allow_destructive: bool,
    /// Whether to snapshot populated tables automatically.
    pub auto_snapshot: bool,
    /// Snapshot table prefix.
    pub snapshot_prefix: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("./migrations"),
            trash_dir: PathBuf::from("./.trash"),
            retention_days: crate::trash::DEFAULT_RETENTION_DAYS,
            environment: "development".to_string(),
            string_length: 255,
            dry_run: false,
            allow_destructive: false,
            auto_snapshot: false,
            snapshot_prefix: crate::snapshot::DEFAULT_SNAPSHOT_PREFIX.to_string(),
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a project configuration, applying `environment` overrides.
    pub fn from_config(config: &StratumConfig, environment: &str) -> Self {
        let config = config.clone().with_environment(environment);
        Self {
            migrations_dir: PathBuf::from(&config.migrations.directory),
            trash_dir: PathBuf::from(&config.migrations.trash_directory),
            retention_days: config.migrations.retention_days,
            environment: environment.to_string(),
            string_length: config.schema.string_length,
            dry_run: false,
            allow_destructive: config.migrations.allow_destructive,
            auto_snapshot: config.migrations.auto_snapshot,
            snapshot_prefix: config.migrations.snapshot_prefix,
        }
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the trash directory.
    pub fn trash_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trash_dir = dir.into();
        self
    }

    /// Set the trash retention period.
    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Set the environment.
    pub fn environment(mut self, env: impl Into<String>) -> Self {
        self.environment = env.into();
        self
    }

    /// Enable dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Allow destructive steps without snapshots.
    pub fn allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = allow;
        self
    }

    /// Snapshot populated tables automatically.
    pub fn auto_snapshot(mut self, auto: bool) -> Self {
        self.auto_snapshot = auto;
        self
    }

    /// Apply options derived from this configuration.
    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions::new()
            .dry_run(self.dry_run)
            .allow_destructive(self.allow_destructive)
            .auto_snapshot(self.auto_snapshot)
    }
}

/// Result of `check`.
#[derive(Debug, Clone)]
pub struct CheckReport {
    /// Latest hash recorded in the ledger (empty-model hash if none).
    pub current_hash: ModelHash,
    /// Hash of the declared model.
    pub target_hash: ModelHash,
    /// Steps from the last generated model to the declared one.
    pub steps: Vec<DiffStep>,
}

impl CheckReport {
    /// Whether the database matches the declared model.
    pub fn in_sync(&self) -> bool {
        self.current_hash == self.target_hash
    }

    /// Process exit code: 0 in sync, 1 on drift.
    pub fn exit_code(&self) -> i32 {
        if self.in_sync() { 0 } else { 1 }
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        if self.in_sync() {
            format!("In sync at {}", self.target_hash.short())
        } else {
            format!(
                "Drift: database at {}, model at {} ({})",
                self.current_hash.short(),
                self.target_hash.short(),
                summary(&self.steps)
            )
        }
    }
}

/// Result of applying every pending migration.
#[derive(Debug, Default)]
pub struct MigrationResult {
    /// Reports of migrations processed, in order.
    pub reports: Vec<ApplyReport>,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl MigrationResult {
    /// Ids of migrations that executed.
    pub fn applied(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| r.was_applied())
            .map(|r| r.migration.as_str())
            .collect()
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        let applied = self.applied().len();
        if applied == 0 {
            "No migrations applied".to_string()
        } else {
            format!("{applied} applied in {}ms", self.duration_ms)
        }
    }
}

/// Result of `status`.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Environment name.
    pub environment: String,
    /// Latest recorded model hash.
    pub current_hash: ModelHash,
    /// Applied migrations, oldest first.
    pub applied: Vec<LedgerRecord>,
    /// Ids of migrations on disk that are not yet applied.
    pub pending: Vec<String>,
}

/// A migration file whose contents no longer match a recorded checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumIssue {
    /// Migration id.
    pub migration_id: String,
    /// Recorded checksum (ledger or sidecar).
    pub expected: String,
    /// Checksum of the file on disk.
    pub actual: String,
}

/// The migration engine.
pub struct MigrationEngine<E, L> {
    config: MigrationConfig,
    files: MigrationFileManager,
    generator: PostgresSqlGenerator,
    ledger: Arc<L>,
    applier: MigrationApplier<E, L>,
    trash: TrashManager,
}

impl<E: SqlExecutor, L: LedgerStore> MigrationEngine<E, L> {
    /// Create a new migration engine.
    pub fn new(config: MigrationConfig, executor: Arc<E>, ledger: Arc<L>) -> Self {
        let snapshots =
            SnapshotManager::new(Arc::clone(&executor)).with_prefix(config.snapshot_prefix.clone());
        let applier = MigrationApplier::new(executor, Arc::clone(&ledger), config.environment.clone())
            .with_snapshots(snapshots);
        Self {
            files: MigrationFileManager::new(config.migrations_dir.clone()),
            generator: PostgresSqlGenerator::new().with_string_length(config.string_length),
            trash: TrashManager::new(config.trash_dir.clone())
                .with_retention_days(config.retention_days),
            ledger,
            applier,
            config,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Get the file manager.
    pub fn files(&self) -> &MigrationFileManager {
        &self.files
    }

    /// Get the applier.
    pub fn applier(&self) -> &MigrationApplier<E, L> {
        &self.applier
    }

    /// Get the snapshot manager.
    pub fn snapshots(&self) -> &SnapshotManager<E> {
        self.applier.snapshots()
    }

    /// Get the trash manager.
    pub fn trash(&self) -> &TrashManager {
        &self.trash
    }

    /// Create the ledger table and migrations directory.
    pub async fn initialize(&self) -> MigrateResult<()> {
        self.ledger.initialize().await?;
        self.files.ensure_dir().await
    }

    /// Compare the ledger against the declared model.
    pub async fn check(&self, model: &NormalizedModel) -> MigrateResult<CheckReport> {
        let target_hash = hash_model(model)?.hash;
        let current_hash = self
            .ledger
            .latest_hash(&self.config.environment)
            .await?
            .unwrap_or_else(ModelHash::empty);
        let from = self.files.latest_model().await?.unwrap_or_default();

        Ok(CheckReport {
            current_hash,
            target_hash,
            steps: diff(&from, model),
        })
    }

    /// Diff the declared model against the last generated one and write a
    /// new schema migration.
    ///
    /// The "from" model is the `model.json` stored with the most recent
    /// schema migration. Without one the empty model is used; earlier
    /// migrations are never replayed to reconstruct it.
    pub async fn generate(&self, model: &NormalizedModel, name: &str) -> MigrateResult<Migration> {
        let from = match self.files.latest_model().await? {
            Some(from) => from,
            None => {
                if !self.files.load_all().await?.is_empty() {
                    warn!("No stored model found; diffing against the empty model");
                }
                NormalizedModel::empty()
            }
        };

        let sequence = self.files.next_sequence().await?;
        let migration = Migration::schema(sequence, name, &from, model, &self.generator)?;
        self.files.write_migration(&migration, Some(model)).await?;

        info!(
            migration = %migration.id(),
            steps = %summary(&migration.steps),
            destructive = migration.has_destructive_steps(),
            "Generated migration"
        );
        Ok(migration)
    }

    /// Write a hand-authored data or custom migration.
    pub async fn generate_custom(
        &self,
        name: &str,
        kind: MigrationKind,
        up_sql: &str,
        down_sql: Option<String>,
    ) -> MigrateResult<Migration> {
        let files = self.files.load_all().await?;
        let model_hash = files
            .last()
            .map(|f| f.migration.to_model_hash.clone())
            .unwrap_or_else(ModelHash::empty);
        let sequence = files.last().map(|f| f.migration.sequence + 1).unwrap_or(1);

        let migration = Migration::custom(sequence, name, kind, model_hash, up_sql, down_sql);
        self.files.write_migration(&migration, None).await?;
        info!(migration = %migration.id(), kind = %kind, "Generated custom migration");
        Ok(migration)
    }

    /// Migrations on disk that the ledger has not recorded, in order.
    pub async fn pending(&self) -> MigrateResult<Vec<MigrationFile>> {
        let applied: HashSet<String> = self
            .ledger
            .history(&self.config.environment)
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();
        Ok(self
            .files
            .list_migrations()
            .await?
            .into_iter()
            .filter(|f| !applied.contains(&f.id()))
            .collect())
    }

    /// Apply every pending migration in order, stopping at the first failure.
    pub async fn apply_pending(&self) -> MigrateResult<MigrationResult> {
        self.apply_pending_with(self.config.apply_options()).await
    }

    /// Apply every pending migration with explicit options.
    pub async fn apply_pending_with(&self, options: ApplyOptions) -> MigrateResult<MigrationResult> {
        let start = Instant::now();
        let mut result = MigrationResult::default();

        let pending = self.pending().await?;
        if options.dry_run {
            result.reports = self
                .applier
                .preview(pending.iter().map(|f| &f.migration), options)
                .await?;
        } else {
            for file in &pending {
                let report = self.applier.apply(&file.migration, options).await?;
                result.reports.push(report);
            }
        }

        result.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(env = %self.config.environment, "{}", result.summary());
        Ok(result)
    }

    /// Ledger state and pending migrations.
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        let applied = self.history().await?;
        let current_hash = applied
            .last()
            .map(|r| r.to_model_hash.clone())
            .unwrap_or_else(ModelHash::empty);
        let pending = self.pending().await?.iter().map(MigrationFile::id).collect();

        Ok(StatusReport {
            environment: self.config.environment.clone(),
            current_hash,
            applied,
            pending,
        })
    }

    /// Applied migrations, oldest first.
    pub async fn history(&self) -> MigrateResult<Vec<LedgerRecord>> {
        self.ledger.history(&self.config.environment).await
    }

    /// Compare every migration file against its sidecar checksum and, for
    /// applied migrations, against the ledger.
    pub async fn verify_checksums(&self) -> MigrateResult<Vec<ChecksumIssue>> {
        let recorded: BTreeMap<String, String> = self
            .history()
            .await?
            .into_iter()
            .map(|r| (r.name, r.checksum))
            .collect();

        let mut issues = Vec::new();
        for file in self.files.load_all().await? {
            let id = file.id();
            let actual = checksum(&file.migration.up_sql);
            let expected = recorded
                .get(&id)
                .cloned()
                .unwrap_or_else(|| file.migration.checksum.clone());
            if actual != expected {
                warn!(migration = %id, "Checksum mismatch");
                issues.push(ChecksumIssue {
                    migration_id: id,
                    expected,
                    actual,
                });
            }
        }
        Ok(issues)
    }

    /// Move a pending migration's directory to the trash.
    ///
    /// Applied migrations are history and cannot be discarded.
    pub async fn discard_migration(&self, id: &str) -> MigrateResult<TrashEntry> {
        if self.ledger.is_applied(&self.config.environment, id).await? {
            return Err(MigrationError::migration_file(format!(
                "{id} is applied and cannot be discarded"
            )));
        }

        let file = self
            .files
            .load_all()
            .await?
            .into_iter()
            .find(|f| f.id() == id)
            .ok_or_else(|| MigrationError::migration_file(format!("no migration named {id}")))?;

        let metadata = BTreeMap::from([
            ("migration".to_string(), json!(id)),
            ("checksum".to_string(), json!(file.migration.checksum)),
            (
                "from_model_hash".to_string(),
                json!(file.migration.from_model_hash.as_str()),
            ),
            (
                "to_model_hash".to_string(),
                json!(file.migration.to_model_hash.as_str()),
            ),
        ]);
        self.trash
            .move_to_trash(&file.path, TrashKind::Migration, metadata)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::testing::MemoryDatabase;
    use stratum_schema::{EntityDefinition, EntityField, FieldType};

    fn todo_model() -> NormalizedModel {
        NormalizedModel::empty().with_entity(
            "Todo",
            EntityDefinition::new("todos")
                .with_field("id", EntityField::required(FieldType::Uuid).primary())
                .with_field("title", EntityField::required(FieldType::String)),
        )
    }

    fn engine(dir: &std::path::Path) -> (
        Arc<MemoryDatabase>,
        MigrationEngine<MemoryDatabase, InMemoryLedger>,
    ) {
        let db = Arc::new(MemoryDatabase::new());
        let config = MigrationConfig::new()
            .migrations_dir(dir.join("migrations"))
            .trash_dir(dir.join(".trash"))
            .environment("test");
        let engine = MigrationEngine::new(config, Arc::clone(&db), Arc::new(InMemoryLedger::new()));
        (db, engine)
    }

    #[test]
    fn test_config_from_project_config() {
        let project = StratumConfig::parse(
            r#"
            [migrations]
            directory = "./db/migrations"
            allow_destructive = false

            [environments.staging]
            allow_destructive = true
            "#,
        )
        .unwrap();

        let config = MigrationConfig::from_config(&project, "staging");
        assert_eq!(config.migrations_dir, PathBuf::from("./db/migrations"));
        assert!(config.allow_destructive);
        assert_eq!(config.environment, "staging");
        assert!(config.apply_options().allow_destructive);

        assert!(!MigrationConfig::from_config(&project, "production").allow_destructive);
    }

    #[tokio::test]
    async fn test_generate_apply_check() {
        let dir = tempfile::tempdir().unwrap();
        let (db, engine) = engine(dir.path());
        engine.initialize().await.unwrap();

        let check = engine.check(&todo_model()).await.unwrap();
        assert_eq!(check.exit_code(), 1);
        assert_eq!(check.steps.len(), 3);

        let migration = engine.generate(&todo_model(), "init").await.unwrap();
        assert_eq!(migration.id(), "0001_init");
        assert_eq!(engine.status().await.unwrap().pending, ["0001_init"]);

        let result = engine.apply_pending().await.unwrap();
        assert_eq!(result.applied(), ["0001_init"]);
        assert!(db.has_table("todos"));

        let check = engine.check(&todo_model()).await.unwrap();
        assert_eq!(check.exit_code(), 0);
        assert!(check.steps.is_empty());

        let status = engine.status().await.unwrap();
        assert!(status.pending.is_empty());
        assert_eq!(status.applied.len(), 1);
        assert_eq!(status.current_hash, check.target_hash);

        assert!(matches!(
            engine.generate(&todo_model(), "again").await.unwrap_err(),
            MigrationError::NoChanges
        ));
    }

    #[tokio::test]
    async fn test_second_migration_diffs_from_stored_model() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine(dir.path());
        engine.generate(&todo_model(), "init").await.unwrap();

        let next = NormalizedModel::empty().with_entity(
            "Todo",
            EntityDefinition::new("todos")
                .with_field("id", EntityField::required(FieldType::Uuid).primary())
                .with_field("title", EntityField::required(FieldType::String))
                .with_field("done", EntityField::optional(FieldType::Boolean)),
        );
        let migration = engine.generate(&next, "add_done").await.unwrap();

        assert_eq!(migration.sequence, 2);
        assert_eq!(migration.steps.len(), 1);
        assert_eq!(migration.from_model_hash, hash_model(&todo_model()).unwrap().hash);

        let result = engine.apply_pending().await.unwrap();
        assert_eq!(result.applied(), ["0001_init", "0002_add_done"]);
    }

    #[tokio::test]
    async fn test_custom_migration_follows_schema() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine(dir.path());
        engine.generate(&todo_model(), "init").await.unwrap();
        let custom = engine
            .generate_custom(
                "seed_todos",
                MigrationKind::Data,
                "INSERT INTO \"todos\" (\"id\", \"title\") VALUES (gen_random_uuid(), 'first');",
                None,
            )
            .await
            .unwrap();
        assert_eq!(custom.id(), "0002_seed_todos");
        assert_eq!(custom.from_model_hash, hash_model(&todo_model()).unwrap().hash);

        let result = engine.apply_pending().await.unwrap();
        assert_eq!(result.applied().len(), 2);
        assert!(engine.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_verify_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine(dir.path());
        engine.generate(&todo_model(), "init").await.unwrap();
        assert!(engine.verify_checksums().await.unwrap().is_empty());

        let up = dir.path().join("migrations").join("0001_init").join("up.sql");
        tokio::fs::write(&up, "DROP TABLE \"todos\";").await.unwrap();

        let issues = engine.verify_checksums().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].migration_id, "0001_init");
        assert!(engine.apply_pending().await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_discard_pending_migration() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine(dir.path());
        let migration = engine.generate(&todo_model(), "init").await.unwrap();

        let entry = engine.discard_migration(&migration.id()).await.unwrap();
        assert_eq!(entry.kind, TrashKind::Migration);
        assert_eq!(entry.metadata["migration"], "0001_init");
        assert!(engine.files().load_all().await.unwrap().is_empty());

        engine.trash().restore(&entry.id).await.unwrap();
        assert_eq!(engine.files().load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_discard_applied_migration_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine(dir.path());
        let migration = engine.generate(&todo_model(), "init").await.unwrap();
        engine.apply_pending().await.unwrap();

        let err = engine.discard_migration(&migration.id()).await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidMigration(_)));
    }
}
