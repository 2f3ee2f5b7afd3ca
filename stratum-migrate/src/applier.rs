//! Migration applier.
//!
//! Applying a migration moves through
//! `Pending -> Validating -> Applying -> Applied`, or ends in `Failed` with
//! nothing persisted. The environment lock is held from before the ledger
//! read until the transaction commits or rolls back.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use stratum_schema::ModelHash;
use tracing::{debug, info, warn};

use crate::diff::DiffStep;
use crate::error::{MigrateResult, MigrationError};
use crate::executor::{SqlExecutor, count_rows};
use crate::ledger::{LedgerRecord, LedgerStore};
use crate::migration::{Migration, MigrationKind};
use crate::snapshot::{Snapshot, SnapshotManager};

/// Options for a single apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Validate only; execute nothing.
    pub dry_run: bool,
    /// Skip the destructive-change guard.
    pub allow_destructive: bool,
    /// Snapshot populated tables instead of blocking destructive steps.
    pub auto_snapshot: bool,
}

impl ApplyOptions {
    /// Default options: guarded, executing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Allow destructive steps without snapshots.
    pub fn allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = allow;
        self
    }

    /// Create missing snapshots automatically.
    pub fn auto_snapshot(mut self, auto: bool) -> Self {
        self.auto_snapshot = auto;
        self
    }
}

/// Applier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyState {
    /// Not started.
    Pending,
    /// Checking drift and destructive steps.
    Validating,
    /// Executing statements.
    Applying,
    /// Committed and recorded.
    Applied,
    /// Rolled back; nothing persisted.
    Failed,
}

/// How an apply ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Executed and recorded.
    Applied(LedgerRecord),
    /// The ledger already reflects this migration; nothing was done.
    AlreadyApplied,
    /// Validation passed; these statements would run.
    DryRun {
        /// Statements that would execute.
        statements: Vec<String>,
    },
}

/// Result of a successful apply.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    /// Migration id.
    pub migration: String,
    /// How the apply ended.
    pub outcome: ApplyOutcome,
    /// States visited, in order.
    pub transitions: Vec<ApplyState>,
    /// Snapshots taken by `auto_snapshot`.
    pub snapshots_created: Vec<Snapshot>,
    /// Wall time.
    pub duration_ms: u64,
}

impl ApplyReport {
    /// Final state.
    pub fn state(&self) -> ApplyState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(ApplyState::Pending)
    }

    /// Whether statements were executed.
    pub fn was_applied(&self) -> bool {
        matches!(self.outcome, ApplyOutcome::Applied(_))
    }
}

/// Applies migrations to one environment.
pub struct MigrationApplier<E, L> {
    executor: Arc<E>,
    ledger: Arc<L>,
    snapshots: SnapshotManager<E>,
    environment: String,
}

impl<E: SqlExecutor, L: LedgerStore> MigrationApplier<E, L> {
    /// Create an applier for `environment`.
    pub fn new(executor: Arc<E>, ledger: Arc<L>, environment: impl Into<String>) -> Self {
        Self {
            snapshots: SnapshotManager::new(Arc::clone(&executor)),
            executor,
            ledger,
            environment: environment.into(),
        }
    }

    /// Use a specific snapshot manager (e.g. with a custom prefix).
    pub fn with_snapshots(mut self, snapshots: SnapshotManager<E>) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// Environment name.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Get the snapshot manager.
    pub fn snapshots(&self) -> &SnapshotManager<E> {
        &self.snapshots
    }

    /// Apply one migration.
    pub async fn apply(
        &self,
        migration: &Migration,
        options: ApplyOptions,
    ) -> MigrateResult<ApplyReport> {
        // Tampered files stop everything.
        migration.ensure_checksum()?;

        if options.dry_run {
            let latest = self.latest_hash().await?;
            return self
                .preview_one(migration, options, &latest, &HashSet::new())
                .await;
        }

        let start = Instant::now();
        let id = migration.id();
        let mut transitions = vec![ApplyState::Pending];

        self.executor.begin().await?;
        let lock = match self.ledger.acquire_lock(&self.environment).await {
            Ok(lock) => lock,
            Err(e) => {
                self.rollback_quietly(&id).await;
                return Err(e);
            }
        };
        debug!(migration = %id, env = %self.environment, lock = lock.id(), "Acquired migration lock");

        let mut snapshots_created = Vec::new();
        let result = self
            .run(migration, options, &mut transitions, &mut snapshots_created)
            .await;

        let result = match result {
            Ok(outcome) => match self.executor.commit().await {
                Ok(()) => Ok(outcome),
                Err(e) => Err(MigrationError::transaction(&id, format!("commit failed: {e}"))),
            },
            Err(e) => Err(e),
        };

        let report = match result {
            Ok(outcome) => {
                if let ApplyOutcome::Applied(record) = &outcome {
                    info!(
                        migration = %id,
                        env = %self.environment,
                        to = record.to_model_hash.short(),
                        "Applied migration"
                    );
                }
                Ok(ApplyReport {
                    migration: id,
                    outcome,
                    transitions,
                    snapshots_created,
                    duration_ms: elapsed_ms(start),
                })
            }
            Err(e) => {
                self.rollback_quietly(&id).await;
                transitions.push(ApplyState::Failed);
                warn!(migration = %id, env = %self.environment, category = e.category(), error = %e, "Migration failed");
                Err(e)
            }
        };

        drop(lock);
        report
    }

    /// Validate `migrations` in order without executing or recording anything.
    ///
    /// Each migration is checked against the hash the previous one would
    /// leave behind, so a whole backlog can be previewed. Tables created
    /// earlier in the backlog do not exist yet and are not guarded.
    pub async fn preview<'a>(
        &self,
        migrations: impl IntoIterator<Item = &'a Migration>,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ApplyReport>> {
        let mut latest = self.latest_hash().await?;
        let mut fresh_tables = HashSet::new();
        let mut reports = Vec::new();

        for migration in migrations {
            migration.ensure_checksum()?;
            let report = self
                .preview_one(migration, options, &latest, &fresh_tables)
                .await?;
            if let ApplyOutcome::DryRun { .. } = report.outcome {
                latest = migration.to_model_hash.clone();
                fresh_tables.extend(migration.steps.iter().filter_map(|step| match step {
                    DiffStep::AddTable { table, .. } => Some(table.clone()),
                    _ => None,
                }));
            }
            reports.push(report);
        }
        Ok(reports)
    }

    async fn preview_one(
        &self,
        migration: &Migration,
        options: ApplyOptions,
        latest: &ModelHash,
        fresh_tables: &HashSet<String>,
    ) -> MigrateResult<ApplyReport> {
        let start = Instant::now();
        let id = migration.id();
        let mut transitions = vec![ApplyState::Pending, ApplyState::Validating];
        let mut snapshots_created = Vec::new();

        let outcome = match self
            .validate(migration, options, latest, fresh_tables, &mut snapshots_created)
            .await
        {
            Ok(true) => ApplyOutcome::AlreadyApplied,
            Ok(false) => ApplyOutcome::DryRun {
                statements: migration.up_statements(),
            },
            Err(e) => {
                transitions.push(ApplyState::Failed);
                debug!(migration = %id, ?transitions, "Dry run failed validation");
                return Err(e);
            }
        };

        Ok(ApplyReport {
            migration: id,
            outcome,
            transitions,
            snapshots_created,
            duration_ms: elapsed_ms(start),
        })
    }

    async fn latest_hash(&self) -> MigrateResult<ModelHash> {
        Ok(self
            .ledger
            .latest_hash(&self.environment)
            .await?
            .unwrap_or_else(ModelHash::empty))
    }

    async fn run(
        &self,
        migration: &Migration,
        options: ApplyOptions,
        transitions: &mut Vec<ApplyState>,
        snapshots_created: &mut Vec<Snapshot>,
    ) -> MigrateResult<ApplyOutcome> {
        let id = migration.id();
        transitions.push(ApplyState::Validating);

        let latest = self.latest_hash().await?;
        debug!(migration = %id, latest = latest.short(), "Read latest model hash");

        if self
            .validate(migration, options, &latest, &HashSet::new(), snapshots_created)
            .await?
        {
            info!(migration = %id, env = %self.environment, "Migration already applied; nothing to do");
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let statements = migration.up_statements();
        transitions.push(ApplyState::Applying);
        for statement in &statements {
            debug!(migration = %id, %statement, "Executing statement");
            self.executor
                .execute(statement)
                .await
                .map_err(|e| MigrationError::transaction(&id, e.to_string()))?;
        }

        let record = LedgerRecord::for_migration(migration, Utc::now());
        self.ledger
            .record(&self.environment, record.clone())
            .await?;
        transitions.push(ApplyState::Applied);
        Ok(ApplyOutcome::Applied(record))
    }

    /// Run the idempotency, drift and destructive checks against `latest`.
    ///
    /// Returns `true` when the migration is already reflected in the ledger.
    async fn validate(
        &self,
        migration: &Migration,
        options: ApplyOptions,
        latest: &ModelHash,
        fresh_tables: &HashSet<String>,
        snapshots_created: &mut Vec<Snapshot>,
    ) -> MigrateResult<bool> {
        if self.already_applied(migration, latest).await? {
            return Ok(true);
        }

        if *latest != migration.from_model_hash {
            return Err(MigrationError::DriftMismatch {
                migration: migration.id(),
                expected: migration.from_model_hash.to_string(),
                actual: latest.to_string(),
            });
        }

        self.guard_destructive(migration, options, fresh_tables, snapshots_created)
            .await?;
        Ok(false)
    }

    async fn already_applied(&self, migration: &Migration, latest: &ModelHash) -> MigrateResult<bool> {
        match migration.kind {
            MigrationKind::Schema => Ok(*latest == migration.to_model_hash),
            MigrationKind::Data | MigrationKind::Custom => {
                self.ledger
                    .is_applied(&self.environment, &migration.id())
                    .await
            }
        }
    }

    /// Block destructive steps against populated tables that have no snapshot.
    async fn guard_destructive(
        &self,
        migration: &Migration,
        options: ApplyOptions,
        fresh_tables: &HashSet<String>,
        snapshots_created: &mut Vec<Snapshot>,
    ) -> MigrateResult<()> {
        if options.allow_destructive {
            return Ok(());
        }

        let mut checked = HashSet::new();
        for step in migration.destructive_steps() {
            let table = step.table();
            if fresh_tables.contains(table) || !checked.insert(table.to_string()) {
                continue;
            }

            let rows = count_rows(self.executor.as_ref(), table).await?;
            if rows == 0 || self.snapshots.exists_for(table).await? {
                continue;
            }

            if options.auto_snapshot {
                if !options.dry_run {
                    snapshots_created.push(self.snapshots.create(table).await?);
                }
                continue;
            }

            return Err(MigrationError::DestructiveChangeBlocked {
                table: table.to_string(),
                step: step.to_string(),
                rows,
            });
        }
        Ok(())
    }

    async fn rollback_quietly(&self, id: &str) {
        if let Err(e) = self.executor.rollback().await {
            warn!(migration = %id, error = %e, "Rollback failed");
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::sql::PostgresSqlGenerator;
    use crate::testing::MemoryDatabase;
    use stratum_schema::{EntityDefinition, EntityField, FieldType, NormalizedModel, hash_model};

    fn users(with_legacy: bool) -> NormalizedModel {
        let mut users = EntityDefinition::new("users")
            .with_field("id", EntityField::required(FieldType::Uuid).primary())
            .with_field("email", EntityField::required(FieldType::String).unique());
        if with_legacy {
            users = users.with_field("legacy", EntityField::optional(FieldType::Text));
        }
        NormalizedModel::empty().with_entity("User", users)
    }

    struct Fixture {
        db: Arc<MemoryDatabase>,
        ledger: Arc<InMemoryLedger>,
        applier: MigrationApplier<MemoryDatabase, InMemoryLedger>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(MemoryDatabase::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let applier = MigrationApplier::new(Arc::clone(&db), Arc::clone(&ledger), "dev");
        Fixture { db, ledger, applier }
    }

    fn create_users() -> Migration {
        Migration::schema(
            1,
            "create_users",
            &NormalizedModel::empty(),
            &users(true),
            &PostgresSqlGenerator::new(),
        )
        .unwrap()
    }

    fn drop_legacy() -> Migration {
        Migration::schema(
            2,
            "drop_legacy",
            &users(true),
            &users(false),
            &PostgresSqlGenerator::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_apply_records_ledger_row() {
        let f = fixture();
        let report = f
            .applier
            .apply(&create_users(), ApplyOptions::new())
            .await
            .unwrap();

        assert!(report.was_applied());
        assert_eq!(
            report.transitions,
            [
                ApplyState::Pending,
                ApplyState::Validating,
                ApplyState::Applying,
                ApplyState::Applied
            ]
        );
        assert!(f.db.has_table("users"));
        assert_eq!(f.db.commits(), 1);
        assert_eq!(
            f.ledger.latest_hash("dev").await.unwrap().unwrap(),
            hash_model(&users(true)).unwrap().hash
        );
        assert!(!f.ledger.is_locked("dev"));
    }

    #[tokio::test]
    async fn test_reapply_is_noop() {
        let f = fixture();
        let migration = create_users();
        f.applier.apply(&migration, ApplyOptions::new()).await.unwrap();

        let report = f.applier.apply(&migration, ApplyOptions::new()).await.unwrap();
        assert_eq!(report.outcome, ApplyOutcome::AlreadyApplied);
        assert_eq!(f.ledger.len("dev"), 1);
    }

    #[tokio::test]
    async fn test_drift_mismatch_leaves_ledger() {
        let f = fixture();
        f.applier.apply(&create_users(), ApplyOptions::new()).await.unwrap();

        let mut stale = drop_legacy();
        stale.from_model_hash = ModelHash::from("abc");
        let err = f.applier.apply(&stale, ApplyOptions::new()).await.unwrap_err();

        assert!(matches!(err, MigrationError::DriftMismatch { ref expected, .. } if expected == "abc"));
        assert_eq!(f.ledger.len("dev"), 1);
        assert_eq!(f.db.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_destructive_blocked_without_snapshot() {
        let f = fixture();
        f.applier.apply(&create_users(), ApplyOptions::new()).await.unwrap();
        f.db.seed_rows("users", 10);

        let err = f
            .applier
            .apply(&drop_legacy(), ApplyOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MigrationError::DestructiveChangeBlocked { ref table, rows: 10, .. } if table == "users"
        ));
        assert_eq!(f.ledger.len("dev"), 1);

        f.applier.snapshots().create("users").await.unwrap();
        let report = f.applier.apply(&drop_legacy(), ApplyOptions::new()).await.unwrap();
        assert!(report.was_applied());
        assert_eq!(f.ledger.len("dev"), 2);
    }

    #[tokio::test]
    async fn test_destructive_on_empty_table_passes() {
        let f = fixture();
        f.applier.apply(&create_users(), ApplyOptions::new()).await.unwrap();

        let report = f.applier.apply(&drop_legacy(), ApplyOptions::new()).await.unwrap();
        assert!(report.was_applied());
    }

    #[tokio::test]
    async fn test_auto_snapshot() {
        let f = fixture();
        f.applier.apply(&create_users(), ApplyOptions::new()).await.unwrap();
        f.db.seed_rows("users", 4);

        let report = f
            .applier
            .apply(&drop_legacy(), ApplyOptions::new().auto_snapshot(true))
            .await
            .unwrap();
        assert_eq!(report.snapshots_created.len(), 1);
        assert_eq!(report.snapshots_created[0].row_count, 4);
        assert!(f.db.has_table(&report.snapshots_created[0].name));
    }

    #[tokio::test]
    async fn test_allow_destructive() {
        let f = fixture();
        f.applier.apply(&create_users(), ApplyOptions::new()).await.unwrap();
        f.db.seed_rows("users", 4);

        let report = f
            .applier
            .apply(&drop_legacy(), ApplyOptions::new().allow_destructive(true))
            .await
            .unwrap();
        assert!(report.was_applied());
        assert!(report.snapshots_created.is_empty());
    }

    #[tokio::test]
    async fn test_statement_failure_rolls_back() {
        let f = fixture();
        f.db.fail_on("CREATE TABLE \"users\"");

        let err = f
            .applier
            .apply(&create_users(), ApplyOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::TransactionFailure { .. }));
        assert_eq!(f.ledger.len("dev"), 0);
        assert_eq!(f.db.rollbacks(), 1);
        assert!(!f.db.in_transaction());
        assert!(!f.ledger.is_locked("dev"));
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let f = fixture();
        let report = f
            .applier
            .apply(&create_users(), ApplyOptions::new().dry_run(true))
            .await
            .unwrap();

        let ApplyOutcome::DryRun { statements } = &report.outcome else {
            panic!("expected dry run, got {:?}", report.outcome);
        };
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("CREATE TABLE \"users\""));
        assert!(!f.db.has_table("users"));
        assert_eq!(f.ledger.len("dev"), 0);
        assert_eq!(f.db.commits(), 0);
    }

    #[tokio::test]
    async fn test_preview_chains_backlog() {
        let f = fixture();
        let backlog = [create_users(), drop_legacy()];

        let reports = f
            .applier
            .preview(&backlog, ApplyOptions::new().dry_run(true))
            .await
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert!(
            reports
                .iter()
                .all(|r| matches!(r.outcome, ApplyOutcome::DryRun { .. }))
        );
        assert!(f.db.statements().is_empty());
        assert_eq!(f.ledger.len("dev"), 0);
    }

    #[tokio::test]
    async fn test_preview_reports_drift_inside_backlog() {
        let f = fixture();
        let mut stale = drop_legacy();
        stale.from_model_hash = ModelHash::from("abc");

        let err = f
            .applier
            .preview(&[create_users(), stale], ApplyOptions::new().dry_run(true))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::DriftMismatch { ref actual, .. }
            if *actual == hash_model(&users(true)).unwrap().hash.to_string()));
    }

    #[tokio::test]
    async fn test_tampered_migration_is_fatal() {
        let f = fixture();
        let mut migration = create_users();
        migration.up_sql.push_str("\n\nDROP TABLE \"accounts\";");

        let err = f.applier.apply(&migration, ApplyOptions::new()).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(f.db.statements().is_empty());
    }

    #[tokio::test]
    async fn test_busy_lock_fails_fast() {
        let f = fixture();
        let _held = f.ledger.acquire_lock("dev").await.unwrap();

        let err = f
            .applier
            .apply(&create_users(), ApplyOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::LockFailed(_)));
        assert!(!f.db.in_transaction());
    }

    #[tokio::test]
    async fn test_custom_migration_idempotent_by_name() {
        let f = fixture();
        f.applier.apply(&create_users(), ApplyOptions::new()).await.unwrap();
        let backfill = Migration::custom(
            2,
            "backfill_emails",
            MigrationKind::Data,
            hash_model(&users(true)).unwrap().hash,
            "UPDATE \"users\" SET \"email\" = lower(\"email\");",
            None,
        );

        assert!(f.applier.apply(&backfill, ApplyOptions::new()).await.unwrap().was_applied());
        let again = f.applier.apply(&backfill, ApplyOptions::new()).await.unwrap();
        assert_eq!(again.outcome, ApplyOutcome::AlreadyApplied);
        assert_eq!(f.ledger.len("dev"), 2);
    }
}
