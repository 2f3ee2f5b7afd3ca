//! Plugin-owned migrations, keyed by semantic version.
//!
//! Each plugin ships its migrations tagged with the plugin version that
//! introduced them. Pending migrations are those newer than the installed
//! version and no newer than the plugin's current version. Unparseable
//! versions are skipped with a warning.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::executor::{SqlExecutor, quote_literal, value_as_str};
use crate::sql::{checksum, quote_ident, split_script};

/// Default plugin migration ledger table.
pub const DEFAULT_PLUGIN_TABLE: &str = "_stratum_plugin_migrations";
/// Default installed-version table.
pub const DEFAULT_VERSIONS_TABLE: &str = "_stratum_plugin_versions";

/// A migration shipped by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMigration {
    /// Plugin version that introduced the migration.
    pub version: String,
    /// Migration name.
    pub name: String,
    /// SQL applying the migration.
    pub up_sql: String,
    /// SQL reversing it; required for rollback.
    pub down_sql: Option<String>,
    /// Checksum of `up_sql`.
    pub checksum: String,
}

impl PluginMigration {
    /// Create a plugin migration.
    pub fn new(
        version: impl Into<String>,
        name: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: Option<String>,
    ) -> Self {
        let up_sql = up_sql.into();
        Self {
            version: version.into(),
            name: name.into(),
            checksum: checksum(&up_sql),
            up_sql,
            down_sql,
        }
    }
}

/// A plugin migration recorded as applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    /// Plugin name.
    pub plugin_name: String,
    /// Migration version.
    pub plugin_version: String,
    /// Migration name.
    pub migration_name: String,
    /// Checksum of the applied up script.
    pub checksum: String,
    /// When it was applied.
    pub applied_at: DateTime<Utc>,
}

/// Storage for plugin migration state.
#[async_trait::async_trait]
pub trait PluginLedgerStore: Send + Sync {
    /// Installed version of a plugin.
    async fn installed_version(&self, plugin: &str) -> MigrateResult<Option<String>>;

    /// Record the installed version of a plugin.
    async fn set_installed_version(&self, plugin: &str, version: &str) -> MigrateResult<()>;

    /// Applied migrations of a plugin, in application order.
    async fn applied(&self, plugin: &str) -> MigrateResult<Vec<PluginRecord>>;

    /// Record an applied migration.
    async fn record(&self, record: PluginRecord) -> MigrateResult<()>;

    /// Forget an applied migration after rollback.
    async fn remove(&self, plugin: &str, version: &str) -> MigrateResult<()>;
}

#[derive(Debug, Default)]
struct PluginLedgerState {
    versions: HashMap<String, String>,
    records: Vec<PluginRecord>,
}

/// Process-local plugin ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPluginLedger {
    state: Arc<Mutex<PluginLedgerState>>,
}

impl InMemoryPluginLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PluginLedgerStore for InMemoryPluginLedger {
    async fn installed_version(&self, plugin: &str) -> MigrateResult<Option<String>> {
        Ok(self.state.lock().versions.get(plugin).cloned())
    }

    async fn set_installed_version(&self, plugin: &str, version: &str) -> MigrateResult<()> {
        self.state
            .lock()
            .versions
            .insert(plugin.to_string(), version.to_string());
        Ok(())
    }

    async fn applied(&self, plugin: &str) -> MigrateResult<Vec<PluginRecord>> {
        Ok(self
            .state
            .lock()
            .records
            .iter()
            .filter(|r| r.plugin_name == plugin)
            .cloned()
            .collect())
    }

    async fn record(&self, record: PluginRecord) -> MigrateResult<()> {
        self.state.lock().records.push(record);
        Ok(())
    }

    async fn remove(&self, plugin: &str, version: &str) -> MigrateResult<()> {
        self.state
            .lock()
            .records
            .retain(|r| !(r.plugin_name == plugin && r.plugin_version == version));
        Ok(())
    }
}

/// Plugin ledger stored in the target database.
pub struct SqlPluginLedgerStore<E> {
    executor: Arc<E>,
    table: String,
    versions_table: String,
}

impl<E: SqlExecutor> SqlPluginLedgerStore<E> {
    /// Create a store using the default table names.
    pub fn new(executor: Arc<E>) -> Self {
        Self {
            executor,
            table: DEFAULT_PLUGIN_TABLE.to_string(),
            versions_table: DEFAULT_VERSIONS_TABLE.to_string(),
        }
    }

    /// Use different table names.
    pub fn with_tables(mut self, table: impl Into<String>, versions_table: impl Into<String>) -> Self {
        self.table = table.into();
        self.versions_table = versions_table.into();
        self
    }

    /// DDL creating both plugin tables.
    pub fn init_sql(&self) -> Vec<String> {
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\n    \"plugin_name\" VARCHAR(255) NOT NULL,\n    \"plugin_version\" VARCHAR(64) NOT NULL,\n    \"migration_name\" VARCHAR(255) NOT NULL,\n    \"checksum\" VARCHAR(64) NOT NULL,\n    \"applied_at\" TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),\n    PRIMARY KEY (\"plugin_name\", \"plugin_version\")\n);",
                quote_ident(&self.table)
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\n    \"plugin_name\" VARCHAR(255) PRIMARY KEY,\n    \"version\" VARCHAR(64) NOT NULL,\n    \"installed_at\" TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()\n);",
                quote_ident(&self.versions_table)
            ),
        ]
    }

    /// Create both plugin tables.
    pub async fn initialize(&self) -> MigrateResult<()> {
        for statement in self.init_sql() {
            self.executor.execute(&statement).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<E: SqlExecutor> PluginLedgerStore for SqlPluginLedgerStore<E> {
    async fn installed_version(&self, plugin: &str) -> MigrateResult<Option<String>> {
        debug!(plugin, "Reading installed plugin version");
        let rows = self
            .executor
            .execute(&format!(
                "SELECT \"version\" FROM {} WHERE \"plugin_name\" = {};",
                quote_ident(&self.versions_table),
                quote_literal(plugin)
            ))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("version"))
            .and_then(value_as_str)
            .map(String::from))
    }

    async fn set_installed_version(&self, plugin: &str, version: &str) -> MigrateResult<()> {
        self.executor
            .execute(&format!(
                "INSERT INTO {} (\"plugin_name\", \"version\") VALUES ({}, {}) ON CONFLICT (\"plugin_name\") DO UPDATE SET \"version\" = EXCLUDED.\"version\", \"installed_at\" = NOW();",
                quote_ident(&self.versions_table),
                quote_literal(plugin),
                quote_literal(version)
            ))
            .await?;
        Ok(())
    }

    async fn applied(&self, plugin: &str) -> MigrateResult<Vec<PluginRecord>> {
        debug!(plugin, "Reading applied plugin migrations");
        let rows = self
            .executor
            .execute(&format!(
                "SELECT \"plugin_name\", \"plugin_version\", \"migration_name\", \"checksum\", \"applied_at\" FROM {} WHERE \"plugin_name\" = {} ORDER BY \"applied_at\" ASC;",
                quote_ident(&self.table),
                quote_literal(plugin)
            ))
            .await?;

        rows.iter()
            .map(|row| {
                let text = |column: &str| -> MigrateResult<String> {
                    row.get(column)
                        .and_then(value_as_str)
                        .map(String::from)
                        .ok_or_else(|| {
                            MigrationError::database(format!(
                                "plugin ledger row missing column {column}"
                            ))
                        })
                };
                let applied_at = DateTime::parse_from_rfc3339(&text("applied_at")?)
                    .map_err(|e| MigrationError::database(format!("invalid applied_at: {e}")))?
                    .with_timezone(&Utc);
                Ok(PluginRecord {
                    plugin_name: text("plugin_name")?,
                    plugin_version: text("plugin_version")?,
                    migration_name: text("migration_name")?,
                    checksum: text("checksum")?,
                    applied_at,
                })
            })
            .collect()
    }

    async fn record(&self, record: PluginRecord) -> MigrateResult<()> {
        self.executor
            .execute(&format!(
                "INSERT INTO {} (\"plugin_name\", \"plugin_version\", \"migration_name\", \"checksum\", \"applied_at\") VALUES ({}, {}, {}, {}, {});",
                quote_ident(&self.table),
                quote_literal(&record.plugin_name),
                quote_literal(&record.plugin_version),
                quote_literal(&record.migration_name),
                quote_literal(&record.checksum),
                quote_literal(&record.applied_at.to_rfc3339())
            ))
            .await?;
        Ok(())
    }

    async fn remove(&self, plugin: &str, version: &str) -> MigrateResult<()> {
        self.executor
            .execute(&format!(
                "DELETE FROM {} WHERE \"plugin_name\" = {} AND \"plugin_version\" = {};",
                quote_ident(&self.table),
                quote_literal(plugin),
                quote_literal(version)
            ))
            .await?;
        Ok(())
    }
}

/// Applies and rolls back plugin migrations.
pub struct PluginMigrationTracker<E, L> {
    executor: Arc<E>,
    ledger: L,
}

impl<E: SqlExecutor, L: PluginLedgerStore> PluginMigrationTracker<E, L> {
    /// Create a tracker.
    pub fn new(executor: Arc<E>, ledger: L) -> Self {
        Self { executor, ledger }
    }

    /// Get the ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Migrations newer than the installed version and no newer than
    /// `current_version`, oldest first.
    pub async fn pending<'a>(
        &self,
        plugin: &str,
        current_version: &str,
        migrations: &'a [PluginMigration],
    ) -> MigrateResult<Vec<&'a PluginMigration>> {
        let Some(current) = parse_or_warn(plugin, current_version) else {
            return Ok(Vec::new());
        };
        let installed = match self.ledger.installed_version(plugin).await? {
            Some(v) => match parse_or_warn(plugin, &v) {
                Some(v) => Some(v),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        Ok(pending_migrations(plugin, installed.as_ref(), &current, migrations))
    }

    /// Apply pending migrations in one transaction and bump the installed
    /// version to `current_version`.
    pub async fn apply_pending(
        &self,
        plugin: &str,
        current_version: &str,
        migrations: &[PluginMigration],
    ) -> MigrateResult<Vec<PluginRecord>> {
        let pending = self.pending(plugin, current_version, migrations).await?;
        if pending.is_empty() {
            debug!(plugin, "No pending plugin migrations");
            return Ok(Vec::new());
        }

        self.executor.begin().await?;
        match self.apply_in_transaction(plugin, current_version, &pending).await {
            Ok(records) => {
                self.executor.commit().await?;
                info!(plugin, version = current_version, count = records.len(), "Applied plugin migrations");
                Ok(records)
            }
            Err(e) => {
                if let Err(rollback) = self.executor.rollback().await {
                    warn!(plugin, error = %rollback, "Rollback of plugin migrations failed");
                }
                Err(e)
            }
        }
    }

    async fn apply_in_transaction(
        &self,
        plugin: &str,
        current_version: &str,
        pending: &[&PluginMigration],
    ) -> MigrateResult<Vec<PluginRecord>> {
        for migration in pending {
            for statement in split_script(&migration.up_sql) {
                debug!(plugin, version = %migration.version, %statement, "Executing plugin statement");
                self.executor.execute(&statement).await.map_err(|e| {
                    MigrationError::transaction(format!("{plugin}@{}", migration.version), e.to_string())
                })?;
            }
        }

        let applied_at = Utc::now();
        let mut records = Vec::with_capacity(pending.len());
        for migration in pending {
            let record = PluginRecord {
                plugin_name: plugin.to_string(),
                plugin_version: migration.version.clone(),
                migration_name: migration.name.clone(),
                checksum: migration.checksum.clone(),
                applied_at,
            };
            self.ledger.record(record.clone()).await?;
            records.push(record);
        }
        self.ledger
            .set_installed_version(plugin, current_version)
            .await?;
        Ok(records)
    }

    /// Roll back applied migrations newer than `target_version`, newest
    /// first. Every migration rolled back must have a down script.
    ///
    /// Returns the versions rolled back.
    pub async fn rollback(
        &self,
        plugin: &str,
        target_version: &str,
        migrations: &[PluginMigration],
    ) -> MigrateResult<Vec<String>> {
        let target = Version::parse(target_version).map_err(|_| MigrationError::InvalidSemver {
            plugin: plugin.to_string(),
            version: target_version.to_string(),
        })?;

        let mut to_revert: Vec<(Version, &PluginMigration)> = Vec::new();
        for record in self.ledger.applied(plugin).await? {
            let Some(version) = parse_or_warn(plugin, &record.plugin_version) else {
                continue;
            };
            if version <= target {
                continue;
            }
            let migration = migrations
                .iter()
                .find(|m| m.version == record.plugin_version)
                .ok_or_else(|| {
                    MigrationError::RollbackFailed(format!(
                        "{plugin}@{} is applied but its migration is not available",
                        record.plugin_version
                    ))
                })?;
            to_revert.push((version, migration));
        }
        to_revert.sort_by(|a, b| b.0.cmp(&a.0));

        if let Some((_, missing)) = to_revert.iter().find(|(_, m)| m.down_sql.is_none()) {
            return Err(MigrationError::RollbackFailed(format!(
                "{plugin}@{} ({}) has no down script",
                missing.version, missing.name
            )));
        }
        if to_revert.is_empty() {
            return Ok(Vec::new());
        }

        self.executor.begin().await?;
        match self.rollback_in_transaction(plugin, target_version, &to_revert).await {
            Ok(versions) => {
                self.executor.commit().await?;
                info!(plugin, target = target_version, count = versions.len(), "Rolled back plugin migrations");
                Ok(versions)
            }
            Err(e) => {
                if let Err(rollback) = self.executor.rollback().await {
                    warn!(plugin, error = %rollback, "Rollback of plugin rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn rollback_in_transaction(
        &self,
        plugin: &str,
        target_version: &str,
        to_revert: &[(Version, &PluginMigration)],
    ) -> MigrateResult<Vec<String>> {
        let mut versions = Vec::with_capacity(to_revert.len());
        for (_, migration) in to_revert {
            let down = migration.down_sql.as_deref().unwrap_or_default();
            for statement in split_script(down) {
                debug!(plugin, version = %migration.version, %statement, "Executing plugin down statement");
                self.executor.execute(&statement).await.map_err(|e| {
                    MigrationError::transaction(format!("{plugin}@{}", migration.version), e.to_string())
                })?;
            }
            self.ledger.remove(plugin, &migration.version).await?;
            versions.push(migration.version.clone());
        }
        self.ledger
            .set_installed_version(plugin, target_version)
            .await?;
        Ok(versions)
    }
}

/// Select pending migrations: `installed < version <= current`, ascending.
pub fn pending_migrations<'a>(
    plugin: &str,
    installed: Option<&Version>,
    current: &Version,
    migrations: &'a [PluginMigration],
) -> Vec<&'a PluginMigration> {
    let mut pending: Vec<(Version, &PluginMigration)> = migrations
        .iter()
        .filter_map(|m| parse_or_warn(plugin, &m.version).map(|v| (v, m)))
        .filter(|(v, _)| installed.is_none_or(|i| v > i) && v <= current)
        .collect();
    pending.sort_by(|a, b| a.0.cmp(&b.0));
    pending.into_iter().map(|(_, m)| m).collect()
}

fn parse_or_warn(plugin: &str, version: &str) -> Option<Version> {
    match Version::parse(version) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(plugin, version, error = %e, "Skipping invalid plugin version");
            None
        }
    }
}
