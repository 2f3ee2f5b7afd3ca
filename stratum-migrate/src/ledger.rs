//! Migration ledger: the record of applied migrations per environment.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stratum_schema::{ModelHash, sha256_hex};
use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::executor::{Row, SqlExecutor, quote_literal, value_as_str};
use crate::migration::{Migration, MigrationKind};
use crate::sql::quote_ident;

/// Default ledger table name.
pub const DEFAULT_LEDGER_TABLE: &str = "_stratum_migrations";

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Migration id (`NNNN_name`).
    pub name: String,
    /// Migration kind.
    #[serde(rename = "type")]
    pub kind: MigrationKind,
    /// Model hash before the migration.
    pub from_model_hash: ModelHash,
    /// Model hash after the migration.
    pub to_model_hash: ModelHash,
    /// Checksum of the applied up script.
    pub checksum: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

impl LedgerRecord {
    /// Record for `migration` applied at `applied_at`.
    pub fn for_migration(migration: &Migration, applied_at: DateTime<Utc>) -> Self {
        Self {
            name: migration.id(),
            kind: migration.kind,
            from_model_hash: migration.from_model_hash.clone(),
            to_model_hash: migration.to_model_hash.clone(),
            checksum: migration.checksum.clone(),
            applied_at,
        }
    }
}

/// Ledger storage.
///
/// Every operation is scoped to an environment name. The advisory lock is a
/// property of the store so two processes sharing a store exclude each other.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the ledger table if needed.
    async fn initialize(&self) -> MigrateResult<()>;

    /// Latest recorded `to_model_hash`, if any migration was applied.
    async fn latest_hash(&self, env: &str) -> MigrateResult<Option<ModelHash>>;

    /// All records, oldest first.
    async fn history(&self, env: &str) -> MigrateResult<Vec<LedgerRecord>>;

    /// Whether a migration with this name has been recorded.
    async fn is_applied(&self, env: &str, name: &str) -> MigrateResult<bool> {
        Ok(self.history(env).await?.iter().any(|r| r.name == name))
    }

    /// Record an applied migration.
    async fn record(&self, env: &str, record: LedgerRecord) -> MigrateResult<()>;

    /// Acquire the environment's exclusive migration lock without waiting.
    ///
    /// Fails with [`MigrationError::LockFailed`] if another apply holds it.
    async fn acquire_lock(&self, env: &str) -> MigrateResult<MigrationLock>;
}

/// Migration lock to prevent concurrent migrations.
///
/// Released when dropped.
pub struct MigrationLock {
    lock_id: i64,
    release_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl MigrationLock {
    /// Create a new migration lock.
    pub fn new(lock_id: i64, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            lock_id,
            release_fn: Some(Box::new(release)),
        }
    }

    /// Get the lock ID.
    pub fn id(&self) -> i64 {
        self.lock_id
    }
}

impl std::fmt::Debug for MigrationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationLock")
            .field("lock_id", &self.lock_id)
            .finish()
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        if let Some(release) = self.release_fn.take() {
            release();
        }
    }
}

/// Advisory lock key for an environment: the first 8 bytes of
/// `sha256("stratum:<env>")` as a signed integer.
pub fn lock_key(env: &str) -> i64 {
    let digest = sha256_hex(format!("stratum:{env}").as_bytes());
    let prefix = u64::from_str_radix(&digest[..16], 16).unwrap_or(0);
    i64::from_ne_bytes(prefix.to_ne_bytes())
}

/// Process-local ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    records: Arc<Mutex<HashMap<String, Vec<LedgerRecord>>>>,
    locks: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records for an environment.
    pub fn len(&self, env: &str) -> usize {
        self.records.lock().get(env).map_or(0, Vec::len)
    }

    /// Whether the lock for an environment is currently held.
    pub fn is_locked(&self, env: &str) -> bool {
        self.locks.lock().contains(env)
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedger {
    async fn initialize(&self) -> MigrateResult<()> {
        Ok(())
    }

    async fn latest_hash(&self, env: &str) -> MigrateResult<Option<ModelHash>> {
        let records = self.records.lock();
        Ok(records
            .get(env)
            .and_then(|r| r.last())
            .map(|r| r.to_model_hash.clone()))
    }

    async fn history(&self, env: &str) -> MigrateResult<Vec<LedgerRecord>> {
        Ok(self.records.lock().get(env).cloned().unwrap_or_default())
    }

    async fn record(&self, env: &str, record: LedgerRecord) -> MigrateResult<()> {
        self.records
            .lock()
            .entry(env.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn acquire_lock(&self, env: &str) -> MigrateResult<MigrationLock> {
        if !self.locks.lock().insert(env.to_string()) {
            return Err(MigrationError::lock_failed("migration already in progress"));
        }

        let locks = Arc::clone(&self.locks);
        let env = env.to_string();
        Ok(MigrationLock::new(lock_key(&env), move || {
            locks.lock().remove(&env);
        }))
    }
}

/// Ledger stored in the target database.
///
/// One store serves one environment's database; the `env` argument keys the
/// advisory lock. The lock is transaction-scoped
/// (`pg_try_advisory_xact_lock`), so it must be taken inside the apply
/// transaction and is released by its commit or rollback.
pub struct SqlLedgerStore<E> {
    executor: Arc<E>,
    table: String,
}

impl<E: SqlExecutor> SqlLedgerStore<E> {
    /// Create a store using the default table name.
    pub fn new(executor: Arc<E>) -> Self {
        Self {
            executor,
            table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }

    /// Use a different ledger table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Ledger table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// DDL creating the ledger table.
    pub fn init_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \"name\" VARCHAR(255) PRIMARY KEY,\n    \"type\" VARCHAR(16) NOT NULL,\n    \"from_model_hash\" VARCHAR(64) NOT NULL,\n    \"to_model_hash\" VARCHAR(64) NOT NULL,\n    \"checksum\" VARCHAR(64) NOT NULL,\n    \"applied_at\" TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()\n);",
            quote_ident(&self.table)
        )
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT \"name\", \"type\", \"from_model_hash\", \"to_model_hash\", \"checksum\", \"applied_at\" FROM {} ORDER BY \"applied_at\" ASC;",
            quote_ident(&self.table)
        )
    }
}

#[async_trait::async_trait]
impl<E: SqlExecutor> LedgerStore for SqlLedgerStore<E> {
    async fn initialize(&self) -> MigrateResult<()> {
        self.executor.execute(&self.init_sql()).await?;
        Ok(())
    }

    async fn latest_hash(&self, env: &str) -> MigrateResult<Option<ModelHash>> {
        debug!(env, table = %self.table, "Reading latest model hash");
        let rows = self
            .executor
            .execute(&format!(
                "SELECT \"to_model_hash\" FROM {} ORDER BY \"applied_at\" DESC LIMIT 1;",
                quote_ident(&self.table)
            ))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("to_model_hash"))
            .and_then(value_as_str)
            .map(ModelHash::from))
    }

    async fn history(&self, env: &str) -> MigrateResult<Vec<LedgerRecord>> {
        debug!(env, table = %self.table, "Reading ledger history");
        let rows = self.executor.execute(&self.select_sql()).await?;
        rows.iter().map(parse_record).collect()
    }

    async fn is_applied(&self, env: &str, name: &str) -> MigrateResult<bool> {
        debug!(env, name, "Checking ledger for migration");
        let rows = self
            .executor
            .execute(&format!(
                "SELECT \"name\" FROM {} WHERE \"name\" = {};",
                quote_ident(&self.table),
                quote_literal(name)
            ))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn record(&self, _env: &str, record: LedgerRecord) -> MigrateResult<()> {
        let statement = format!(
            "INSERT INTO {} (\"name\", \"type\", \"from_model_hash\", \"to_model_hash\", \"checksum\", \"applied_at\") VALUES ({}, {}, {}, {}, {}, {});",
            quote_ident(&self.table),
            quote_literal(&record.name),
            quote_literal(record.kind.as_str()),
            quote_literal(record.from_model_hash.as_str()),
            quote_literal(record.to_model_hash.as_str()),
            quote_literal(&record.checksum),
            quote_literal(&record.applied_at.to_rfc3339()),
        );
        self.executor.execute(&statement).await?;
        Ok(())
    }

    async fn acquire_lock(&self, env: &str) -> MigrateResult<MigrationLock> {
        let key = lock_key(env);
        let rows = self
            .executor
            .execute(&format!("SELECT pg_try_advisory_xact_lock({key}) AS locked;"))
            .await?;
        let locked = rows
            .first()
            .and_then(|row| row.get("locked"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !locked {
            return Err(MigrationError::lock_failed("migration already in progress"));
        }
        // Released by the enclosing transaction's commit or rollback.
        Ok(MigrationLock::new(key, || {}))
    }
}

fn parse_record(row: &Row) -> MigrateResult<LedgerRecord> {
    let text = |column: &str| -> MigrateResult<String> {
        row.get(column)
            .and_then(value_as_str)
            .map(String::from)
            .ok_or_else(|| MigrationError::database(format!("ledger row missing column {column}")))
    };

    let kind_name = text("type")?;
    let kind = MigrationKind::parse(&kind_name).ok_or_else(|| {
        MigrationError::database(format!("unknown migration type in ledger: {kind_name}"))
    })?;
    let applied_at = DateTime::parse_from_rfc3339(&text("applied_at")?)
        .map_err(|e| MigrationError::database(format!("invalid applied_at in ledger: {e}")))?
        .with_timezone(&Utc);

    Ok(LedgerRecord {
        name: text("name")?,
        kind,
        from_model_hash: ModelHash::from(text("from_model_hash")?),
        to_model_hash: ModelHash::from(text("to_model_hash")?),
        checksum: text("checksum")?,
        applied_at,
    })
}
