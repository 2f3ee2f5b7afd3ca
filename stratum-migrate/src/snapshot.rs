//! Pre-change data snapshots.
//!
//! A snapshot is an ordinary table in the same database holding a copy of
//! another table's rows. Snapshot tables are named
//! `<prefix><table>__<YYYYMMDDHHMMSSmmm>` so the source table and creation
//! time can be read back from the name alone. Snapshots are never removed
//! automatically.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::executor::{SqlExecutor, count_rows, quote_literal, value_as_str};
use crate::sql::quote_ident;

/// Default snapshot table prefix.
pub const DEFAULT_SNAPSHOT_PREFIX: &str = "_stratum_snapshot_";

/// PostgreSQL truncates identifiers longer than this.
const MAX_IDENTIFIER_LEN: usize = 63;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// A backup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Backup table name.
    pub name: String,
    /// Table the rows were copied from.
    pub table: String,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Rows in the snapshot.
    pub row_count: u64,
}

/// Creates, restores and lists snapshot tables.
pub struct SnapshotManager<E> {
    executor: Arc<E>,
    prefix: String,
}

impl<E: SqlExecutor> SnapshotManager<E> {
    /// Create a manager with the default prefix.
    pub fn new(executor: Arc<E>) -> Self {
        Self {
            executor,
            prefix: DEFAULT_SNAPSHOT_PREFIX.to_string(),
        }
    }

    /// Use a different snapshot table prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Snapshot table prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Snapshot `table` now.
    pub async fn create(&self, table: &str) -> MigrateResult<Snapshot> {
        self.create_at(table, Utc::now()).await
    }

    /// Snapshot `table`, naming the backup after `now`.
    pub async fn create_at(&self, table: &str, now: DateTime<Utc>) -> MigrateResult<Snapshot> {
        let name = self.snapshot_name(table, now);
        if name.len() > MAX_IDENTIFIER_LEN {
            warn!(
                snapshot = %name,
                "Snapshot name exceeds {MAX_IDENTIFIER_LEN} characters and may be truncated by the database"
            );
        }

        self.executor
            .execute(&format!(
                "CREATE TABLE {} AS SELECT * FROM {};",
                quote_ident(&name),
                quote_ident(table)
            ))
            .await?;
        let row_count = count_rows(self.executor.as_ref(), &name).await?;

        info!(snapshot = %name, table, rows = row_count, "Created snapshot");
        Ok(Snapshot {
            name,
            table: table.to_string(),
            created_at: truncate_to_millis(now),
            row_count,
        })
    }

    /// Replace the contents of `target_table` with the rows of `snapshot`.
    ///
    /// Runs in its own transaction. Returns the number of rows restored.
    pub async fn restore(&self, snapshot: &str, target_table: &str) -> MigrateResult<u64> {
        if !self.snapshot_names().await?.iter().any(|n| n == snapshot) {
            return Err(MigrationError::SnapshotNotFound(snapshot.to_string()));
        }

        self.executor.begin().await?;
        let result = self.restore_in_transaction(snapshot, target_table).await;
        match result {
            Ok(rows) => {
                self.executor.commit().await?;
                info!(snapshot, table = target_table, rows, "Restored snapshot");
                Ok(rows)
            }
            Err(e) => {
                if let Err(rollback) = self.executor.rollback().await {
                    warn!(error = %rollback, "Rollback after failed restore also failed");
                }
                Err(e)
            }
        }
    }

    async fn restore_in_transaction(&self, snapshot: &str, target_table: &str) -> MigrateResult<u64> {
        let target = quote_ident(target_table);
        self.executor
            .execute(&format!("TRUNCATE TABLE {target};"))
            .await?;
        self.executor
            .execute(&format!(
                "INSERT INTO {target} SELECT * FROM {};",
                quote_ident(snapshot)
            ))
            .await?;
        count_rows(self.executor.as_ref(), snapshot).await
    }

    /// Drop a snapshot table.
    pub async fn delete(&self, snapshot: &str) -> MigrateResult<()> {
        if !snapshot.starts_with(&self.prefix) {
            return Err(MigrationError::SnapshotNotFound(snapshot.to_string()));
        }
        self.executor
            .execute(&format!("DROP TABLE IF EXISTS {};", quote_ident(snapshot)))
            .await?;
        info!(snapshot, "Deleted snapshot");
        Ok(())
    }

    /// All snapshots, oldest first.
    pub async fn list(&self) -> MigrateResult<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for name in self.snapshot_names().await? {
            let Some((table, created_at)) = self.parse_name(&name) else {
                continue;
            };
            let row_count = count_rows(self.executor.as_ref(), &name).await?;
            snapshots.push(Snapshot {
                name,
                table,
                created_at,
                row_count,
            });
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(snapshots)
    }

    /// Most recent snapshot of `table`.
    pub async fn latest_for(&self, table: &str) -> MigrateResult<Option<Snapshot>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.table == table)
            .max_by(|a, b| a.created_at.cmp(&b.created_at)))
    }

    /// Whether any snapshot of `table` exists.
    pub async fn exists_for(&self, table: &str) -> MigrateResult<bool> {
        Ok(self
            .snapshot_names()
            .await?
            .iter()
            .filter_map(|n| self.parse_name(n))
            .any(|(t, _)| t == table))
    }

    /// Backup table name for `table` at `at`.
    pub fn snapshot_name(&self, table: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}{}__{}{:03}",
            self.prefix,
            table,
            at.format(TIMESTAMP_FORMAT),
            at.timestamp_subsec_millis()
        )
    }

    /// Split a snapshot table name into source table and creation time.
    pub fn parse_name(&self, name: &str) -> Option<(String, DateTime<Utc>)> {
        let rest = name.strip_prefix(&self.prefix)?;
        let (table, stamp) = rest.rsplit_once("__")?;
        if table.is_empty() || stamp.len() != 17 || !stamp.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let (seconds, millis) = stamp.split_at(14);
        let naive = NaiveDateTime::parse_from_str(seconds, TIMESTAMP_FORMAT).ok()?;
        let millis: i64 = millis.parse().ok()?;
        Some((
            table.to_string(),
            naive.and_utc() + Duration::milliseconds(millis),
        ))
    }

    async fn snapshot_names(&self) -> MigrateResult<Vec<String>> {
        let rows = self
            .executor
            .execute(&format!(
                "SELECT table_name FROM information_schema.tables WHERE table_schema = current_schema() AND table_name LIKE {};",
                quote_literal(&format!("{}%", self.prefix))
            ))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("table_name").and_then(value_as_str))
            .filter(|name| name.starts_with(&self.prefix))
            .map(String::from)
            .collect())
    }
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}
