//! The injected SQL execution seam.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{MigrateResult, MigrationError};
use crate::sql::quote_ident;

/// One result row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Executes statements against a database.
///
/// The engine issues one statement per call. Transaction control is
/// explicit; implementations map `begin`/`commit`/`rollback` onto their
/// driver's transaction handling.
#[async_trait::async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute a single statement and return its rows (empty for DDL).
    async fn execute(&self, statement: &str) -> MigrateResult<Vec<Row>>;

    /// Begin a transaction.
    async fn begin(&self) -> MigrateResult<()>;

    /// Commit the current transaction.
    async fn commit(&self) -> MigrateResult<()>;

    /// Roll back the current transaction.
    async fn rollback(&self) -> MigrateResult<()>;
}

#[async_trait::async_trait]
impl<T: SqlExecutor + ?Sized> SqlExecutor for Arc<T> {
    async fn execute(&self, statement: &str) -> MigrateResult<Vec<Row>> {
        (**self).execute(statement).await
    }

    async fn begin(&self) -> MigrateResult<()> {
        (**self).begin().await
    }

    async fn commit(&self) -> MigrateResult<()> {
        (**self).commit().await
    }

    async fn rollback(&self) -> MigrateResult<()> {
        (**self).rollback().await
    }
}

/// Count the rows in `table`.
pub async fn count_rows<E: SqlExecutor + ?Sized>(executor: &E, table: &str) -> MigrateResult<u64> {
    let rows = executor
        .execute(&format!(
            "SELECT COUNT(*) AS count FROM {};",
            quote_ident(table)
        ))
        .await?;
    rows.first()
        .and_then(|row| row.get("count"))
        .and_then(value_as_u64)
        .ok_or_else(|| MigrationError::database(format!("COUNT(*) on {table} returned no count")))
}

/// Read a column as an unsigned integer; drivers may report counts as strings.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Read a column as a string.
pub fn value_as_str(value: &Value) -> Option<&str> {
    value.as_str()
}

/// Quote a string literal for inlining into a statement.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
