//! In-memory database for tests.
//!
//! [`MemoryDatabase`] tracks table row counts rather than rows. It understands
//! the statements the engine itself issues (counts, snapshot copies,
//! truncates, drops, creates) and accepts everything else as a no-op, which
//! is enough to exercise the applier and snapshot flows end to end.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::json;

use crate::error::{MigrateResult, MigrationError};
use crate::executor::{Row, SqlExecutor};

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, u64>,
    saved: Option<BTreeMap<String, u64>>,
    responses: Vec<(String, Vec<Row>)>,
    failures: Vec<String>,
    statements: Vec<String>,
    commits: usize,
    rollbacks: usize,
}

/// A row-count-only database double.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `table` (if needed) holding `rows` rows.
    pub fn seed_rows(&self, table: &str, rows: u64) {
        self.state.lock().tables.insert(table.to_string(), rows);
    }

    /// Row count of a table, if it exists.
    pub fn row_count(&self, table: &str) -> Option<u64> {
        self.state.lock().tables.get(table).copied()
    }

    /// Whether a table exists.
    pub fn has_table(&self, table: &str) -> bool {
        self.state.lock().tables.contains_key(table)
    }

    /// Names of all tables.
    pub fn tables(&self) -> Vec<String> {
        self.state.lock().tables.keys().cloned().collect()
    }

    /// Return `rows` for any statement containing `pattern`.
    pub fn respond_to(&self, pattern: impl Into<String>, rows: Vec<Row>) {
        self.state.lock().responses.push((pattern.into(), rows));
    }

    /// Fail any statement containing `pattern`.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.state.lock().failures.push(pattern.into());
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    /// Number of committed transactions.
    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }

    /// Number of rolled back transactions.
    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.state.lock().saved.is_some()
    }
}

#[async_trait::async_trait]
impl SqlExecutor for MemoryDatabase {
    async fn execute(&self, statement: &str) -> MigrateResult<Vec<Row>> {
        let mut state = self.state.lock();
        state.statements.push(statement.to_string());

        if let Some(pattern) = state.failures.iter().find(|p| statement.contains(p.as_str())) {
            return Err(MigrationError::database(format!(
                "injected failure on '{pattern}'"
            )));
        }
        if let Some((_, rows)) = state
            .responses
            .iter()
            .find(|(p, _)| statement.contains(p.as_str()))
        {
            return Ok(rows.clone());
        }

        state.apply(statement)
    }

    async fn begin(&self) -> MigrateResult<()> {
        let mut state = self.state.lock();
        if state.saved.is_some() {
            return Err(MigrationError::database("transaction already open"));
        }
        state.saved = Some(state.tables.clone());
        Ok(())
    }

    async fn commit(&self) -> MigrateResult<()> {
        let mut state = self.state.lock();
        if state.saved.take().is_none() {
            return Err(MigrationError::database("no transaction to commit"));
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(&self) -> MigrateResult<()> {
        let mut state = self.state.lock();
        let saved = state
            .saved
            .take()
            .ok_or_else(|| MigrationError::database("no transaction to roll back"))?;
        state.tables = saved;
        state.rollbacks += 1;
        Ok(())
    }
}

impl State {
    fn apply(&mut self, statement: &str) -> MigrateResult<Vec<Row>> {
        let upper = statement.trim_start().to_ascii_uppercase();
        let idents = quoted_idents(statement);
        let first = idents.first().cloned().unwrap_or_default();

        if upper.starts_with("SELECT COUNT(*)") {
            let count = self.count(&first)?;
            return Ok(vec![Row::from([("count".to_string(), json!(count))])]);
        }
        if upper.contains("INFORMATION_SCHEMA.TABLES") {
            return Ok(self
                .tables
                .keys()
                .map(|name| Row::from([("table_name".to_string(), json!(name))]))
                .collect());
        }
        if upper.contains("PG_TRY_ADVISORY_XACT_LOCK") {
            return Ok(vec![Row::from([("locked".to_string(), json!(true))])]);
        }
        if upper.starts_with("CREATE TABLE") && upper.contains(" AS SELECT ") {
            let source = idents.get(1).cloned().unwrap_or_default();
            let rows = self.count(&source)?;
            if self.tables.contains_key(&first) {
                return Err(already_exists(&first));
            }
            self.tables.insert(first, rows);
            return Ok(Vec::new());
        }
        if upper.starts_with("CREATE TABLE IF NOT EXISTS") {
            self.tables.entry(first).or_insert(0);
            return Ok(Vec::new());
        }
        if upper.starts_with("CREATE TABLE") {
            if self.tables.contains_key(&first) {
                return Err(already_exists(&first));
            }
            self.tables.insert(first, 0);
            return Ok(Vec::new());
        }
        if upper.starts_with("DROP TABLE IF EXISTS") {
            self.tables.remove(&first);
            return Ok(Vec::new());
        }
        if upper.starts_with("DROP TABLE") {
            if self.tables.remove(&first).is_none() {
                return Err(missing(&first));
            }
            return Ok(Vec::new());
        }
        if upper.starts_with("TRUNCATE") {
            let rows = self.tables.get_mut(&first).ok_or_else(|| missing(&first))?;
            *rows = 0;
            return Ok(Vec::new());
        }
        if upper.starts_with("INSERT INTO") && upper.contains("SELECT * FROM") {
            let source = idents.get(1).cloned().unwrap_or_default();
            let copied = self.count(&source)?;
            let rows = self.tables.get_mut(&first).ok_or_else(|| missing(&first))?;
            *rows += copied;
            return Ok(Vec::new());
        }
        if upper.starts_with("INSERT INTO") {
            if let Some(rows) = self.tables.get_mut(&first) {
                *rows += 1;
            }
            return Ok(Vec::new());
        }
        if upper.starts_with("ALTER TABLE") && !self.tables.contains_key(&first) {
            return Err(missing(&first));
        }

        Ok(Vec::new())
    }

    fn count(&self, table: &str) -> MigrateResult<u64> {
        self.tables.get(table).copied().ok_or_else(|| missing(table))
    }
}

fn missing(table: &str) -> MigrationError {
    MigrationError::database(format!("relation \"{table}\" does not exist"))
}

fn already_exists(table: &str) -> MigrationError {
    MigrationError::database(format!("relation \"{table}\" already exists"))
}

/// Double-quoted identifiers in statement order.
fn quoted_idents(statement: &str) -> Vec<String> {
    let mut idents = Vec::new();
    let mut chars = statement.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    ident.push('"');
                    chars.next();
                } else {
                    break;
                }
            } else {
                ident.push(c);
            }
        }
        idents.push(ident);
    }
    idents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_idents() {
        assert_eq!(
            quoted_idents("INSERT INTO \"a\" SELECT * FROM \"b\"\"c\";"),
            vec!["a".to_string(), "b\"c".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rollback_restores_tables() {
        let db = MemoryDatabase::new();
        db.seed_rows("users", 10);

        db.begin().await.unwrap();
        db.execute("TRUNCATE TABLE \"users\";").await.unwrap();
        db.execute("CREATE TABLE \"posts\" ();").await.unwrap();
        assert_eq!(db.row_count("users"), Some(0));
        db.rollback().await.unwrap();

        assert_eq!(db.row_count("users"), Some(10));
        assert!(!db.has_table("posts"));
        assert_eq!(db.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_count_missing_table() {
        let db = MemoryDatabase::new();
        assert!(db.execute("SELECT COUNT(*) AS count FROM \"nope\";").await.is_err());
    }

    #[tokio::test]
    async fn test_fail_on() {
        let db = MemoryDatabase::new();
        db.fail_on("DROP COLUMN");
        let err = db
            .execute("ALTER TABLE \"users\" DROP COLUMN \"legacy\";")
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Database(_)));
    }
}
