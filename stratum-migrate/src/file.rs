//! Migration file management.
//!
//! Each migration lives in its own directory under the migrations root:
//!
//! ```text
//! migrations/
//!   0001_init/
//!     up.sql
//!     down.sql
//!     migration.json
//!     model.json
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratum_schema::{ModelHash, NormalizedModel};
use tracing::{debug, info};

use crate::diff::DiffStep;
use crate::error::{MigrateResult, MigrationError};
use crate::migration::{Migration, MigrationKind};

const UP_FILE: &str = "up.sql";
const DOWN_FILE: &str = "down.sql";
const META_FILE: &str = "migration.json";
const MODEL_FILE: &str = "model.json";

/// Sidecar metadata stored next to the SQL scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationMeta {
    /// Sequence number.
    pub sequence: u32,
    /// Snake-case name.
    pub name: String,
    /// Migration kind.
    #[serde(rename = "type")]
    pub kind: MigrationKind,
    /// Model hash before the migration.
    pub from_model_hash: ModelHash,
    /// Model hash after the migration.
    pub to_model_hash: ModelHash,
    /// Checksum of `up.sql` at generation time.
    pub checksum: String,
    /// Whether `down.sql` fully reverses `up.sql`.
    #[serde(default)]
    pub reversible: bool,
    /// Steps the SQL was rendered from.
    #[serde(default)]
    pub steps: Vec<DiffStep>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<&Migration> for MigrationMeta {
    fn from(migration: &Migration) -> Self {
        Self {
            sequence: migration.sequence,
            name: migration.name.clone(),
            kind: migration.kind,
            from_model_hash: migration.from_model_hash.clone(),
            to_model_hash: migration.to_model_hash.clone(),
            checksum: migration.checksum.clone(),
            reversible: migration.reversible,
            steps: migration.steps.clone(),
            created_at: migration.created_at,
        }
    }
}

/// A migration loaded from disk.
#[derive(Debug, Clone)]
pub struct MigrationFile {
    /// Migration directory.
    pub path: PathBuf,
    /// The migration, with SQL read from `up.sql`/`down.sql`.
    pub migration: Migration,
}

impl MigrationFile {
    /// Migration id (`NNNN_name`).
    pub fn id(&self) -> String {
        self.migration.id()
    }
}

/// Migration file reader/writer.
#[derive(Debug, Clone)]
pub struct MigrationFileManager {
    migrations_dir: PathBuf,
}

impl MigrationFileManager {
    /// Create a new file manager.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Get the migrations directory.
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Directory a migration is (or would be) written to.
    pub fn migration_dir(&self, migration: &Migration) -> PathBuf {
        self.migrations_dir.join(migration.id())
    }

    /// Ensure the migrations directory exists.
    pub async fn ensure_dir(&self) -> MigrateResult<()> {
        tokio::fs::create_dir_all(&self.migrations_dir).await?;
        Ok(())
    }

    /// Write a migration to disk.
    ///
    /// `model` is the normalized target model; it becomes the "from" model of
    /// the next generated migration.
    pub async fn write_migration(
        &self,
        migration: &Migration,
        model: Option<&NormalizedModel>,
    ) -> MigrateResult<PathBuf> {
        self.ensure_dir().await?;

        let dir = self.migration_dir(migration);
        if tokio::fs::try_exists(&dir).await? {
            return Err(MigrationError::migration_file(format!(
                "migration directory already exists: {}",
                dir.display()
            )));
        }
        tokio::fs::create_dir_all(&dir).await?;

        tokio::fs::write(dir.join(UP_FILE), &migration.up_sql).await?;
        tokio::fs::write(dir.join(DOWN_FILE), &migration.down_sql).await?;

        let meta = serde_json::to_string_pretty(&MigrationMeta::from(migration))?;
        tokio::fs::write(dir.join(META_FILE), meta).await?;

        if let Some(model) = model {
            let json = serde_json::to_string_pretty(model)?;
            tokio::fs::write(dir.join(MODEL_FILE), json).await?;
        }

        info!(migration = %migration.id(), path = %dir.display(), "Wrote migration");
        Ok(dir)
    }

    /// Load every migration in sequence order without verifying checksums.
    pub async fn load_all(&self) -> MigrateResult<Vec<MigrationFile>> {
        let mut files = Vec::new();
        for path in self.migration_dirs().await? {
            files.push(self.read_migration(&path).await?);
        }
        files.sort_by_key(|f| f.migration.sequence);
        Ok(files)
    }

    /// List migrations in sequence order, verifying each `up.sql` against its
    /// recorded checksum.
    pub async fn list_migrations(&self) -> MigrateResult<Vec<MigrationFile>> {
        let files = self.load_all().await?;
        for file in &files {
            file.migration.ensure_checksum()?;
        }
        Ok(files)
    }

    /// Next free sequence number.
    pub async fn next_sequence(&self) -> MigrateResult<u32> {
        let files = self.load_all().await?;
        Ok(files
            .last()
            .map(|f| f.migration.sequence + 1)
            .unwrap_or(1))
    }

    /// The target model stored with the most recent schema migration.
    pub async fn latest_model(&self) -> MigrateResult<Option<NormalizedModel>> {
        let files = self.load_all().await?;
        for file in files.iter().rev() {
            let path = file.path.join(MODEL_FILE);
            if tokio::fs::try_exists(&path).await? {
                let content = tokio::fs::read_to_string(&path).await?;
                return Ok(Some(serde_json::from_str(&content)?));
            }
        }
        Ok(None)
    }

    async fn migration_dirs(&self) -> MigrateResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        if !tokio::fs::try_exists(&self.migrations_dir).await? {
            return Ok(paths);
        }

        let mut entries = tokio::fs::read_dir(&self.migrations_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_migration_dir(&path) {
                paths.push(path);
            } else {
                debug!(path = %path.display(), "Skipping non-migration entry");
            }
        }
        Ok(paths)
    }

    async fn read_migration(&self, path: &Path) -> MigrateResult<MigrationFile> {
        let dir_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MigrationError::migration_file("invalid migration path"))?;
        let (sequence, name) = parse_migration_name(dir_name)?;

        let meta_json = tokio::fs::read_to_string(path.join(META_FILE)).await?;
        let meta: MigrationMeta = serde_json::from_str(&meta_json)?;
        if meta.sequence != sequence || meta.name != name {
            return Err(MigrationError::migration_file(format!(
                "{dir_name}: directory name does not match migration.json ({:04}_{})",
                meta.sequence, meta.name
            )));
        }

        let up_sql = tokio::fs::read_to_string(path.join(UP_FILE)).await?;
        let down_path = path.join(DOWN_FILE);
        let down_sql = if tokio::fs::try_exists(&down_path).await? {
            tokio::fs::read_to_string(&down_path).await?
        } else {
            String::new()
        };

        Ok(MigrationFile {
            path: path.to_path_buf(),
            migration: Migration {
                sequence: meta.sequence,
                name: meta.name,
                kind: meta.kind,
                from_model_hash: meta.from_model_hash,
                to_model_hash: meta.to_model_hash,
                steps: meta.steps,
                up_sql,
                down_sql,
                reversible: meta.reversible,
                checksum: meta.checksum,
                created_at: meta.created_at,
                applied_at: None,
            },
        })
    }
}

fn is_migration_dir(path: &Path) -> bool {
    path.is_dir() && path.join(UP_FILE).exists() && path.join(META_FILE).exists()
}

/// Parse a migration directory name (`NNNN_name`) into (sequence, name).
fn parse_migration_name(dir_name: &str) -> MigrateResult<(u32, String)> {
    let (seq, name) = dir_name.split_once('_').ok_or_else(|| {
        MigrationError::migration_file(format!("invalid migration name format: {dir_name}"))
    })?;

    if seq.is_empty() || !seq.chars().all(|c| c.is_ascii_digit()) || name.is_empty() {
        return Err(MigrationError::migration_file(format!(
            "invalid migration name (expected NNNN_name): {dir_name}"
        )));
    }

    let sequence = seq.parse::<u32>().map_err(|e| {
        MigrationError::migration_file(format!("invalid sequence in {dir_name}: {e}"))
    })?;
    Ok((sequence, name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{PostgresSqlGenerator, checksum};
    use stratum_schema::{EntityDefinition, EntityField, FieldType, hash_model};

    fn todo_model() -> NormalizedModel {
        NormalizedModel::empty().with_entity(
            "Todo",
            EntityDefinition::new("todos")
                .with_field("id", EntityField::required(FieldType::Uuid).primary())
                .with_field("title", EntityField::required(FieldType::String)),
        )
    }

    fn init_migration() -> Migration {
        Migration::schema(
            1,
            "init",
            &NormalizedModel::empty(),
            &todo_model(),
            &PostgresSqlGenerator::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_migration_name() {
        let (seq, name) = parse_migration_name("0001_create_users").unwrap();
        assert_eq!(seq, 1);
        assert_eq!(name, "create_users");
    }

    #[test]
    fn test_parse_migration_name_invalid() {
        assert!(parse_migration_name("invalid").is_err());
        assert!(parse_migration_name("abc_test").is_err());
        assert!(parse_migration_name("0001_").is_err());
    }

    #[tokio::test]
    async fn test_write_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MigrationFileManager::new(dir.path().join("migrations"));
        let migration = init_migration();

        let path = manager
            .write_migration(&migration, Some(&todo_model()))
            .await
            .unwrap();
        assert!(path.ends_with("0001_init"));
        assert!(path.join("up.sql").exists());
        assert!(path.join("down.sql").exists());

        let files = manager.list_migrations().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id(), "0001_init");
        assert_eq!(files[0].migration.up_sql, migration.up_sql);
        assert_eq!(files[0].migration.steps, migration.steps);
        assert_eq!(files[0].migration.to_model_hash, migration.to_model_hash);

        assert_eq!(manager.next_sequence().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MigrationFileManager::new(dir.path().join("missing"));

        assert!(manager.list_migrations().await.unwrap().is_empty());
        assert_eq!(manager.next_sequence().await.unwrap(), 1);
        assert!(manager.latest_model().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_model_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MigrationFileManager::new(dir.path());
        manager
            .write_migration(&init_migration(), Some(&todo_model()))
            .await
            .unwrap();

        let model = manager.latest_model().await.unwrap().unwrap();
        assert_eq!(
            hash_model(&model).unwrap().hash,
            hash_model(&todo_model()).unwrap().hash
        );
    }

    #[tokio::test]
    async fn test_tampered_up_sql_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MigrationFileManager::new(dir.path());
        let path = manager
            .write_migration(&init_migration(), None)
            .await
            .unwrap();

        tokio::fs::write(path.join("up.sql"), "DROP TABLE \"users\";")
            .await
            .unwrap();

        let err = manager.list_migrations().await.unwrap_err();
        assert!(matches!(err, MigrationError::ChecksumMismatch { .. }));
        let loaded = manager.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_ne!(checksum(&loaded[0].migration.up_sql), loaded[0].migration.checksum);
    }

    #[tokio::test]
    async fn test_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MigrationFileManager::new(dir.path());
        manager
            .write_migration(&init_migration(), None)
            .await
            .unwrap();

        let err = manager
            .write_migration(&init_migration(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidMigration(_)));
    }
}
