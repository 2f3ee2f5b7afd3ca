//! Soft-delete bin for migration artifacts.
//!
//! Trashed artifacts are moved to `<trash>/<id>/<file name>` and described
//! by a sidecar `<trash>/<id>.json`. Entries can be restored until their
//! retention period passes, after which only a sweep or permanent delete
//! touches them.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MigrateResult, MigrationError};

/// Default retention period.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// What a trash entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrashKind {
    /// A migration directory.
    Migration,
    /// An exported snapshot.
    Snapshot,
    /// A data file.
    Data,
}

/// A trashed artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrashEntry {
    /// Entry id (UUID v4).
    pub id: String,
    /// What was trashed.
    #[serde(rename = "type")]
    pub kind: TrashKind,
    /// File or directory name.
    pub name: String,
    /// Where the artifact came from.
    pub original_path: PathBuf,
    /// Where the artifact is now.
    pub trash_path: PathBuf,
    /// When it was trashed.
    pub deleted_at: DateTime<Utc>,
    /// When restore stops being possible.
    pub expires_at: DateTime<Utc>,
    /// Free-form metadata supplied by the caller.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl TrashEntry {
    /// Whether the retention period has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the retention period has passed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Manages the trash directory.
#[derive(Debug, Clone)]
pub struct TrashManager {
    dir: PathBuf,
    retention_days: u32,
}

impl TrashManager {
    /// Create a manager with the default retention period.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    /// Set the retention period.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Trash directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Retention period in days.
    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Move `path` into the trash.
    pub async fn move_to_trash(
        &self,
        path: impl AsRef<Path>,
        kind: TrashKind,
        metadata: BTreeMap<String, Value>,
    ) -> MigrateResult<TrashEntry> {
        self.move_to_trash_at(path, kind, metadata, Utc::now()).await
    }

    /// Move `path` into the trash, recording `now` as the deletion time.
    pub async fn move_to_trash_at(
        &self,
        path: impl AsRef<Path>,
        kind: TrashKind,
        metadata: BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> MigrateResult<TrashEntry> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                MigrationError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("cannot trash path without a file name: {}", path.display()),
                ))
            })?
            .to_string();

        self.move_with_id(path, name, Uuid::new_v4().to_string(), kind, metadata, now)
            .await
    }

    /// Move `path` to `<trash>/<id>/<name>` and write its sidecar.
    ///
    /// Either both land or neither does: a failed rename removes the entry
    /// directory, and a failed sidecar write moves the artifact back.
    async fn move_with_id(
        &self,
        path: &Path,
        name: String,
        id: String,
        kind: TrashKind,
        metadata: BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> MigrateResult<TrashEntry> {
        let entry_dir = self.entry_dir(&id);
        tokio::fs::create_dir_all(&entry_dir).await?;

        let trash_path = entry_dir.join(&name);
        if let Err(e) = tokio::fs::rename(path, &trash_path).await {
            discard_dir(&entry_dir).await;
            return Err(e.into());
        }

        let entry = TrashEntry {
            id,
            kind,
            name,
            original_path: path.to_path_buf(),
            trash_path,
            deleted_at: now,
            expires_at: now + Duration::days(i64::from(self.retention_days)),
            metadata,
        };
        if let Err(e) = self.write_sidecar(&entry).await {
            match tokio::fs::rename(&entry.trash_path, path).await {
                Ok(()) => discard_dir(&entry_dir).await,
                Err(undo) => warn!(
                    id = %entry.id,
                    path = %entry.trash_path.display(),
                    error = %undo,
                    "Could not move artifact back after sidecar write failed"
                ),
            }
            return Err(e);
        }

        info!(id = %entry.id, name = %entry.name, expires_at = %entry.expires_at, "Moved to trash");
        Ok(entry)
    }

    /// Restore an entry to its original path.
    pub async fn restore(&self, id: &str) -> MigrateResult<TrashEntry> {
        self.restore_at(id, Utc::now()).await
    }

    /// Restore an entry, judging expiry at `now`.
    pub async fn restore_at(&self, id: &str, now: DateTime<Utc>) -> MigrateResult<TrashEntry> {
        let entry = self.get(id).await?;
        if entry.is_expired_at(now) {
            return Err(MigrationError::TrashEntryExpired {
                id: entry.id,
                expired_at: entry.expires_at.to_rfc3339(),
            });
        }

        if tokio::fs::try_exists(&entry.original_path).await? {
            return Err(MigrationError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!(
                    "cannot restore over existing path: {}",
                    entry.original_path.display()
                ),
            )));
        }
        if let Some(parent) = entry.original_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::rename(&entry.trash_path, &entry.original_path).await?;
        remove_if_exists(&self.entry_dir(&entry.id)).await?;
        tokio::fs::remove_file(self.sidecar_path(&entry.id)).await?;

        info!(id = %entry.id, path = %entry.original_path.display(), "Restored from trash");
        Ok(entry)
    }

    /// Remove an entry and its artifact, regardless of expiry.
    pub async fn permanently_delete(&self, id: &str) -> MigrateResult<()> {
        let entry = self.get(id).await?;
        remove_if_exists(&self.entry_dir(&entry.id)).await?;
        tokio::fs::remove_file(self.sidecar_path(&entry.id)).await?;
        debug!(id = %entry.id, "Permanently deleted trash entry");
        Ok(())
    }

    /// Delete every expired entry; returns how many were (or would be) removed.
    pub async fn cleanup_expired(&self, dry_run: bool) -> MigrateResult<usize> {
        self.cleanup_expired_at(Utc::now(), dry_run).await
    }

    /// Delete entries expired at `now`.
    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>, dry_run: bool) -> MigrateResult<usize> {
        let expired: Vec<TrashEntry> = self
            .list_entries()
            .await?
            .into_iter()
            .filter(|e| e.is_expired_at(now))
            .collect();

        if !dry_run {
            for entry in &expired {
                self.permanently_delete(&entry.id).await?;
            }
        }

        info!(count = expired.len(), dry_run, "Swept expired trash entries");
        Ok(expired.len())
    }

    /// All entries, most recently deleted first.
    pub async fn list_entries(&self) -> MigrateResult<Vec<TrashEntry>> {
        let mut entries = Vec::new();
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(entries);
        }

        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            entries.push(serde_json::from_str::<TrashEntry>(&content)?);
        }

        entries.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    /// Look up one entry.
    pub async fn get(&self, id: &str) -> MigrateResult<TrashEntry> {
        if Uuid::parse_str(id).is_err() {
            return Err(MigrationError::TrashEntryNotFound(id.to_string()));
        }
        let path = self.sidecar_path(id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(MigrationError::TrashEntryNotFound(id.to_string()));
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    fn entry_dir(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    fn sidecar_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write_sidecar(&self, entry: &TrashEntry) -> MigrateResult<()> {
        let json = serde_json::to_string_pretty(entry)?;
        tokio::fs::write(self.sidecar_path(&entry.id), json).await?;
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> MigrateResult<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await?,
        Ok(_) => tokio::fs::remove_file(path).await?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn discard_dir(path: &Path) {
    if let Err(e) = remove_if_exists(path).await {
        warn!(path = %path.display(), error = %e, "Could not remove trash entry directory");
    }
}
