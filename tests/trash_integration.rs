//! Integration tests for discarding migrations into the trash and getting
//! them back.

use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use stratum::migrate::testing::MemoryDatabase;
use stratum::migrate::{
    InMemoryLedger, MigrationConfig, MigrationEngine, MigrationError, TrashKind, TrashManager,
};
use stratum::schema::{RawModel, normalize};

fn todos() -> stratum::schema::NormalizedModel {
    let raw = RawModel::from_json(
        r#"{ "Todo": { "fields": { "id": "uuid!", "title": "string!" } } }"#,
    )
    .unwrap();
    normalize(&raw).unwrap()
}

/// A discarded migration directory comes back byte for byte.
#[tokio::test]
async fn test_discard_and_restore_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = MigrationConfig::new()
        .migrations_dir(dir.path().join("migrations"))
        .trash_dir(dir.path().join(".trash"));
    let engine = MigrationEngine::new(
        config,
        Arc::new(MemoryDatabase::new()),
        Arc::new(InMemoryLedger::new()),
    );

    engine.generate(&todos(), "init").await.unwrap();
    let migration_dir = dir.path().join("migrations/0001_init");
    let up_before = std::fs::read(migration_dir.join("up.sql")).unwrap();
    let meta_before = std::fs::read(migration_dir.join("migration.json")).unwrap();

    let entry = engine.discard_migration("0001_init").await.unwrap();
    assert_eq!(entry.kind, TrashKind::Migration);
    assert!(!migration_dir.exists());
    assert!(engine.pending().await.unwrap().is_empty());
    assert_eq!(entry.metadata["migration"], "0001_init");

    engine.trash().restore(&entry.id).await.unwrap();
    assert_eq!(std::fs::read(migration_dir.join("up.sql")).unwrap(), up_before);
    assert_eq!(
        std::fs::read(migration_dir.join("migration.json")).unwrap(),
        meta_before
    );
    assert!(engine.trash().list_entries().await.unwrap().is_empty());
    assert_eq!(engine.pending().await.unwrap().len(), 1);
}

/// Entries are restorable for the retention period and no longer.
#[tokio::test]
async fn test_retention_window() {
    let dir = tempfile::tempdir().unwrap();
    let trash = TrashManager::new(dir.path().join(".trash")).with_retention_days(30);
    let deleted_at = Utc::now();

    let early = dir.path().join("early.sql");
    std::fs::write(&early, "SELECT 1;").unwrap();
    let kept = trash
        .move_to_trash_at(&early, TrashKind::Data, Default::default(), deleted_at)
        .await
        .unwrap();
    assert_eq!(kept.expires_at, deleted_at + Duration::days(30));

    trash
        .restore_at(&kept.id, deleted_at + Duration::days(29))
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&early).unwrap(), "SELECT 1;");

    let late = dir.path().join("late.sql");
    std::fs::write(&late, "SELECT 2;").unwrap();
    let lost = trash
        .move_to_trash_at(&late, TrashKind::Data, Default::default(), deleted_at)
        .await
        .unwrap();

    let err = trash
        .restore_at(&lost.id, deleted_at + Duration::days(31))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::TrashEntryExpired { .. }));
    assert!(!late.exists());

    let swept = trash
        .cleanup_expired_at(deleted_at + Duration::days(31), false)
        .await
        .unwrap();
    assert_eq!(swept, 1);
    assert!(matches!(
        trash.get(&lost.id).await.unwrap_err(),
        MigrationError::TrashEntryNotFound(_)
    ));
}

#[tokio::test]
async fn test_restore_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let trash = TrashManager::new(dir.path().join(".trash"));

    let path = dir.path().join("schema.sql");
    std::fs::write(&path, "old").unwrap();
    let entry = trash
        .move_to_trash(&path, TrashKind::Data, Default::default())
        .await
        .unwrap();

    std::fs::write(&path, "new").unwrap();
    assert!(trash.restore(&entry.id).await.is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    assert_eq!(trash.list_entries().await.unwrap().len(), 1);
}
