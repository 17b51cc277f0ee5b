//! Retention against the SQLite registry
//!
//! Each test builds a fresh database and data-par directory, registers a set
//! of backups and runs one or more retention passes through the janitor.

use haven_bm::db::backups::{get_backup, list_backups, register_backup};
use haven_bm::db::SqliteBackupRegistry;
use haven_bm::models::{FragmentKind, FragmentStatus};
use haven_bm::monitor::retention::clean_up_backups;
use haven_bm::monitor::MonitorHandle;
use haven_bm::services::{
    BackupJanitor, BackupRebuilder, BackupRegistry, LocalCopyRepair, OfflineTransport,
    QueueRebuilder, SupplierTransport,
};
use haven_bm::state::SharedInventory;
use haven_common::db::init::init_database;
use haven_common::events::EventBus;
use haven_common::{BackupId, Error, Result};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _root: TempDir,
    pool: SqlitePool,
    inventory: SharedInventory,
    rebuilder: Arc<QueueRebuilder>,
    janitor: BackupJanitor,
    data_par: std::path::PathBuf,
}

fn id(raw: &str) -> BackupId {
    BackupId::new(raw).unwrap()
}

/// SQLite registry that refuses to delete one id
struct FailingDelete {
    inner: SqliteBackupRegistry,
    refuse: BackupId,
}

#[async_trait::async_trait]
impl BackupRegistry for FailingDelete {
    async fn backup_ids(&self) -> Result<BTreeSet<BackupId>> {
        self.inner.backup_ids().await
    }
    async fn running_ids(&self) -> Result<BTreeSet<BackupId>> {
        self.inner.running_ids().await
    }
    async fn dir_groups(&self) -> Result<BTreeMap<String, Vec<BackupId>>> {
        self.inner.dir_groups().await
    }
    async fn abort_running_backup(&self, backup_id: &BackupId) -> Result<bool> {
        self.inner.abort_running_backup(backup_id).await
    }
    async fn delete_backup(&self, backup_id: &BackupId) -> Result<bool> {
        if *backup_id == self.refuse {
            return Err(Error::Internal("database is locked".to_string()));
        }
        self.inner.delete_backup(backup_id).await
    }
}

async fn setup() -> Fixture {
    setup_with(|registry| Arc::new(registry)).await
}

async fn setup_with(wrap: impl FnOnce(SqliteBackupRegistry) -> Arc<dyn BackupRegistry>) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let pool = init_database(&root.path().join("haven.db")).await.unwrap();
    let data_par = root.path().join("data-par");
    std::fs::create_dir_all(&data_par).unwrap();

    let inventory = SharedInventory::new(vec!["s0".to_string(), "s1".to_string()]);
    let event_bus = EventBus::new(64);
    let (monitor, _inbox) = MonitorHandle::channel();
    let transport: Arc<dyn SupplierTransport> = Arc::new(OfflineTransport);

    // never started; only its queue is exercised
    let rebuilder = Arc::new(QueueRebuilder::new(
        inventory.clone(),
        Arc::new(LocalCopyRepair::new(transport.clone(), data_par.clone())),
        transport,
        monitor,
        event_bus.clone(),
    ));
    let janitor = BackupJanitor::new(
        wrap(SqliteBackupRegistry::new(pool.clone())),
        inventory.clone(),
        rebuilder.clone(),
        event_bus,
        data_par.clone(),
    );

    Fixture {
        _root: root,
        pool,
        inventory,
        rebuilder,
        janitor,
        data_par,
    }
}

async fn remaining(pool: &SqlitePool) -> Vec<String> {
    list_backups(pool)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.backup_id.to_string())
        .collect()
}

#[tokio::test]
async fn test_keeps_newest_per_directory() {
    let fx = setup().await;
    for raw in ["b1", "b2", "b3", "b4", "b5"] {
        register_backup(&fx.pool, &id(raw), "/home", false).await.unwrap();
    }

    let result = clean_up_backups(&fx.janitor, 3).await.unwrap();

    assert_eq!(result.backups_deleted, 2);
    assert!(result.failed.is_empty());
    assert_eq!(remaining(&fx.pool).await, vec!["b3", "b4", "b5"]);
}

#[tokio::test]
async fn test_running_backup_is_aborted_then_deleted() {
    let fx = setup().await;
    register_backup(&fx.pool, &id("b1"), "/home", true).await.unwrap();
    register_backup(&fx.pool, &id("b2"), "/home", false).await.unwrap();
    fx.inventory.add_in_process(id("b1")).await;

    clean_up_backups(&fx.janitor, 1).await.unwrap();

    assert!(get_backup(&fx.pool, &id("b1")).await.unwrap().is_none());
    assert!(!fx.inventory.is_in_process(&id("b1")).await);
    assert_eq!(remaining(&fx.pool).await, vec!["b2"]);
}

#[tokio::test]
async fn test_local_fragments_and_queue_entries_are_removed() {
    let fx = setup().await;
    register_backup(&fx.pool, &id("b1"), "/home", false).await.unwrap();
    register_backup(&fx.pool, &id("b2"), "/home", false).await.unwrap();

    std::fs::write(fx.data_par.join("b1-0-0-Data"), b"0123456789").unwrap();
    std::fs::write(fx.data_par.join("b1-0-1-Parity"), b"01234").unwrap();
    std::fs::write(fx.data_par.join("b2-0-0-Data"), b"keep").unwrap();
    {
        let mut state = fx.inventory.write().await;
        state
            .remote
            .set_fragment(&id("b1"), 0, FragmentKind::Data, 0, FragmentStatus::Present);
        state
            .local
            .set_fragment(&id("b1"), 0, FragmentKind::Data, 0, FragmentStatus::Present);
    }
    fx.rebuilder.add_backups_to_work(vec![id("b2"), id("b1")]);

    let result = clean_up_backups(&fx.janitor, 1).await.unwrap();

    assert_eq!(result.backups_deleted, 1);
    assert_eq!(result.files_removed, 2);
    assert_eq!(result.bytes_freed, 15);
    assert!(!fx.data_par.join("b1-0-0-Data").exists());
    assert!(fx.data_par.join("b2-0-0-Data").exists());
    assert_eq!(fx.rebuilder.queued(), vec![id("b2")]);

    let state = fx.inventory.read().await;
    assert!(!state.remote.contains(&id("b1")));
    assert!(!state.local.contains(&id("b1")));
}

#[tokio::test]
async fn test_second_pass_deletes_nothing() {
    let fx = setup().await;
    for raw in ["b1", "b2", "b3"] {
        register_backup(&fx.pool, &id(raw), "/home", false).await.unwrap();
    }

    let first = clean_up_backups(&fx.janitor, 2).await.unwrap();
    let second = clean_up_backups(&fx.janitor, 2).await.unwrap();

    assert_eq!(first.backups_deleted, 1);
    assert_eq!(second.backups_deleted, 0);
    assert_eq!(remaining(&fx.pool).await, vec!["b2", "b3"]);
}

#[tokio::test]
async fn test_other_directories_are_untouched() {
    let fx = setup().await;
    for raw in ["a1", "a2", "a3"] {
        register_backup(&fx.pool, &id(raw), "/home", false).await.unwrap();
    }
    register_backup(&fx.pool, &id("c1"), "/etc", false).await.unwrap();

    clean_up_backups(&fx.janitor, 2).await.unwrap();

    assert_eq!(remaining(&fx.pool).await, vec!["a2", "a3", "c1"]);
}

#[tokio::test]
async fn test_keep_zero_keeps_one() {
    let fx = setup().await;
    for raw in ["b1", "b2", "b3"] {
        register_backup(&fx.pool, &id(raw), "/home", false).await.unwrap();
    }

    clean_up_backups(&fx.janitor, 0).await.unwrap();

    assert_eq!(remaining(&fx.pool).await, vec!["b3"]);
}

#[tokio::test]
async fn test_dated_ids_sort_by_timestamp() {
    let fx = setup().await;
    // 11 PM on the 9th is older than 1 AM on the 10th
    for raw in ["F20090710010000AM", "F20090709110000PM", "F20090710020000AM"] {
        register_backup(&fx.pool, &id(raw), "/home", false).await.unwrap();
    }

    clean_up_backups(&fx.janitor, 2).await.unwrap();

    assert!(get_backup(&fx.pool, &id("F20090709110000PM")).await.unwrap().is_none());
    assert_eq!(remaining(&fx.pool).await.len(), 2);
}

#[tokio::test]
async fn test_failed_delete_does_not_stop_the_pass() {
    let fx = setup_with(|registry| {
        Arc::new(FailingDelete {
            inner: registry,
            refuse: id("b2"),
        })
    })
    .await;
    for raw in ["b1", "b2", "b3", "b4"] {
        register_backup(&fx.pool, &id(raw), "/home", false).await.unwrap();
    }

    let result = clean_up_backups(&fx.janitor, 1).await.unwrap();

    assert_eq!(result.backups_deleted, 2);
    assert_eq!(result.failed, vec![id("b2")]);
    assert_eq!(remaining(&fx.pool).await, vec!["b2", "b4"]);
}

#[tokio::test]
async fn test_failed_local_delete_keeps_record_for_next_pass() {
    let fx = setup().await;
    register_backup(&fx.pool, &id("b1"), "/home", false).await.unwrap();
    register_backup(&fx.pool, &id("b2"), "/home", false).await.unwrap();
    // a plain file where the fragment directory should be
    std::fs::remove_dir_all(&fx.data_par).unwrap();
    std::fs::write(&fx.data_par, b"not a directory").unwrap();

    let first = clean_up_backups(&fx.janitor, 1).await.unwrap();

    assert_eq!(first.failed, vec![id("b1")]);
    assert_eq!(remaining(&fx.pool).await, vec!["b1", "b2"]);

    std::fs::remove_file(&fx.data_par).unwrap();
    std::fs::create_dir_all(&fx.data_par).unwrap();
    std::fs::write(fx.data_par.join("b1-0-0-Data"), b"0123").unwrap();

    let second = clean_up_backups(&fx.janitor, 1).await.unwrap();

    assert_eq!(second.backups_deleted, 1);
    assert_eq!(second.files_removed, 1);
    assert!(second.failed.is_empty());
    assert_eq!(remaining(&fx.pool).await, vec!["b2"]);
}
