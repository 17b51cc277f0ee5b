//! Backup registry on SQLite
//!
//! The backup job registers each backup here with its source directory and
//! clears `running` when it finishes. The monitor only reads, aborts and
//! deletes.

use crate::services::BackupRegistry;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use haven_common::db::models::BackupRecord;
use haven_common::{BackupId, Result};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

type BackupRow = (String, String, NaiveDateTime, bool, i64);

fn record_from_row(row: BackupRow) -> Result<BackupRecord> {
    let (backup_id, dir_path, created_at, running, size_bytes) = row;
    Ok(BackupRecord {
        backup_id: BackupId::new(backup_id)?,
        dir_path,
        created_at: created_at.and_utc(),
        running,
        size_bytes,
    })
}

/// Insert or refresh a backup record
pub async fn register_backup(
    db: &SqlitePool,
    backup_id: &BackupId,
    dir_path: &str,
    running: bool,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO backups (backup_id, dir_path, running) VALUES (?, ?, ?)
         ON CONFLICT(backup_id) DO UPDATE SET dir_path = excluded.dir_path, running = excluded.running",
    )
    .bind(backup_id.as_str())
    .bind(dir_path)
    .bind(running)
    .execute(db)
    .await?;
    Ok(())
}

/// Mark a backup job finished and record its size
pub async fn finish_backup(db: &SqlitePool, backup_id: &BackupId, size_bytes: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE backups SET running = 0, size_bytes = ? WHERE backup_id = ?")
        .bind(size_bytes)
        .bind(backup_id.as_str())
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_backup(db: &SqlitePool, backup_id: &BackupId) -> Result<Option<BackupRecord>> {
    let row: Option<BackupRow> = sqlx::query_as(
        "SELECT backup_id, dir_path, created_at, running, size_bytes FROM backups WHERE backup_id = ?",
    )
    .bind(backup_id.as_str())
    .fetch_optional(db)
    .await?;
    row.map(record_from_row).transpose()
}

/// Every record with a well-formed id, in id order
pub async fn list_backups(db: &SqlitePool) -> Result<Vec<BackupRecord>> {
    let rows: Vec<BackupRow> = sqlx::query_as(
        "SELECT backup_id, dir_path, created_at, running, size_bytes FROM backups",
    )
    .fetch_all(db)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let raw = row.0.clone();
        match record_from_row(row) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Ignoring registry row {:?}: {}", raw, e),
        }
    }
    records.sort_by(|a, b| a.backup_id.cmp(&b.backup_id));
    Ok(records)
}

/// [`BackupRegistry`] over the `backups` table
#[derive(Debug, Clone)]
pub struct SqliteBackupRegistry {
    db: SqlitePool,
}

impl SqliteBackupRegistry {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }
}

#[async_trait]
impl BackupRegistry for SqliteBackupRegistry {
    async fn backup_ids(&self) -> Result<BTreeSet<BackupId>> {
        Ok(list_backups(&self.db)
            .await?
            .into_iter()
            .map(|record| record.backup_id)
            .collect())
    }

    async fn running_ids(&self) -> Result<BTreeSet<BackupId>> {
        Ok(list_backups(&self.db)
            .await?
            .into_iter()
            .filter(|record| record.running)
            .map(|record| record.backup_id)
            .collect())
    }

    async fn dir_groups(&self) -> Result<BTreeMap<String, Vec<BackupId>>> {
        let mut groups: BTreeMap<String, Vec<BackupId>> = BTreeMap::new();
        for record in list_backups(&self.db).await? {
            groups.entry(record.dir_path).or_default().push(record.backup_id);
        }
        Ok(groups)
    }

    async fn abort_running_backup(&self, backup_id: &BackupId) -> Result<bool> {
        let result = sqlx::query("UPDATE backups SET running = 0 WHERE backup_id = ? AND running = 1")
            .bind(backup_id.as_str())
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_backup(&self, backup_id: &BackupId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM backups WHERE backup_id = ?")
            .bind(backup_id.as_str())
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
