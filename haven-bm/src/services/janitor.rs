//! Backup deletion
//!
//! Used both by the retention pass and by `DELETE /api/backups/{id}`.

use super::rebuilder::BackupRebuilder;
use super::registry::BackupRegistry;
use crate::models::local_files::delete_local_backup;
use crate::state::SharedInventory;
use haven_common::events::{EventBus, HavenEvent};
use haven_common::{time, BackupId, Error, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// What one deletion touched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    /// False if the registry had no record (already deleted)
    pub registry_deleted: bool,
    pub files_removed: u64,
    pub bytes_freed: u64,
}

pub struct BackupJanitor {
    registry: Arc<dyn BackupRegistry>,
    inventory: SharedInventory,
    rebuilder: Arc<dyn BackupRebuilder>,
    event_bus: EventBus,
    data_par_dir: PathBuf,
}

impl BackupJanitor {
    pub fn new(
        registry: Arc<dyn BackupRegistry>,
        inventory: SharedInventory,
        rebuilder: Arc<dyn BackupRebuilder>,
        event_bus: EventBus,
        data_par_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            inventory,
            rebuilder,
            event_bus,
            data_par_dir,
        }
    }

    pub fn registry(&self) -> &Arc<dyn BackupRegistry> {
        &self.registry
    }

    /// Forget a backup everywhere
    ///
    /// Safe to repeat: a backup that is no longer running, queued or
    /// registered is simply skipped at that step.
    pub async fn delete_backup(&self, backup_id: &BackupId, remove_local: bool) -> Result<DeleteReport> {
        if self.registry.abort_running_backup(backup_id).await? {
            info!("Aborted running backup {}", backup_id);
        }
        self.inventory.remove_in_process(backup_id).await;

        let unqueued = self.rebuilder.remove_backup_work(backup_id);
        if unqueued > 0 {
            debug!("Removed {} queued rebuilds of {}", unqueued, backup_id);
        }

        {
            let mut state = self.inventory.write().await;
            state.remote.remove(backup_id);
            state.dirty.remove(backup_id);
        }

        // record last, so a failed local delete is retried next pass
        let (files_removed, bytes_freed) = if remove_local {
            let dir = self.data_par_dir.clone();
            let id = backup_id.clone();
            let removed = tokio::task::spawn_blocking(move || delete_local_backup(&dir, &id))
                .await
                .map_err(|e| Error::Internal(format!("local delete task failed: {}", e)))??;
            self.inventory.write().await.local.remove(backup_id);
            removed
        } else {
            (0, 0)
        };

        let registry_deleted = self.registry.delete_backup(backup_id).await?;

        info!(
            "Deleted backup {} ({} local files, {} bytes)",
            backup_id, files_removed, bytes_freed
        );
        self.event_bus.emit_lossy(HavenEvent::BackupDeleted {
            backup_id: backup_id.clone(),
            files_removed,
            bytes_freed,
            timestamp: time::now(),
        });

        Ok(DeleteReport {
            registry_deleted,
            files_removed,
            bytes_freed,
        })
    }
}
