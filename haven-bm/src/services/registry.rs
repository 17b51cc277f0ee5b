//! Backup registry seam
//!
//! The registry is the authority on which backups exist, which directory each
//! belongs to, and whether its backup job is still running.

use async_trait::async_trait;
use haven_common::{BackupId, Result};
use std::collections::{BTreeMap, BTreeSet};

#[async_trait]
pub trait BackupRegistry: Send + Sync {
    /// Every registered backup id
    async fn backup_ids(&self) -> Result<BTreeSet<BackupId>>;

    /// Ids whose backup job has not finished
    async fn running_ids(&self) -> Result<BTreeSet<BackupId>>;

    /// Registered ids grouped by source directory
    async fn dir_groups(&self) -> Result<BTreeMap<String, Vec<BackupId>>>;

    /// Clear the running flag; `false` if the backup was not running
    async fn abort_running_backup(&self, backup_id: &BackupId) -> Result<bool>;

    /// Remove the record; `false` if it did not exist
    async fn delete_backup(&self, backup_id: &BackupId) -> Result<bool>;
}
