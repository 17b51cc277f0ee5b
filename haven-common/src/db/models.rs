//! Database models

use crate::BackupId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the `backups` registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRecord {
    pub backup_id: BackupId,
    /// Source directory this backup was taken from
    pub dir_path: String,
    pub created_at: DateTime<Utc>,
    /// Set while the backup job is still writing
    pub running: bool,
    pub size_bytes: i64,
}
