//! Per-directory retention
//!
//! Keeps the `keep` most recent backups of every source directory and deletes
//! the rest, oldest first. Repair state plays no part in the decision.

use crate::services::janitor::BackupJanitor;
use haven_common::{BackupId, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Totals of one retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionResult {
    pub backups_deleted: u64,
    pub files_removed: u64,
    pub bytes_freed: u64,
    /// Ids whose deletion failed; retried on the next pass
    pub failed: Vec<BackupId>,
}

/// Ids to delete so that each group keeps at most `keep` (at least 1) newest
pub fn plan_retention(groups: &BTreeMap<String, Vec<BackupId>>, keep: usize) -> Vec<BackupId> {
    let keep = keep.max(1);
    let mut doomed = Vec::new();
    for ids in groups.values() {
        let mut ids = ids.clone();
        ids.sort();
        ids.dedup();
        let excess = ids.len().saturating_sub(keep);
        doomed.extend(ids.into_iter().take(excess));
    }
    doomed
}

/// Run one retention pass against the registry
///
/// Each doomed backup is aborted if still running, then deleted with its local
/// fragments. A failure is logged and the pass moves on.
pub async fn clean_up_backups(janitor: &BackupJanitor, keep: usize) -> Result<RetentionResult> {
    let groups = janitor.registry().dir_groups().await?;
    let doomed = plan_retention(&groups, keep);
    let mut result = RetentionResult::default();

    for backup_id in doomed {
        match janitor.delete_backup(&backup_id, true).await {
            Ok(report) => {
                result.backups_deleted += 1;
                result.files_removed += report.files_removed;
                result.bytes_freed += report.bytes_freed;
            }
            Err(e) => {
                warn!("Retention could not delete {}: {}", backup_id, e);
                result.failed.push(backup_id);
            }
        }
    }

    info!(
        "Retention kept {} per directory: {} backups deleted, {} bytes freed",
        keep.max(1),
        result.backups_deleted,
        result.bytes_freed
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<BackupId> {
        raw.iter().map(|r| BackupId::new(*r).unwrap()).collect()
    }

    #[test]
    fn test_keeps_newest_n() {
        let groups = BTreeMap::from([("/home".to_string(), ids(&["b3", "b1", "b5", "b2", "b4"]))]);
        assert_eq!(plan_retention(&groups, 3), ids(&["b1", "b2"]));
    }

    #[test]
    fn test_groups_are_independent() {
        let groups = BTreeMap::from([
            ("/a".to_string(), ids(&["a1", "a2", "a3"])),
            ("/b".to_string(), ids(&["b1"])),
        ]);
        assert_eq!(plan_retention(&groups, 1), ids(&["a1", "a2"]));
    }

    #[test]
    fn test_keep_zero_is_clamped_to_one() {
        let groups = BTreeMap::from([("/a".to_string(), ids(&["a1", "a2"]))]);
        assert_eq!(plan_retention(&groups, 0), ids(&["a1"]));
    }

    #[test]
    fn test_small_groups_untouched() {
        let groups = BTreeMap::from([("/a".to_string(), ids(&["a1", "a2"]))]);
        assert!(plan_retention(&groups, 2).is_empty());
        assert!(plan_retention(&BTreeMap::new(), 2).is_empty());
    }

    #[test]
    fn test_oldest_is_chronological() {
        let groups = BTreeMap::from([(
            "/a".to_string(),
            ids(&["F20090709010000PM", "F20090709110000AM"]),
        )]);
        assert_eq!(plan_retention(&groups, 1), ids(&["F20090709110000AM"]));
    }
}
