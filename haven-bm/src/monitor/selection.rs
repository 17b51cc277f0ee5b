//! Rebuild candidate selection

use haven_common::backup_id::sort_newest_first;
use haven_common::BackupId;
use std::collections::BTreeSet;

/// Backups worth rebuilding this cycle, newest first
///
/// `known` is the union of local and remote inventory ids. Ids the registry
/// does not know are stale and dropped; ids still being written (in process or
/// flagged running) are left alone until their job finishes.
pub fn select_rebuild_candidates(
    known: &BTreeSet<BackupId>,
    registry: &BTreeSet<BackupId>,
    in_process: &BTreeSet<BackupId>,
    running: &BTreeSet<BackupId>,
) -> Vec<BackupId> {
    let mut candidates: Vec<BackupId> = known
        .intersection(registry)
        .filter(|id| !in_process.contains(*id) && !running.contains(*id))
        .cloned()
        .collect();
    sort_newest_first(&mut candidates);
    candidates
}
