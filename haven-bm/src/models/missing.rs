//! Missing-block detection
//!
//! Only suppliers that are online count: a block missing on an offline
//! supplier cannot be repaired now, so it is not scheduled.

use super::fragments::{FileInventory, FragmentKind};
use haven_common::BackupId;
use std::collections::BTreeSet;
use tracing::debug;

/// Blocks of `backup_id` that need work, ascending
///
/// Without any remote info every local block holding a fragment for an active
/// supplier is due to be sent. With remote info, every block up to the larger
/// of the remote and local max is checked, and a block is missing when the
/// remote map lacks it or an active supplier lacks its Data or Parity.
pub fn scan_missing_blocks(
    remote: &FileInventory,
    local: &FileInventory,
    backup_id: &BackupId,
    active: &[bool],
) -> Vec<u32> {
    let mut missing = BTreeSet::new();
    let active_suppliers: Vec<usize> = active
        .iter()
        .enumerate()
        .filter(|(_, online)| **online)
        .map(|(num, _)| num)
        .collect();

    match remote.get(backup_id) {
        None => {
            let Some(local_max) = local.max_block(backup_id) else {
                debug!("No local and no remote info for {}", backup_id);
                return Vec::new();
            };
            for block in 0..=local_max {
                let Some(fragments) = local.block(backup_id, block) else {
                    continue;
                };
                let has_local = active_suppliers.iter().any(|&s| {
                    FragmentKind::BOTH
                        .iter()
                        .any(|kind| fragments.status(*kind, s).is_present())
                });
                if has_local {
                    missing.insert(block);
                }
            }
        }
        Some(backup) => {
            let max_block = match (backup.max_block, local.max_block(backup_id)) {
                (Some(r), Some(l)) => Some(r.max(l)),
                (r, l) => r.or(l),
            };
            let Some(max_block) = max_block else {
                return Vec::new();
            };
            for block in 0..=max_block {
                let Some(fragments) = backup.blocks.get(&block) else {
                    missing.insert(block);
                    continue;
                };
                let incomplete = active_suppliers.iter().any(|&s| {
                    FragmentKind::BOTH
                        .iter()
                        .any(|kind| !fragments.status(*kind, s).is_present())
                });
                if incomplete {
                    missing.insert(block);
                }
            }
        }
    }

    debug!("{} missing blocks in {}: {:?}", missing.len(), backup_id, missing);
    missing.into_iter().collect()
}
