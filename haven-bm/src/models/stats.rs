//! Backup availability statistics
//!
//! A supplier holding both fragments of every block of a backup accounts for
//! `100 / supplier_count` percent of it; Data and Parity weigh half each.

use super::fragments::FileInventory;
use haven_common::BackupId;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SupplierStat {
    pub percent: f64,
    pub files: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupStats {
    pub total_files: u64,
    pub max_block: Option<u32>,
    pub suppliers: Vec<SupplierStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalBackupStats {
    pub total_files: u64,
    pub total_bytes: u64,
    pub max_block: Option<u32>,
    pub suppliers: Vec<SupplierStat>,
}

/// Per-supplier fragment counts and completion for one backup
pub fn backup_stats(inventory: &FileInventory, backup_id: &BackupId) -> BackupStats {
    let supplier_count = inventory.supplier_count();
    let Some(backup) = inventory.get(backup_id) else {
        return BackupStats {
            total_files: 0,
            max_block: None,
            suppliers: vec![SupplierStat { percent: 0.0, files: 0 }; supplier_count],
        };
    };

    let mut files = vec![0u64; supplier_count];
    for fragments in backup.blocks.values() {
        for (supplier_num, count) in files.iter_mut().enumerate() {
            *count += fragments.present_for(supplier_num);
        }
    }

    let per_supplier = if supplier_count == 0 {
        0.0
    } else {
        100.0 / supplier_count as f64
    };
    let suppliers = files
        .iter()
        .map(|&count| SupplierStat {
            percent: match backup.max_block {
                Some(max) => per_supplier * 0.5 * count as f64 / (max as f64 + 1.0),
                None => 0.0,
            },
            files: count,
        })
        .collect();

    BackupStats {
        total_files: files.iter().sum(),
        max_block: backup.max_block,
        suppliers,
    }
}

/// Same as [`backup_stats`] over the local inventory, plus bytes on disk
pub fn local_backup_stats(local: &FileInventory, backup_id: &BackupId) -> LocalBackupStats {
    let stats = backup_stats(local, backup_id);
    LocalBackupStats {
        total_files: stats.total_files,
        total_bytes: local.size_bytes(backup_id),
        max_block: stats.max_block,
        suppliers: stats.suppliers,
    }
}

/// Number of blocks known remotely and overall completion percent
pub fn blocks_and_percent(remote: &FileInventory, backup_id: &BackupId) -> (u64, f64) {
    let supplier_count = remote.supplier_count();
    let (Some(backup), Some(max_block)) = (remote.get(backup_id), remote.max_block(backup_id)) else {
        return (0, 0.0);
    };
    if supplier_count == 0 {
        return (0, 0.0);
    }

    let files: u64 = backup
        .blocks
        .values()
        .map(|fragments| (0..supplier_count).map(|s| fragments.present_for(s)).sum::<u64>())
        .sum();
    let blocks = max_block as u64 + 1;
    let percent = 100.0 * 0.5 * files as f64 / (blocks * supplier_count as u64) as f64;
    (blocks, percent)
}
