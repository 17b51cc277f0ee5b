//! Local fragment files in the `data-par` directory
//!
//! Fragments produced by a backup job are kept locally as
//! `backupId-block-supplier-Kind` until every supplier has confirmed them.
//! Files prefixed `newblock-` are still being written and are never indexed.

use super::fragments::{FileInventory, FragmentKind, FragmentStatus};
use haven_common::{BackupId, Result};
use std::path::Path;
use tracing::{debug, warn};

pub const NEW_BLOCK_PREFIX: &str = "newblock-";

/// Parsed `backupId-block-supplier-Kind` file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentFileName {
    pub backup_id: BackupId,
    pub block: u32,
    pub supplier_num: usize,
    pub kind: FragmentKind,
}

impl FragmentFileName {
    pub fn new(backup_id: BackupId, block: u32, supplier_num: usize, kind: FragmentKind) -> Self {
        Self {
            backup_id,
            block,
            supplier_num,
            kind,
        }
    }

    pub fn parse(name: &str) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = name.split('-').collect();
        let [backup_id, block, supplier_num, kind] = parts.as_slice() else {
            return Err("expected 4 dash-separated fields".to_string());
        };
        Ok(Self {
            backup_id: BackupId::new(*backup_id).map_err(|e| e.to_string())?,
            block: block
                .parse()
                .map_err(|_| format!("bad block number {:?}", block))?,
            supplier_num: supplier_num
                .parse()
                .map_err(|_| format!("bad supplier number {:?}", supplier_num))?,
            kind: kind.parse()?,
        })
    }

    /// File name, also used as the packet id when uploading
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.backup_id, self.block, self.supplier_num, self.kind
        )
    }
}

/// Index every fragment file in `dir`
///
/// A missing directory yields an empty inventory. Files that do not parse,
/// that name a supplier position beyond `supplier_count` or a block at or
/// past `max_blocks`, are skipped.
pub fn scan_data_par(dir: &Path, supplier_count: usize, max_blocks: u32) -> Result<FileInventory> {
    let mut local = FileInventory::new(supplier_count);
    if !dir.exists() {
        return Ok(local);
    }

    let mut indexed = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!("Skipping non UTF-8 file name in {}", dir.display());
            continue;
        };
        if name.starts_with(NEW_BLOCK_PREFIX) {
            continue;
        }
        let fragment = match FragmentFileName::parse(name) {
            Ok(fragment) => fragment,
            Err(reason) => {
                warn!("Incorrect fragment file name {}: {}", name, reason);
                continue;
            }
        };
        if fragment.supplier_num >= supplier_count {
            warn!(
                "Fragment {} names supplier {} but only {} suppliers are configured",
                name, fragment.supplier_num, supplier_count
            );
            continue;
        }
        if fragment.block >= max_blocks {
            warn!("Fragment {} is past the {} block limit", name, max_blocks);
            continue;
        }

        local.set_fragment(
            &fragment.backup_id,
            fragment.block,
            fragment.kind,
            fragment.supplier_num,
            FragmentStatus::Present,
        );
        local.add_size(&fragment.backup_id, entry.metadata()?.len());
        indexed += 1;
    }

    debug!("{} local fragment files indexed in {}", indexed, dir.display());
    Ok(local)
}

/// Remove every local fragment of one backup, returning (files, bytes)
///
/// Files that vanish or cannot be removed are logged and skipped so a partial
/// earlier deletion can be finished by a later call.
pub fn delete_local_backup(dir: &Path, backup_id: &BackupId) -> Result<(u64, u64)> {
    if !dir.exists() {
        return Ok((0, 0));
    }

    let prefix = format!("{}-", backup_id);
    let mut files = 0u64;
    let mut bytes = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(&prefix));
        if !matches {
            continue;
        }
        let path = entry.path();
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                files += 1;
                bytes += size;
            }
            Err(e) => warn!("Can not remove {}: {}", path.display(), e),
        }
    }

    debug!("Removed {} local files ({} bytes) of {}", files, bytes, backup_id);
    Ok((files, bytes))
}
