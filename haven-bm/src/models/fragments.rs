//! Per-block fragment availability
//!
//! Every block of a backup is stored as one Data and one Parity fragment per
//! supplier. A [`FileInventory`] records, for each backup and block, what we
//! know about each of those fragments. The same structure serves the remote
//! view (built from list-files replies) and the local view (built from the
//! `data-par` directory).

use haven_common::BackupId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// What we know about one fragment on one supplier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentStatus {
    /// No report yet
    #[default]
    Unknown,
    Present,
    Missing,
}

impl FragmentStatus {
    pub fn is_present(&self) -> bool {
        matches!(self, FragmentStatus::Present)
    }
}

/// Data or Parity half of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentKind {
    Data,
    Parity,
}

impl FragmentKind {
    pub const BOTH: [FragmentKind; 2] = [FragmentKind::Data, FragmentKind::Parity];

    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentKind::Data => "Data",
            FragmentKind::Parity => "Parity",
        }
    }
}

impl std::fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FragmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Data" => Ok(FragmentKind::Data),
            "Parity" => Ok(FragmentKind::Parity),
            other => Err(format!("expected Data or Parity, got {:?}", other)),
        }
    }
}

/// Data and Parity status for one block, indexed by supplier number
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockFragments {
    pub data: Vec<FragmentStatus>,
    pub parity: Vec<FragmentStatus>,
}

impl BlockFragments {
    pub fn unknown(supplier_count: usize) -> Self {
        Self {
            data: vec![FragmentStatus::Unknown; supplier_count],
            parity: vec![FragmentStatus::Unknown; supplier_count],
        }
    }

    pub fn get(&self, kind: FragmentKind) -> &[FragmentStatus] {
        match kind {
            FragmentKind::Data => &self.data,
            FragmentKind::Parity => &self.parity,
        }
    }

    pub fn get_mut(&mut self, kind: FragmentKind) -> &mut [FragmentStatus] {
        match kind {
            FragmentKind::Data => &mut self.data,
            FragmentKind::Parity => &mut self.parity,
        }
    }

    /// Status of one fragment; out-of-range suppliers read as Unknown
    pub fn status(&self, kind: FragmentKind, supplier_num: usize) -> FragmentStatus {
        self.get(kind)
            .get(supplier_num)
            .copied()
            .unwrap_or_default()
    }

    pub fn set(&mut self, kind: FragmentKind, supplier_num: usize, status: FragmentStatus) {
        if let Some(slot) = self.get_mut(kind).get_mut(supplier_num) {
            *slot = status;
        }
    }

    /// Present fragments held by one supplier (0, 1 or 2)
    pub fn present_for(&self, supplier_num: usize) -> u64 {
        FragmentKind::BOTH
            .iter()
            .filter(|kind| self.status(**kind, supplier_num).is_present())
            .count() as u64
    }
}

/// Fragment map of one backup
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackupFragments {
    pub blocks: BTreeMap<u32, BlockFragments>,
    /// Highest block number reported; `None` until a block is seen
    pub max_block: Option<u32>,
    /// Bytes on disk; only tracked for the local inventory
    pub size_bytes: u64,
}

impl BackupFragments {
    pub fn raise_max_block(&mut self, block: u32) {
        self.max_block = Some(self.max_block.map_or(block, |max| max.max(block)));
    }
}

/// Fragment knowledge for every backup, for a fixed number of suppliers
#[derive(Debug, Clone, PartialEq)]
pub struct FileInventory {
    supplier_count: usize,
    backups: BTreeMap<BackupId, BackupFragments>,
}

impl FileInventory {
    pub fn new(supplier_count: usize) -> Self {
        Self {
            supplier_count,
            backups: BTreeMap::new(),
        }
    }

    pub fn supplier_count(&self) -> usize {
        self.supplier_count
    }

    pub fn backup_ids(&self) -> impl Iterator<Item = &BackupId> {
        self.backups.keys()
    }

    pub fn len(&self) -> usize {
        self.backups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }

    pub fn contains(&self, backup_id: &BackupId) -> bool {
        self.backups.contains_key(backup_id)
    }

    pub fn get(&self, backup_id: &BackupId) -> Option<&BackupFragments> {
        self.backups.get(backup_id)
    }

    pub fn max_block(&self, backup_id: &BackupId) -> Option<u32> {
        self.backups.get(backup_id).and_then(|b| b.max_block)
    }

    pub fn block(&self, backup_id: &BackupId, block: u32) -> Option<&BlockFragments> {
        self.backups.get(backup_id)?.blocks.get(&block)
    }

    /// Block fragments, or an all-Unknown map when nothing is recorded
    pub fn block_or_unknown(&self, backup_id: &BackupId, block: u32) -> BlockFragments {
        self.block(backup_id, block)
            .cloned()
            .unwrap_or_else(|| BlockFragments::unknown(self.supplier_count))
    }

    /// Backup entry, created empty if absent
    pub fn backup_mut(&mut self, backup_id: &BackupId) -> &mut BackupFragments {
        self.backups.entry(backup_id.clone()).or_default()
    }

    /// Block entry, created all-Unknown if absent; does not touch `max_block`
    pub fn block_mut(&mut self, backup_id: &BackupId, block: u32) -> &mut BlockFragments {
        let supplier_count = self.supplier_count;
        self.backup_mut(backup_id)
            .blocks
            .entry(block)
            .or_insert_with(|| BlockFragments::unknown(supplier_count))
    }

    /// Record one fragment and raise the backup's max block if needed
    pub fn set_fragment(
        &mut self,
        backup_id: &BackupId,
        block: u32,
        kind: FragmentKind,
        supplier_num: usize,
        status: FragmentStatus,
    ) {
        self.block_mut(backup_id, block).set(kind, supplier_num, status);
        self.backup_mut(backup_id).raise_max_block(block);
    }

    /// Replace a whole block, e.g. with the outcome of a repair
    pub fn replace_block(&mut self, backup_id: &BackupId, block: u32, fragments: BlockFragments) {
        let entry = self.backup_mut(backup_id);
        entry.blocks.insert(block, fragments);
        entry.raise_max_block(block);
    }

    /// Create all-Unknown entries for blocks `0..=max_block` that are absent
    pub fn pad_blocks(&mut self, backup_id: &BackupId, max_block: Option<u32>) {
        let Some(max_block) = max_block else {
            self.backup_mut(backup_id);
            return;
        };
        for block in 0..=max_block {
            self.block_mut(backup_id, block);
        }
    }

    pub fn add_size(&mut self, backup_id: &BackupId, bytes: u64) {
        self.backup_mut(backup_id).size_bytes += bytes;
    }

    pub fn size_bytes(&self, backup_id: &BackupId) -> u64 {
        self.backups.get(backup_id).map_or(0, |b| b.size_bytes)
    }

    pub fn remove(&mut self, backup_id: &BackupId) -> bool {
        self.backups.remove(backup_id).is_some()
    }

    /// Forget what the given supplier positions hold, in every block
    pub fn reset_suppliers(&mut self, positions: &[usize]) {
        for backup in self.backups.values_mut() {
            for fragments in backup.blocks.values_mut() {
                for &position in positions {
                    fragments.set(FragmentKind::Data, position, FragmentStatus::Unknown);
                    fragments.set(FragmentKind::Parity, position, FragmentStatus::Unknown);
                }
            }
        }
    }
}
