//! Supplier list-files replies
//!
//! A supplier answers a list-files request with one line per fragment series
//! it stores for us:
//!
//! ```text
//! F20090709034221PM-0-Data from 0-1000
//! F20090709034221PM-0-Parity from 0-1000 missing 1,3,
//! ```
//!
//! The first word is `backupId-supplierNum-Kind`, the third is `min-max`, and
//! an optional `missing a,b,c,` tail lists blocks in that range the supplier
//! lost.

use super::fragments::{FileInventory, FragmentKind, FragmentStatus};
use haven_common::BackupId;
use std::collections::BTreeSet;
use tracing::warn;

/// File name of the backup descriptor that suppliers also list
pub const BACKUP_INFO_FILE: &str = "backup_info.xml";

/// Highest block count accepted for one backup unless configured otherwise
pub const DEFAULT_MAX_BLOCKS: u32 = 100_000;

/// One parsed line of a list-files reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilesLine {
    pub backup_id: BackupId,
    pub supplier_num: usize,
    pub kind: FragmentKind,
    pub max_block: u32,
    pub missing: BTreeSet<u32>,
}

/// Parse one non-blank line
///
/// Block numbers must stay below `max_blocks`.
pub fn parse_line(line: &str, max_blocks: u32) -> Result<ListFilesLine, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.len() < 3 {
        return Err("expected at least 3 words".to_string());
    }

    let mut head = words[0].split('-');
    let (Some(backup_id), Some(supplier_num), Some(kind), None) =
        (head.next(), head.next(), head.next(), head.next())
    else {
        return Err(format!("bad fragment series {:?}", words[0]));
    };
    let backup_id = BackupId::new(backup_id).map_err(|e| e.to_string())?;
    let supplier_num = supplier_num
        .parse::<usize>()
        .map_err(|_| format!("bad supplier number {:?}", supplier_num))?;
    let kind = kind.parse::<FragmentKind>()?;

    let Some((min, max)) = words[2].split_once('-') else {
        return Err(format!("bad block range {:?}", words[2]));
    };
    let min_block = min
        .parse::<u32>()
        .map_err(|_| format!("bad min block {:?}", min))?;
    let max_block = max
        .parse::<u32>()
        .map_err(|_| format!("bad max block {:?}", max))?;
    if min_block > max_block {
        return Err(format!("empty block range {:?}", words[2]));
    }
    if max_block >= max_blocks {
        return Err(format!("max block {} over limit {}", max_block, max_blocks));
    }

    let mut missing = BTreeSet::new();
    if words.len() == 5 {
        if words[3] != "missing" {
            return Err(format!("expected 'missing', got {:?}", words[3]));
        }
        for item in words[4].split(',').filter(|item| !item.is_empty()) {
            let block = item
                .parse::<u32>()
                .map_err(|_| format!("bad missing block {:?}", item))?;
            missing.insert(block);
        }
    }

    Ok(ListFilesLine {
        backup_id,
        supplier_num,
        kind,
        max_block,
        missing,
    })
}

/// Result of parsing a whole reply from one supplier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilesReport {
    /// Lines describing the sending supplier's own fragments
    pub lines: Vec<ListFilesLine>,
    /// Well-formed lines for another supplier number (stale files)
    pub foreign: usize,
    pub malformed: usize,
}

impl ListFilesReport {
    pub fn backup_ids(&self) -> BTreeSet<BackupId> {
        self.lines.iter().map(|l| l.backup_id.clone()).collect()
    }
}

/// Parse a full reply from supplier `supplier_num`
///
/// Blank lines, the supplier's own identity and the backup descriptor file are
/// skipped. Malformed lines, including those naming blocks at or past
/// `max_blocks`, are logged and counted, never fatal.
pub fn parse_list_files(
    text: &str,
    supplier_num: usize,
    supplier_identity: &str,
    max_blocks: u32,
) -> ListFilesReport {
    let mut report = ListFilesReport::default();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line == supplier_identity || line == BACKUP_INFO_FILE {
            continue;
        }
        match parse_line(line, max_blocks) {
            Ok(parsed) if parsed.supplier_num != supplier_num => report.foreign += 1,
            Ok(parsed) => report.lines.push(parsed),
            Err(reason) => {
                warn!("Incorrect list-files line from supplier {} [{}]: {}", supplier_num, line, reason);
                report.malformed += 1;
            }
        }
    }

    report
}

/// Record one line in the remote inventory
///
/// Every block `0..=max_block` of that series becomes Present for the supplier,
/// except those listed as missing.
pub fn apply_line(remote: &mut FileInventory, line: &ListFilesLine) {
    for block in 0..=line.max_block {
        let status = if line.missing.contains(&block) {
            FragmentStatus::Missing
        } else {
            FragmentStatus::Present
        };
        remote.set_fragment(&line.backup_id, block, line.kind, line.supplier_num, status);
    }
}
