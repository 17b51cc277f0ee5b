//! Repair of a single block
//!
//! The erasure decoder that regenerates lost fragments is an external
//! component. What this crate can do on its own is re-send fragments that
//! still exist in `data-par` to suppliers that do not have them.

use super::transport::SupplierTransport;
use crate::models::local_files::FragmentFileName;
use crate::models::{BlockFragments, FragmentKind, FragmentStatus, RemoteTest};
use async_trait::async_trait;
use haven_common::{BackupId, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything known about one block at the time it is repaired
#[derive(Debug, Clone)]
pub struct BlockJob {
    pub backup_id: BackupId,
    pub block: u32,
    /// Identities by position
    pub suppliers: Vec<String>,
    /// Online flag by position
    pub active: Vec<bool>,
    pub remote: BlockFragments,
    pub local: BlockFragments,
}

/// Result of repairing one block
#[derive(Debug, Clone)]
pub struct BlockOutcome {
    /// Remote fragment map after the repair
    pub remote: BlockFragments,
    /// Remote test result per (position, kind) that was examined
    pub tests: Vec<(usize, RemoteTest)>,
    pub uploaded: u64,
}

#[async_trait]
pub trait BlockRepair: Send + Sync {
    async fn repair_block(&self, job: BlockJob) -> Result<BlockOutcome>;
}

/// Re-sends local fragment copies
pub struct LocalCopyRepair {
    transport: Arc<dyn SupplierTransport>,
    data_par_dir: PathBuf,
}

impl LocalCopyRepair {
    pub fn new(transport: Arc<dyn SupplierTransport>, data_par_dir: PathBuf) -> Self {
        Self {
            transport,
            data_par_dir,
        }
    }
}

#[async_trait]
impl BlockRepair for LocalCopyRepair {
    async fn repair_block(&self, job: BlockJob) -> Result<BlockOutcome> {
        let mut remote = job.remote.clone();
        let mut tests = Vec::new();
        let mut uploaded = 0u64;

        for (supplier_num, identity) in job.suppliers.iter().enumerate() {
            if !job.active.get(supplier_num).copied().unwrap_or(false) {
                continue;
            }
            for kind in FragmentKind::BOTH {
                if remote.status(kind, supplier_num).is_present() {
                    tests.push((supplier_num, RemoteTest::Success));
                    continue;
                }
                if !job.local.status(kind, supplier_num).is_present() {
                    tests.push((supplier_num, RemoteTest::NoData));
                    continue;
                }

                let fragment =
                    FragmentFileName::new(job.backup_id.clone(), job.block, supplier_num, kind);
                let packet_id = fragment.file_name();
                let path = self.data_par_dir.join(&packet_id);
                match self.transport.send_fragment(identity, &packet_id, &path).await {
                    Ok(()) => {
                        debug!("Sent {} to supplier {}", packet_id, supplier_num);
                        remote.set(kind, supplier_num, FragmentStatus::Present);
                        tests.push((supplier_num, RemoteTest::Rebuilding));
                        uploaded += 1;
                    }
                    Err(e) => {
                        warn!("Sending {} to supplier {} failed: {}", packet_id, supplier_num, e);
                        remote.set(kind, supplier_num, FragmentStatus::Missing);
                        tests.push((supplier_num, RemoteTest::Fail));
                    }
                }
            }
        }

        Ok(BlockOutcome {
            remote,
            tests,
            uploaded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Records uploads; fails for identities listed in `broken`
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, String)>>,
        broken: Vec<String>,
    }

    #[async_trait]
    impl SupplierTransport for RecordingTransport {
        async fn is_online(&self, _supplier: &str) -> bool {
            true
        }

        async fn request_list_files(&self, _supplier: &str, _request_id: Uuid) -> Result<()> {
            Ok(())
        }

        async fn send_fragment(&self, supplier: &str, packet_id: &str, _path: &Path) -> Result<()> {
            if self.broken.iter().any(|b| b == supplier) {
                return Err(haven_common::Error::Internal("refused".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((supplier.to_string(), packet_id.to_string()));
            Ok(())
        }

        async fn request_replacement(&self, _position: usize) -> Result<()> {
            Ok(())
        }
    }

    fn job(active: Vec<bool>) -> BlockJob {
        let mut local = BlockFragments::unknown(3);
        for s in 0..3 {
            local.set(FragmentKind::Data, s, FragmentStatus::Present);
        }
        let mut remote = BlockFragments::unknown(3);
        remote.set(FragmentKind::Data, 0, FragmentStatus::Present);
        remote.set(FragmentKind::Parity, 0, FragmentStatus::Present);
        BlockJob {
            backup_id: BackupId::new("F20090709034221PM").unwrap(),
            block: 4,
            suppliers: vec!["a".into(), "b".into(), "c".into()],
            active,
            remote,
            local,
        }
    }

    #[tokio::test]
    async fn test_uploads_local_copies_to_active_suppliers_only() {
        let transport = Arc::new(RecordingTransport::default());
        let repair = LocalCopyRepair::new(transport.clone(), PathBuf::from("/nonexistent"));

        let outcome = repair.repair_block(job(vec![true, true, false])).await.unwrap();

        assert_eq!(outcome.uploaded, 1);
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![("b".to_string(), "F20090709034221PM-4-1-Data".to_string())]
        );
        assert_eq!(outcome.remote.status(FragmentKind::Data, 1), FragmentStatus::Present);
        // no local parity for supplier 1, left for the erasure decoder
        assert_eq!(outcome.remote.status(FragmentKind::Parity, 1), FragmentStatus::Unknown);
        assert_eq!(outcome.remote.status(FragmentKind::Data, 2), FragmentStatus::Unknown);
        assert!(outcome.tests.contains(&(1, RemoteTest::NoData)));
        assert!(outcome.tests.contains(&(0, RemoteTest::Success)));
    }

    #[tokio::test]
    async fn test_failed_upload_marks_missing() {
        let transport = Arc::new(RecordingTransport {
            broken: vec!["b".to_string()],
            ..Default::default()
        });
        let repair = LocalCopyRepair::new(transport, PathBuf::from("/nonexistent"));

        let outcome = repair.repair_block(job(vec![true, true, true])).await.unwrap();

        assert_eq!(outcome.remote.status(FragmentKind::Data, 1), FragmentStatus::Missing);
        assert_eq!(outcome.remote.status(FragmentKind::Data, 2), FragmentStatus::Present);
        assert!(outcome.tests.contains(&(1, RemoteTest::Fail)));
        assert_eq!(outcome.uploaded, 1);
    }
}
