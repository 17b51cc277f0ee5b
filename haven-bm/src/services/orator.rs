//! List-files orator
//!
//! Asks every online supplier for its list of our fragments, rescans the local
//! `data-par` directory, and reports SAW_FILES or NO_FILES once every reply is
//! in or the reply timeout runs out. Replies arrive independently through
//! [`TransportOrator::incoming_list_files`].

use super::transport::SupplierTransport;
use crate::models::list_files::{apply_line, parse_list_files};
use crate::models::local_files::scan_data_par;
use crate::monitor::{MonitorEvent, MonitorHandle};
use crate::state::SharedInventory;
use haven_common::events::{EventBus, HavenEvent, OratorState};
use haven_common::{time, Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub trait ListFilesOrator: Send + Sync {
    /// Start collecting a fresh file listing
    fn need_files(&self);
}

/// Outcome of accepting one list-files reply
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ListFilesSummary {
    pub supplier_num: usize,
    pub lines: usize,
    pub backups: usize,
    pub foreign: usize,
    pub malformed: usize,
}

#[derive(Clone)]
pub struct TransportOrator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn SupplierTransport>,
    inventory: SharedInventory,
    monitor: MonitorHandle,
    event_bus: EventBus,
    data_par_dir: PathBuf,
    reply_timeout: Duration,
    max_blocks: u32,
    outstanding: Mutex<Outstanding>,
    replied: Notify,
    generation: AtomicU64,
    current: Mutex<CancellationToken>,
}

/// Suppliers still owing a reply to collection `generation`
#[derive(Default)]
struct Outstanding {
    generation: u64,
    suppliers: HashSet<usize>,
}

impl TransportOrator {
    pub fn new(
        transport: Arc<dyn SupplierTransport>,
        inventory: SharedInventory,
        monitor: MonitorHandle,
        event_bus: EventBus,
        data_par_dir: PathBuf,
        reply_timeout: Duration,
        max_blocks: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                inventory,
                monitor,
                event_bus,
                data_par_dir,
                reply_timeout,
                max_blocks,
                outstanding: Mutex::new(Outstanding::default()),
                replied: Notify::new(),
                generation: AtomicU64::new(0),
                current: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Accept a list-files reply from supplier `supplier_num`
    ///
    /// Replies are applied whenever they arrive, not only during LIST_FILES.
    pub async fn incoming_list_files(&self, supplier_num: usize, text: &str) -> Result<ListFilesSummary> {
        let summary = {
            let mut state = self.inner.inventory.write().await;
            let count = state.suppliers.count();
            if supplier_num >= count {
                return Err(Error::InvalidInput(format!(
                    "supplier {} out of range, {} suppliers configured",
                    supplier_num, count
                )));
            }
            let identity = state.suppliers.identity(supplier_num).unwrap_or_default().to_string();

            let report = parse_list_files(text, supplier_num, &identity, self.inner.max_blocks);
            for line in &report.lines {
                apply_line(&mut state.remote, line);
            }
            let backups = report.backup_ids();
            state.dirty.extend(backups.iter().cloned());
            state.suppliers.mark_seen(supplier_num, time::now());

            ListFilesSummary {
                supplier_num,
                lines: report.lines.len(),
                backups: backups.len(),
                foreign: report.foreign,
                malformed: report.malformed,
            }
        };

        debug!(
            "List-files from supplier {}: {} lines, {} backups, {} foreign, {} malformed",
            supplier_num, summary.lines, summary.backups, summary.foreign, summary.malformed
        );
        if self.inner.outstanding().suppliers.remove(&supplier_num) {
            self.inner.replied.notify_waiters();
        }
        self.inner.event_bus.emit_lossy(HavenEvent::ListFilesReceived {
            supplier_num,
            backups: summary.backups,
            timestamp: time::now(),
        });
        Ok(summary)
    }
}

impl ListFilesOrator for TransportOrator {
    /// A new request supersedes any collection still running; only the
    /// newest one reports.
    fn need_files(&self) {
        let inner = self.inner.clone();
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let previous = std::mem::replace(&mut *inner.current(), cancel.clone());
        previous.cancel();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("List-files collection {} superseded", generation);
                    return;
                }
                outcome = inner.collect(generation) => outcome,
            };
            if inner.is_current(generation) {
                inner.monitor.post(MonitorEvent::Orator(outcome));
            }
        });
    }
}

impl Inner {
    fn outstanding(&self) -> MutexGuard<'_, Outstanding> {
        self.outstanding.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current(&self) -> MutexGuard<'_, CancellationToken> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn collect(&self, generation: u64) -> OratorState {
        let suppliers = self.inventory.supplier_identities().await;
        let request_id = Uuid::new_v4();

        let mut online = HashSet::new();
        for (supplier_num, identity) in suppliers.iter().enumerate() {
            if self.transport.is_online(identity).await {
                online.insert(supplier_num);
            } else {
                debug!("Supplier {} offline, not asking for files", supplier_num);
            }
        }

        // registered before asking so an early reply is not lost
        {
            let mut outstanding = self.outstanding();
            if outstanding.generation > generation {
                debug!("List-files collection {} already superseded", generation);
                return OratorState::NoFiles;
            }
            *outstanding = Outstanding {
                generation,
                suppliers: online.clone(),
            };
        }
        let mut asked = HashSet::new();
        for &supplier_num in &online {
            match self.transport.request_list_files(&suppliers[supplier_num], request_id).await {
                Ok(()) => {
                    asked.insert(supplier_num);
                }
                Err(e) => {
                    warn!("List-files request to supplier {} failed: {}", supplier_num, e);
                    let mut outstanding = self.outstanding();
                    if outstanding.generation == generation {
                        outstanding.suppliers.remove(&supplier_num);
                    }
                }
            }
        }

        if !asked.is_empty() {
            let waited =
                tokio::time::timeout(self.reply_timeout, self.wait_for_replies(generation)).await;
            let mut outstanding = self.outstanding();
            if outstanding.generation == generation {
                if waited.is_err() {
                    warn!(
                        "List-files timed out, {} of {} suppliers did not reply",
                        outstanding.suppliers.len(),
                        asked.len()
                    );
                }
                outstanding.suppliers.clear();
            }
        }

        if let Err(e) = self.rescan_local(suppliers.len()).await {
            warn!("Local fragment scan failed: {}", e);
        }

        let state = self.inventory.read().await;
        let known = state.known_backup_ids();
        let outcome = if known.is_empty() {
            OratorState::NoFiles
        } else {
            OratorState::SawFiles
        };
        info!("List-files finished: {} backups known, {}", known.len(), outcome);
        outcome
    }

    async fn wait_for_replies(&self, generation: u64) {
        loop {
            let notified = self.replied.notified();
            {
                let outstanding = self.outstanding();
                if outstanding.generation != generation || outstanding.suppliers.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }

    async fn rescan_local(&self, supplier_count: usize) -> Result<()> {
        let dir = self.data_par_dir.clone();
        let max_blocks = self.max_blocks;
        let local = tokio::task::spawn_blocking(move || scan_data_par(&dir, supplier_count, max_blocks))
            .await
            .map_err(|e| Error::Internal(format!("local scan task failed: {}", e)))??;

        let mut state = self.inventory.write().await;
        if state.local.supplier_count() != supplier_count {
            debug!("Supplier count changed during scan, discarding it");
            return Ok(());
        }
        state.local = local;
        Ok(())
    }
}
