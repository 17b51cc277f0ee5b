//! Backup rebuilder
//!
//! Works through a queue of backups, newest first, repairing every block that
//! an online supplier is missing. Blocks are processed last-first so the tail
//! of a backup written most recently is secured before older blocks.

use super::block_repair::{BlockJob, BlockOutcome, BlockRepair};
use super::transport::SupplierTransport;
use crate::models::missing::scan_missing_blocks;
use crate::monitor::{MonitorEvent, MonitorHandle};
use crate::state::SharedInventory;
use haven_common::events::{EventBus, HavenEvent, RebuilderState};
use haven_common::{time, BackupId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub trait BackupRebuilder: Send + Sync {
    fn state(&self) -> RebuilderState;

    /// Append backups to the work queue, skipping ones already queued
    fn add_backups_to_work(&self, backups: Vec<BackupId>);

    /// Drop every queued copy of a backup; returns how many were removed
    fn remove_backup_work(&self, backup_id: &BackupId) -> usize;

    fn queued(&self) -> Vec<BackupId>;

    /// Begin working the queue; reports STOPPED or DONE to the monitor
    fn start(&self);

    /// Ask the running pass to halt after the current block
    fn set_stopped_flag(&self);
}

/// Rebuilder driving a [`BlockRepair`] from a tokio task
#[derive(Clone)]
pub struct QueueRebuilder {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<RebuilderState>,
    queue: Mutex<VecDeque<BackupId>>,
    stop: AtomicBool,
    inventory: SharedInventory,
    repair: Arc<dyn BlockRepair>,
    transport: Arc<dyn SupplierTransport>,
    monitor: MonitorHandle,
    event_bus: EventBus,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl QueueRebuilder {
    pub fn new(
        inventory: SharedInventory,
        repair: Arc<dyn BlockRepair>,
        transport: Arc<dyn SupplierTransport>,
        monitor: MonitorHandle,
        event_bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RebuilderState::Stopped),
                queue: Mutex::new(VecDeque::new()),
                stop: AtomicBool::new(false),
                inventory,
                repair,
                transport,
                monitor,
                event_bus,
            }),
        }
    }
}

impl BackupRebuilder for QueueRebuilder {
    fn state(&self) -> RebuilderState {
        *lock(&self.inner.state)
    }

    fn add_backups_to_work(&self, backups: Vec<BackupId>) {
        let mut queue = lock(&self.inner.queue);
        for backup_id in backups {
            if !queue.contains(&backup_id) {
                queue.push_back(backup_id);
            }
        }
    }

    fn remove_backup_work(&self, backup_id: &BackupId) -> usize {
        let mut queue = lock(&self.inner.queue);
        let before = queue.len();
        queue.retain(|queued| queued != backup_id);
        before - queue.len()
    }

    fn queued(&self) -> Vec<BackupId> {
        lock(&self.inner.queue).iter().cloned().collect()
    }

    fn start(&self) {
        {
            let mut state = lock(&self.inner.state);
            if *state == RebuilderState::Running {
                debug!("Rebuilder already running");
                return;
            }
            *state = RebuilderState::Running;
        }
        self.inner.stop.store(false, Ordering::SeqCst);
        self.inner.emit_state(RebuilderState::Running);

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run().await });
    }

    fn set_stopped_flag(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
    }
}

impl Inner {
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn emit_state(&self, state: RebuilderState) {
        self.event_bus.emit_lossy(HavenEvent::RebuilderStateChanged {
            state,
            timestamp: time::now(),
        });
    }

    async fn run(&self) {
        let mut rebuilt = 0usize;
        loop {
            if self.stopping() {
                self.finish(RebuilderState::Stopped, rebuilt);
                return;
            }
            let next = lock(&self.queue).pop_front();
            let Some(backup_id) = next else {
                self.finish(RebuilderState::Done, rebuilt);
                return;
            };
            self.rebuild_backup(&backup_id).await;
            rebuilt += 1;
        }
    }

    fn finish(&self, state: RebuilderState, rebuilt: usize) {
        *lock(&self.state) = state;
        info!("Rebuilder {} after {} backups", state, rebuilt);
        self.emit_state(state);
        self.monitor.post(MonitorEvent::Rebuilder(state));
    }

    async fn rebuild_backup(&self, backup_id: &BackupId) {
        let suppliers = self.inventory.supplier_identities().await;
        let mut active = Vec::with_capacity(suppliers.len());
        for identity in &suppliers {
            active.push(self.transport.is_online(identity).await);
        }
        if !active.iter().any(|online| *online) {
            debug!("No supplier online, skipping {}", backup_id);
            return;
        }

        let blocks = {
            let mut state = self.inventory.write().await;
            let missing = scan_missing_blocks(&state.remote, &state.local, backup_id, &active);
            let max_block = match (state.remote.max_block(backup_id), state.local.max_block(backup_id)) {
                (Some(r), Some(l)) => Some(r.max(l)),
                (r, l) => r.or(l),
            };
            if max_block.is_some() {
                state.remote.pad_blocks(backup_id, max_block);
            }
            missing
        };
        if blocks.is_empty() {
            return;
        }
        info!("Rebuilding {} blocks of {}", blocks.len(), backup_id);

        for block in blocks.into_iter().rev() {
            if self.stopping() {
                debug!("Stop requested while rebuilding {}", backup_id);
                return;
            }

            let job = {
                let state = self.inventory.read().await;
                if !state.remote.contains(backup_id) || state.remote.supplier_count() != suppliers.len() {
                    debug!("{} changed under the rebuilder, dropping it", backup_id);
                    return;
                }
                BlockJob {
                    backup_id: backup_id.clone(),
                    block,
                    suppliers: suppliers.clone(),
                    active: active.clone(),
                    remote: state.remote.block_or_unknown(backup_id, block),
                    local: state.local.block_or_unknown(backup_id, block),
                }
            };

            match self.repair.repair_block(job).await {
                Ok(outcome) => self.rebuild_report(backup_id, block, outcome).await,
                Err(e) => warn!("Block {} of {} not repaired: {}", block, backup_id, e),
            }
        }
    }

    /// Write one block's repair outcome back to the remote inventory
    async fn rebuild_report(&self, backup_id: &BackupId, block: u32, outcome: BlockOutcome) {
        let mut state = self.inventory.write().await;
        if !state.remote.contains(backup_id) {
            return;
        }
        if outcome.remote.data.len() != state.remote.supplier_count() {
            debug!(
                "Supplier count changed while repairing block {} of {}, dropping the result",
                block, backup_id
            );
            return;
        }
        state.remote.replace_block(backup_id, block, outcome.remote);
        for (position, test) in outcome.tests {
            state.suppliers.record(position, test);
        }
        state.dirty.insert(backup_id.clone());
    }
}
