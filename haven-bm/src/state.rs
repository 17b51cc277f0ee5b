//! Shared backup inventory
//!
//! The orator writes remote fragment info as replies arrive, the rebuilder
//! writes repair outcomes, and the monitor and HTTP handlers read snapshots.
//! All of it sits behind one tokio RwLock; nobody holds the guard across a
//! call into a collaborator.

use crate::models::{FileInventory, SupplierChange, SuppliersSet};
use haven_common::BackupId;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Everything the monitor knows about backups and suppliers
#[derive(Debug)]
pub struct InventoryState {
    pub remote: FileInventory,
    pub local: FileInventory,
    pub suppliers: SuppliersSet,
    /// Backups a running backup job is still writing
    pub in_process: BTreeSet<BackupId>,
    /// Backups whose availability changed since the last repaint
    pub dirty: BTreeSet<BackupId>,
}

impl InventoryState {
    pub fn new(suppliers: Vec<String>) -> Self {
        let count = suppliers.len();
        Self {
            remote: FileInventory::new(count),
            local: FileInventory::new(count),
            suppliers: SuppliersSet::new(suppliers),
            in_process: BTreeSet::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Ids known locally or on any supplier
    pub fn known_backup_ids(&self) -> BTreeSet<BackupId> {
        self.local
            .backup_ids()
            .chain(self.remote.backup_ids())
            .cloned()
            .collect()
    }

    /// Install a new roster, discarding fragment info it invalidates
    pub fn apply_supplier_list(&mut self, identities: Vec<String>) -> SupplierChange {
        let change = self.suppliers.compare(&identities);
        match &change {
            SupplierChange::Unchanged => {}
            SupplierChange::CountChanged { new, .. } => {
                self.remote = FileInventory::new(*new);
                self.local = FileInventory::new(*new);
                self.dirty.clear();
            }
            SupplierChange::Positions(positions) => {
                self.remote.reset_suppliers(positions);
                self.dirty.extend(self.remote.backup_ids().cloned());
            }
        }
        self.suppliers.update(identities);
        change
    }
}

/// Cloneable handle to the shared inventory
#[derive(Debug, Clone)]
pub struct SharedInventory {
    inner: Arc<RwLock<InventoryState>>,
}

impl SharedInventory {
    pub fn new(suppliers: Vec<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(InventoryState::new(suppliers))),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, InventoryState> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, InventoryState> {
        self.inner.write().await
    }

    pub async fn supplier_identities(&self) -> Vec<String> {
        self.inner.read().await.suppliers.identities()
    }

    /// Returns false if the backup was already in process
    pub async fn add_in_process(&self, backup_id: BackupId) -> bool {
        self.inner.write().await.in_process.insert(backup_id)
    }

    pub async fn remove_in_process(&self, backup_id: &BackupId) -> bool {
        self.inner.write().await.in_process.remove(backup_id)
    }

    pub async fn is_in_process(&self, backup_id: &BackupId) -> bool {
        self.inner.read().await.in_process.contains(backup_id)
    }

    pub async fn mark_dirty(&self, backup_id: BackupId) {
        self.inner.write().await.dirty.insert(backup_id);
    }

    /// Drain the set of backups awaiting a repaint
    pub async fn take_dirty(&self) -> BTreeSet<BackupId> {
        std::mem::take(&mut self.inner.write().await.dirty)
    }
}
