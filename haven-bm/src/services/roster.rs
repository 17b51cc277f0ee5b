//! Supplier roster updates
//!
//! A different supplier count renumbers every fragment, so all fragment info
//! is dropped and the monitor restarts at once. A swapped identity only voids
//! that position; the restart is delayed a second so a burst of swaps from
//! the central service lands in one cycle.

use crate::db::suppliers::save_suppliers;
use crate::models::SupplierChange;
use crate::monitor::{MonitorEvent, MonitorHandle};
use crate::state::SharedInventory;
use haven_common::events::{EventBus, HavenEvent};
use haven_common::{time, Error, Result};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::info;

const POSITION_CHANGE_RESTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct SupplierRoster {
    db: SqlitePool,
    inventory: SharedInventory,
    monitor: MonitorHandle,
    event_bus: EventBus,
}

impl SupplierRoster {
    pub fn new(db: SqlitePool, inventory: SharedInventory, monitor: MonitorHandle, event_bus: EventBus) -> Self {
        Self {
            db,
            inventory,
            monitor,
            event_bus,
        }
    }

    /// Install a new roster
    ///
    /// Identities must be non-empty and distinct.
    pub async fn set_supplier_list(&self, identities: Vec<String>) -> Result<SupplierChange> {
        validate(&identities)?;

        save_suppliers(&self.db, &identities).await?;
        let change = self.inventory.write().await.apply_supplier_list(identities.clone());

        let (count_changed, changed_positions) = match &change {
            SupplierChange::Unchanged => return Ok(change),
            SupplierChange::CountChanged { old, new } => {
                info!("Supplier count changed {} -> {}, fragment info discarded", old, new);
                self.monitor.post(MonitorEvent::Restart);
                (true, Vec::new())
            }
            SupplierChange::Positions(positions) => {
                info!("Suppliers replaced at positions {:?}", positions);
                self.monitor
                    .post_after(MonitorEvent::Restart, POSITION_CHANGE_RESTART_DELAY);
                (false, positions.clone())
            }
        };

        self.event_bus.emit_lossy(HavenEvent::SupplierListChanged {
            supplier_count: identities.len(),
            count_changed,
            changed_positions,
            timestamp: time::now(),
        });
        Ok(change)
    }
}

fn validate(identities: &[String]) -> Result<()> {
    for (position, identity) in identities.iter().enumerate() {
        if identity.trim().is_empty() {
            return Err(Error::InvalidInput(format!("supplier {} has an empty identity", position)));
        }
        if identities[..position].contains(identity) {
            return Err(Error::InvalidInput(format!("supplier {} listed twice", identity)));
        }
    }
    Ok(())
}
