//! Replacement of unresponsive suppliers
//!
//! A supplier that has not answered a list-files request for too long is
//! reported to the transport for replacement. The new identity arrives later
//! as a roster update, which restarts the monitor on its own.

use super::transport::SupplierTransport;
use crate::monitor::{MonitorEvent, MonitorHandle};
use crate::state::SharedInventory;
use haven_common::time;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

pub trait FireHire: Send + Sync {
    /// Decide on replacements; reports `hire-new-supplier` or `fire-hire-finished`
    fn start(&self);
}

#[derive(Clone)]
pub struct InactivityFireHire {
    inner: Arc<Inner>,
}

struct Inner {
    inventory: SharedInventory,
    transport: Arc<dyn SupplierTransport>,
    monitor: MonitorHandle,
    inactive_hours: f64,
    /// (position, identity) pairs already reported
    requested: Mutex<HashSet<(usize, String)>>,
}

impl InactivityFireHire {
    pub fn new(
        inventory: SharedInventory,
        transport: Arc<dyn SupplierTransport>,
        monitor: MonitorHandle,
        inactive_hours: f64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                inventory,
                transport,
                monitor,
                inactive_hours,
                requested: Mutex::new(HashSet::new()),
            }),
        }
    }
}

impl FireHire for InactivityFireHire {
    fn start(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let event = if inner.fire_inactive().await > 0 {
                MonitorEvent::HireNewSupplier
            } else {
                MonitorEvent::FireHireFinished
            };
            inner.monitor.post(event);
        });
    }
}

impl Inner {
    fn requested(&self) -> MutexGuard<'_, HashSet<(usize, String)>> {
        self.requested.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Request replacements, returning how many requests succeeded
    async fn fire_inactive(&self) -> usize {
        let candidates: Vec<(usize, String)> = {
            let state = self.inventory.read().await;
            state
                .suppliers
                .inactive(time::now(), self.inactive_hours)
                .into_iter()
                .filter_map(|position| {
                    state
                        .suppliers
                        .identity(position)
                        .map(|identity| (position, identity.to_string()))
                })
                .collect()
        };

        let mut fired = 0;
        for candidate in candidates {
            if self.requested().contains(&candidate) {
                continue;
            }
            let (position, identity) = &candidate;
            match self.transport.request_replacement(*position).await {
                Ok(()) => {
                    info!(
                        "Supplier {} ({}) silent for over {} hours, replacement requested",
                        position, identity, self.inactive_hours
                    );
                    self.requested().insert(candidate);
                    fired += 1;
                }
                Err(e) => warn!("Replacement request for supplier {} failed: {}", position, e),
            }
        }
        fired
    }
}
