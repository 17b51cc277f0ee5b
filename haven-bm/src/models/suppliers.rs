//! Supplier roster
//!
//! The roster is an ordered list of supplier identities; a supplier's position
//! is its supplier number, which is baked into every fragment name. Changing
//! the number of suppliers therefore invalidates every fragment map, while
//! swapping one identity only invalidates that position.

use chrono::{DateTime, Utc};
use haven_common::time;
use serde::Serialize;

/// Outcome of checking one fragment on a supplier during a rebuild pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTest {
    /// Fragment already confirmed on the supplier
    Success,
    /// Upload to the supplier failed
    Fail,
    /// Fragment was re-sent to the supplier
    Rebuilding,
    /// Supplier lacks the fragment and no local copy exists
    NoData,
}

/// Per-supplier remote test counters, reset at the start of every cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemoteTestResults {
    pub success: u64,
    pub fail: u64,
    pub rebuilding: u64,
    pub nodata: u64,
}

impl RemoteTestResults {
    fn record(&mut self, test: RemoteTest) {
        match test {
            RemoteTest::Success => self.success += 1,
            RemoteTest::Fail => self.fail += 1,
            RemoteTest::Rebuilding => self.rebuilding += 1,
            RemoteTest::NoData => self.nodata += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SupplierInfo {
    pub position: usize,
    pub identity: String,
    pub tests: RemoteTestResults,
    /// Last list-files reply from this supplier
    pub last_seen: Option<DateTime<Utc>>,
}

/// Difference between the current roster and a proposed one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupplierChange {
    Unchanged,
    /// Different number of suppliers; all fragment info is void
    CountChanged { old: usize, new: usize },
    /// Same count, these positions got a new identity
    Positions(Vec<usize>),
}

#[derive(Debug, Clone)]
pub struct SuppliersSet {
    suppliers: Vec<SupplierInfo>,
    boot_time: DateTime<Utc>,
}

impl SuppliersSet {
    pub fn new(identities: Vec<String>) -> Self {
        Self {
            suppliers: Self::fresh(identities),
            boot_time: time::now(),
        }
    }

    fn fresh(identities: Vec<String>) -> Vec<SupplierInfo> {
        identities
            .into_iter()
            .enumerate()
            .map(|(position, identity)| SupplierInfo {
                position,
                identity,
                tests: RemoteTestResults::default(),
                last_seen: None,
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.suppliers.len()
    }

    pub fn identities(&self) -> Vec<String> {
        self.suppliers.iter().map(|s| s.identity.clone()).collect()
    }

    pub fn identity(&self, position: usize) -> Option<&str> {
        self.suppliers.get(position).map(|s| s.identity.as_str())
    }

    pub fn position(&self, identity: &str) -> Option<usize> {
        self.suppliers.iter().position(|s| s.identity == identity)
    }

    pub fn infos(&self) -> &[SupplierInfo] {
        &self.suppliers
    }

    pub fn boot_time(&self) -> DateTime<Utc> {
        self.boot_time
    }

    pub fn compare(&self, proposed: &[String]) -> SupplierChange {
        if proposed.len() != self.suppliers.len() {
            return SupplierChange::CountChanged {
                old: self.suppliers.len(),
                new: proposed.len(),
            };
        }
        let changed: Vec<usize> = self
            .suppliers
            .iter()
            .zip(proposed)
            .filter(|(current, identity)| current.identity != **identity)
            .map(|(current, _)| current.position)
            .collect();
        if changed.is_empty() {
            SupplierChange::Unchanged
        } else {
            SupplierChange::Positions(changed)
        }
    }

    /// Install a new roster with fresh counters
    ///
    /// Last-seen times survive for positions whose identity is unchanged.
    pub fn update(&mut self, identities: Vec<String>) {
        let mut next = Self::fresh(identities);
        for info in next.iter_mut() {
            if let Some(previous) = self.suppliers.get(info.position) {
                if previous.identity == info.identity {
                    info.last_seen = previous.last_seen;
                }
            }
        }
        self.suppliers = next;
    }

    pub fn reset_counters(&mut self) {
        for info in self.suppliers.iter_mut() {
            info.tests = RemoteTestResults::default();
        }
    }

    pub fn record(&mut self, position: usize, test: RemoteTest) {
        if let Some(info) = self.suppliers.get_mut(position) {
            info.tests.record(test);
        }
    }

    pub fn mark_seen(&mut self, position: usize, at: DateTime<Utc>) {
        if let Some(info) = self.suppliers.get_mut(position) {
            info.last_seen = Some(at);
        }
    }

    /// Positions silent for longer than `hours` as of `now`
    ///
    /// A supplier never heard from is measured from process start, so a fresh
    /// daemon does not fire its whole roster.
    pub fn inactive(&self, now: DateTime<Utc>, hours: f64) -> Vec<usize> {
        self.suppliers
            .iter()
            .filter(|info| {
                let since = info.last_seen.map_or(self.boot_time, |seen| seen.max(self.boot_time));
                time::hours_between(since, now) > hours
            })
            .map(|info| info.position)
            .collect()
    }
}
