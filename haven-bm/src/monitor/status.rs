//! Monitor status snapshot served by `/api/status`

use super::retention::RetentionResult;
use chrono::{DateTime, Utc};
use haven_common::events::MonitorState;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub last_transition_at: Option<DateTime<Utc>>,
    /// Wire name of the event behind the last transition
    pub last_trigger: Option<String>,
    /// Cycles that reached retention
    pub cycles_completed: u64,
    /// Size of the last rebuild candidate set
    pub candidates: usize,
    pub last_retention: Option<RetentionResult>,
    pub last_error: Option<String>,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            state: MonitorState::Ready,
            last_transition_at: None,
            last_trigger: None,
            cycles_completed: 0,
            candidates: 0,
            last_retention: None,
            last_error: None,
        }
    }
}

/// Written by the monitor task, read by HTTP handlers
#[derive(Debug, Clone, Default)]
pub struct SharedMonitorStatus {
    inner: Arc<RwLock<MonitorStatus>>,
}

impl SharedMonitorStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> MonitorStatus {
        self.inner.read().await.clone()
    }

    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut MonitorStatus),
    {
        f(&mut *self.inner.write().await);
    }
}
