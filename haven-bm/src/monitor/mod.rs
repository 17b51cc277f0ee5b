//! Backup monitor
//!
//! Drives one reconciliation cycle at a time: collect file listings, select
//! rebuild candidates, rebuild, replace silent suppliers, apply retention.
//! The transition table lives in [`transitions`]; this module executes the
//! actions it names and records the result.

pub mod retention;
pub mod runtime;
pub mod selection;
pub mod status;
pub mod transitions;

pub use runtime::{run_monitor, run_repaint, MonitorHandle, MonitorInbox, MonitorTimers};
pub use status::{MonitorStatus, SharedMonitorStatus};
pub use transitions::{Action, Guards, MonitorEvent, Step};

use crate::services::{BackupJanitor, BackupRebuilder, BackupRegistry, FireHire, ListFilesOrator};
use crate::state::SharedInventory;
use chrono::{DateTime, Utc};
use haven_common::events::{EventBus, HavenEvent, MonitorState};
use haven_common::{time, BackupId, Result};
use retention::clean_up_backups;
use selection::select_rebuild_candidates;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Collaborators the monitor drives
#[derive(Clone)]
pub struct MonitorDeps {
    pub registry: Arc<dyn BackupRegistry>,
    pub orator: Arc<dyn ListFilesOrator>,
    pub rebuilder: Arc<dyn BackupRebuilder>,
    pub fire_hire: Arc<dyn FireHire>,
    pub janitor: Arc<BackupJanitor>,
    pub inventory: SharedInventory,
    pub event_bus: EventBus,
}

/// One committed transition
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub old_state: MonitorState,
    pub new_state: MonitorState,
    pub trigger: MonitorEvent,
    pub transitioned_at: DateTime<Utc>,
}

pub struct BackupMonitor {
    state: MonitorState,
    deps: MonitorDeps,
    backups_to_keep: usize,
    /// Self-raised events, handled after the current transition commits
    pending: VecDeque<MonitorEvent>,
    status: SharedMonitorStatus,
}

impl BackupMonitor {
    pub fn new(deps: MonitorDeps, backups_to_keep: usize, status: SharedMonitorStatus) -> Self {
        Self {
            state: MonitorState::Ready,
            deps,
            backups_to_keep: backups_to_keep.max(1),
            pending: VecDeque::new(),
            status,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Feed one event, plus anything it self-raises
    ///
    /// Returns every transition committed, in order. Events with no
    /// transition from the current state are dropped.
    pub async fn automat(&mut self, event: MonitorEvent) -> Vec<StateTransition> {
        self.pending.push_back(event);
        let mut transitions = Vec::new();

        while let Some(event) = self.pending.pop_front() {
            let guards = Guards {
                rebuilder: self.deps.rebuilder.state(),
            };
            let Some(step) = transitions::step(self.state, event, guards) else {
                trace!("{} ignored in {}", event, self.state);
                continue;
            };

            transitions.push(self.commit(event, step.next).await);

            for action in step.actions {
                if let Err(e) = self.perform(action).await {
                    error!("Action {:?} failed in {}: {}", action, self.state, e);
                    let message = format!("{:?}: {}", action, e);
                    self.status.update(|s| s.last_error = Some(message)).await;
                }
            }
        }

        transitions
    }

    async fn commit(&mut self, event: MonitorEvent, next: MonitorState) -> StateTransition {
        let old = self.state;
        self.state = next;
        let now = time::now();

        if old == next {
            debug!("{} -> {} ({})", old, next, event);
        } else {
            info!("{} -> {} ({})", old, next, event);
            self.deps.event_bus.emit_lossy(HavenEvent::MonitorStateChanged {
                old_state: old,
                new_state: next,
                trigger: event.name().to_string(),
                timestamp: now,
            });
        }

        self.status
            .update(|s| {
                s.state = next;
                s.last_transition_at = Some(now);
                s.last_trigger = Some(event.name().to_string());
            })
            .await;

        StateTransition {
            old_state: old,
            new_state: next,
            trigger: event,
            transitioned_at: now,
        }
    }

    async fn perform(&mut self, action: Action) -> Result<()> {
        match action {
            Action::RequestListFiles => self.deps.orator.need_files(),
            Action::PrepareListBackups => {
                let prepared = self.prepare_list_backups().await;
                // raised even on failure so the cycle cannot stall in LIST_BACKUPS
                self.pending.push_back(MonitorEvent::ListBackupsDone);
                prepared?;
            }
            Action::StartRebuilder => self.deps.rebuilder.start(),
            Action::StopRebuilder => self.deps.rebuilder.set_stopped_flag(),
            Action::StartFireHire => self.deps.fire_hire.start(),
            Action::CleanUpBackups => {
                let result = clean_up_backups(&self.deps.janitor, self.backups_to_keep).await?;
                self.deps.event_bus.emit_lossy(HavenEvent::RetentionCompleted {
                    backups_deleted: result.backups_deleted,
                    bytes_freed: result.bytes_freed,
                    timestamp: time::now(),
                });
                self.status
                    .update(|s| {
                        s.cycles_completed += 1;
                        s.last_retention = Some(result);
                    })
                    .await;
            }
        }
        Ok(())
    }

    /// Queue every registered, idle backup we hold fragment info for
    pub async fn prepare_list_backups(&self) -> Result<Vec<BackupId>> {
        let (known, in_process) = {
            let state = self.deps.inventory.read().await;
            (state.known_backup_ids(), state.in_process.clone())
        };
        let registered = self.deps.registry.backup_ids().await?;
        let running = self.deps.registry.running_ids().await?;

        let candidates = select_rebuild_candidates(&known, &registered, &in_process, &running);
        info!(
            "{} of {} known backups queued for rebuild",
            candidates.len(),
            known.len()
        );

        self.deps.rebuilder.add_backups_to_work(candidates.clone());
        self.deps.inventory.write().await.suppliers.reset_counters();

        let count = candidates.len();
        self.status.update(|s| s.candidates = count).await;
        Ok(candidates)
    }
}
