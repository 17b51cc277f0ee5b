//! Backup monitor cycle tests
//!
//! The monitor runs against in-memory collaborators so each transition and
//! action can be observed directly.

use async_trait::async_trait;
use haven_bm::models::{FragmentKind, FragmentStatus};
use haven_bm::monitor::{
    run_monitor, BackupMonitor, MonitorDeps, MonitorEvent, MonitorHandle, MonitorTimers,
    SharedMonitorStatus,
};
use haven_bm::services::{BackupJanitor, BackupRebuilder, BackupRegistry, FireHire, ListFilesOrator};
use haven_bm::state::SharedInventory;
use haven_common::events::{EventBus, HavenEvent, MonitorState, OratorState, RebuilderState};
use haven_common::{BackupId, Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeRegistry {
    /// id -> (dir, running)
    backups: Mutex<BTreeMap<BackupId, (String, bool)>>,
    fail: AtomicBool,
}

impl FakeRegistry {
    fn add(&self, id: &str, dir: &str, running: bool) {
        self.backups
            .lock()
            .unwrap()
            .insert(BackupId::new(id).unwrap(), (dir.to_string(), running));
    }

    fn ids(&self) -> Vec<String> {
        self.backups.lock().unwrap().keys().map(|id| id.to_string()).collect()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Internal("registry offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BackupRegistry for FakeRegistry {
    async fn backup_ids(&self) -> Result<BTreeSet<BackupId>> {
        self.check()?;
        Ok(self.backups.lock().unwrap().keys().cloned().collect())
    }

    async fn running_ids(&self) -> Result<BTreeSet<BackupId>> {
        self.check()?;
        Ok(self
            .backups
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, (_, running))| *running)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn dir_groups(&self) -> Result<BTreeMap<String, Vec<BackupId>>> {
        self.check()?;
        let mut groups: BTreeMap<String, Vec<BackupId>> = BTreeMap::new();
        for (id, (dir, _)) in self.backups.lock().unwrap().iter() {
            groups.entry(dir.clone()).or_default().push(id.clone());
        }
        Ok(groups)
    }

    async fn abort_running_backup(&self, backup_id: &BackupId) -> Result<bool> {
        let mut backups = self.backups.lock().unwrap();
        match backups.get_mut(backup_id) {
            Some((_, running)) if *running => {
                *running = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_backup(&self, backup_id: &BackupId) -> Result<bool> {
        Ok(self.backups.lock().unwrap().remove(backup_id).is_some())
    }
}

#[derive(Default)]
struct FakeOrator {
    calls: AtomicUsize,
    /// Answer posted to the monitor, if wired
    reply: Mutex<Option<(MonitorHandle, OratorState)>>,
}

impl ListFilesOrator for FakeOrator {
    fn need_files(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((handle, reply)) = self.reply.lock().unwrap().as_ref() {
            handle.post(MonitorEvent::Orator(*reply));
        }
    }
}

struct FakeRebuilder {
    state: Mutex<RebuilderState>,
    queue: Mutex<Vec<BackupId>>,
    started: AtomicUsize,
    stop_requested: AtomicBool,
}

impl Default for FakeRebuilder {
    fn default() -> Self {
        Self {
            state: Mutex::new(RebuilderState::Stopped),
            queue: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
            stop_requested: AtomicBool::new(false),
        }
    }
}

impl FakeRebuilder {
    fn set_state(&self, state: RebuilderState) {
        *self.state.lock().unwrap() = state;
    }
}

impl BackupRebuilder for FakeRebuilder {
    fn state(&self) -> RebuilderState {
        *self.state.lock().unwrap()
    }

    fn add_backups_to_work(&self, backups: Vec<BackupId>) {
        self.queue.lock().unwrap().extend(backups);
    }

    fn remove_backup_work(&self, backup_id: &BackupId) -> usize {
        let mut queue = self.queue.lock().unwrap();
        let before = queue.len();
        queue.retain(|id| id != backup_id);
        before - queue.len()
    }

    fn queued(&self) -> Vec<BackupId> {
        self.queue.lock().unwrap().clone()
    }

    fn start(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.set_state(RebuilderState::Running);
    }

    fn set_stopped_flag(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeFireHire {
    started: AtomicUsize,
}

impl FireHire for FakeFireHire {
    fn start(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    monitor: BackupMonitor,
    registry: Arc<FakeRegistry>,
    orator: Arc<FakeOrator>,
    rebuilder: Arc<FakeRebuilder>,
    fire_hire: Arc<FakeFireHire>,
    inventory: SharedInventory,
    status: SharedMonitorStatus,
    event_bus: EventBus,
    _data_par: tempfile::TempDir,
}

fn id(raw: &str) -> BackupId {
    BackupId::new(raw).unwrap()
}

fn harness(backups_to_keep: usize) -> Harness {
    let registry = Arc::new(FakeRegistry::default());
    let orator = Arc::new(FakeOrator::default());
    let rebuilder = Arc::new(FakeRebuilder::default());
    let fire_hire = Arc::new(FakeFireHire::default());
    let inventory = SharedInventory::new(vec!["s0".to_string(), "s1".to_string()]);
    let event_bus = EventBus::new(64);
    let status = SharedMonitorStatus::new();
    let data_par = tempfile::tempdir().unwrap();

    let janitor = Arc::new(BackupJanitor::new(
        registry.clone(),
        inventory.clone(),
        rebuilder.clone(),
        event_bus.clone(),
        data_par.path().to_path_buf(),
    ));
    let monitor = BackupMonitor::new(
        MonitorDeps {
            registry: registry.clone(),
            orator: orator.clone(),
            rebuilder: rebuilder.clone(),
            fire_hire: fire_hire.clone(),
            janitor,
            inventory: inventory.clone(),
            event_bus: event_bus.clone(),
        },
        backups_to_keep,
        status.clone(),
    );

    Harness {
        monitor,
        registry,
        orator,
        rebuilder,
        fire_hire,
        inventory,
        status,
        event_bus,
        _data_par: data_par,
    }
}

async fn seed_remote(inventory: &SharedInventory, ids: &[&str]) {
    let mut state = inventory.write().await;
    for raw in ids {
        state
            .remote
            .set_fragment(&id(raw), 0, FragmentKind::Data, 0, FragmentStatus::Present);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_full_cycle_reaches_ready_with_retention() {
    let mut h = harness(2);
    for raw in ["F20240101100000AM", "F20240102100000AM", "F20240103100000AM"] {
        h.registry.add(raw, "/home", false);
    }
    seed_remote(&h.inventory, &["F20240101100000AM", "F20240102100000AM", "F20240103100000AM"]).await;

    h.monitor.automat(MonitorEvent::Restart).await;
    assert_eq!(h.monitor.state(), MonitorState::Restart);

    h.monitor.automat(MonitorEvent::Tick).await;
    assert_eq!(h.monitor.state(), MonitorState::ListFiles);
    assert_eq!(h.orator.calls.load(Ordering::SeqCst), 1);

    // list-backups-done is self-raised, so one event walks two transitions
    let transitions = h.monitor.automat(MonitorEvent::Orator(OratorState::SawFiles)).await;
    let states: Vec<MonitorState> = transitions.iter().map(|t| t.new_state).collect();
    assert_eq!(states, vec![MonitorState::ListBackups, MonitorState::Rebuilding]);
    assert_eq!(
        h.rebuilder.queued(),
        vec![id("F20240103100000AM"), id("F20240102100000AM"), id("F20240101100000AM")]
    );
    assert_eq!(h.rebuilder.started.load(Ordering::SeqCst), 1);

    h.rebuilder.set_state(RebuilderState::Done);
    h.monitor.automat(MonitorEvent::Rebuilder(RebuilderState::Done)).await;
    assert_eq!(h.monitor.state(), MonitorState::FireHire);
    assert_eq!(h.fire_hire.started.load(Ordering::SeqCst), 1);

    h.monitor.automat(MonitorEvent::FireHireFinished).await;
    assert_eq!(h.monitor.state(), MonitorState::Ready);
    assert_eq!(h.registry.ids(), vec!["F20240102100000AM", "F20240103100000AM"]);
    assert!(!h.inventory.read().await.remote.contains(&id("F20240101100000AM")));

    let status = h.status.snapshot().await;
    assert_eq!(status.state, MonitorState::Ready);
    assert_eq!(status.cycles_completed, 1);
    assert_eq!(status.last_retention.unwrap().backups_deleted, 1);
    assert_eq!(status.last_trigger.as_deref(), Some("fire-hire-finished"));
}

#[tokio::test]
async fn test_candidates_exclude_in_process_running_and_unregistered() {
    let mut h = harness(5);
    h.registry.add("b1", "/a", false);
    h.registry.add("b2", "/a", true);
    h.registry.add("b3", "/a", false);
    seed_remote(&h.inventory, &["b1", "b2", "b3", "stale"]).await;
    h.inventory.add_in_process(id("b3")).await;

    h.monitor.automat(MonitorEvent::Restart).await;
    h.monitor.automat(MonitorEvent::Tick).await;
    h.monitor.automat(MonitorEvent::Orator(OratorState::SawFiles)).await;

    assert_eq!(h.rebuilder.queued(), vec![id("b1")]);
    assert_eq!(h.status.snapshot().await.candidates, 1);
}

#[tokio::test]
async fn test_empty_candidate_set_still_starts_rebuilder() {
    let mut h = harness(2);
    seed_remote(&h.inventory, &["orphan"]).await;

    h.monitor.automat(MonitorEvent::Restart).await;
    h.monitor.automat(MonitorEvent::Tick).await;
    h.monitor.automat(MonitorEvent::Orator(OratorState::SawFiles)).await;

    assert_eq!(h.monitor.state(), MonitorState::Rebuilding);
    assert!(h.rebuilder.queued().is_empty());
}

#[tokio::test]
async fn test_registry_failure_is_logged_and_cycle_continues() {
    let mut h = harness(2);
    h.registry.fail.store(true, Ordering::SeqCst);

    h.monitor.automat(MonitorEvent::Restart).await;
    h.monitor.automat(MonitorEvent::Tick).await;
    h.monitor.automat(MonitorEvent::Orator(OratorState::SawFiles)).await;

    assert_eq!(h.monitor.state(), MonitorState::Rebuilding);
    assert!(h.status.snapshot().await.last_error.is_some());
}

#[tokio::test]
async fn test_no_files_returns_to_ready() {
    let mut h = harness(2);
    h.monitor.automat(MonitorEvent::Restart).await;
    h.monitor.automat(MonitorEvent::Tick).await;
    h.monitor.automat(MonitorEvent::Orator(OratorState::NoFiles)).await;
    assert_eq!(h.monitor.state(), MonitorState::Ready);
    assert_eq!(h.rebuilder.started.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_tick_waits_for_running_rebuilder() {
    let mut h = harness(2);
    h.rebuilder.set_state(RebuilderState::Running);

    h.monitor.automat(MonitorEvent::Restart).await;
    let transitions = h.monitor.automat(MonitorEvent::Tick).await;
    assert!(transitions.is_empty());
    assert_eq!(h.monitor.state(), MonitorState::Restart);

    h.rebuilder.set_state(RebuilderState::Stopped);
    h.monitor.automat(MonitorEvent::Tick).await;
    assert_eq!(h.monitor.state(), MonitorState::ListFiles);
}

#[tokio::test]
async fn test_restart_while_rebuilding_stops_rebuilder_and_ignores_late_done() {
    let mut h = harness(2);
    h.monitor.automat(MonitorEvent::Restart).await;
    h.monitor.automat(MonitorEvent::Tick).await;
    h.monitor.automat(MonitorEvent::Orator(OratorState::SawFiles)).await;
    assert_eq!(h.monitor.state(), MonitorState::Rebuilding);

    h.monitor.automat(MonitorEvent::Restart).await;
    assert_eq!(h.monitor.state(), MonitorState::Restart);
    assert!(h.rebuilder.stop_requested.load(Ordering::SeqCst));

    let transitions = h.monitor.automat(MonitorEvent::Rebuilder(RebuilderState::Done)).await;
    assert!(transitions.is_empty());
    assert_eq!(h.monitor.state(), MonitorState::Restart);
    assert_eq!(h.fire_hire.started.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_hire_new_supplier_restarts_without_retention() {
    let mut h = harness(1);
    h.registry.add("b1", "/a", false);
    h.registry.add("b2", "/a", false);
    seed_remote(&h.inventory, &["b1"]).await;

    h.monitor.automat(MonitorEvent::Restart).await;
    h.monitor.automat(MonitorEvent::Tick).await;
    h.monitor.automat(MonitorEvent::Orator(OratorState::SawFiles)).await;
    h.monitor.automat(MonitorEvent::Rebuilder(RebuilderState::Done)).await;
    h.monitor.automat(MonitorEvent::HireNewSupplier).await;

    assert_eq!(h.monitor.state(), MonitorState::Restart);
    assert_eq!(h.registry.ids().len(), 2);
}

#[tokio::test]
async fn test_state_changes_are_broadcast() {
    let mut h = harness(2);
    let mut rx = h.event_bus.subscribe();

    h.monitor.automat(MonitorEvent::Restart).await;
    // a repeated restart keeps the state and is not broadcast
    h.monitor.automat(MonitorEvent::Restart).await;

    match rx.recv().await.unwrap() {
        HavenEvent::MonitorStateChanged {
            old_state,
            new_state,
            trigger,
            ..
        } => {
            assert_eq!(old_state, MonitorState::Ready);
            assert_eq!(new_state, MonitorState::Restart);
            assert_eq!(trigger, "restart");
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_monitor_task_drives_cycle_from_inbox() {
    let h = harness(2);
    let (handle, inbox) = MonitorHandle::channel();
    *h.orator.reply.lock().unwrap() = Some((handle.clone(), OratorState::NoFiles));

    let shutdown = CancellationToken::new();
    let timers = MonitorTimers {
        tick: Duration::from_millis(10),
        ready_timeout: Duration::from_secs(3600),
    };
    let task = tokio::spawn(run_monitor(h.monitor, inbox, timers, shutdown.clone()));

    handle.post(MonitorEvent::Restart);

    let status = h.status.clone();
    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = status.snapshot().await;
            if snapshot.state == MonitorState::Ready && snapshot.last_trigger.is_some() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cycle should finish");

    assert_eq!(finished.last_trigger.as_deref(), Some("list_files_orator.state"));
    assert_eq!(h.orator.calls.load(Ordering::SeqCst), 1);

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hourly_timer_starts_a_cycle() {
    let h = harness(2);
    let (_handle, inbox) = MonitorHandle::channel();
    let shutdown = CancellationToken::new();
    let timers = MonitorTimers {
        tick: Duration::from_secs(1),
        ready_timeout: Duration::from_secs(3600),
    };
    let task = tokio::spawn(run_monitor(h.monitor, inbox, timers, shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(3605)).await;

    // timer-1hour moved to RESTART, and the next tick on to LIST_FILES
    assert_eq!(h.orator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.status.snapshot().await.state, MonitorState::ListFiles);

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hourly_timer_rearms_on_each_return_to_ready() {
    let h = harness(2);
    let (handle, inbox) = MonitorHandle::channel();
    *h.orator.reply.lock().unwrap() = Some((handle.clone(), OratorState::NoFiles));
    let shutdown = CancellationToken::new();
    let timers = MonitorTimers {
        tick: Duration::from_secs(1),
        ready_timeout: Duration::from_secs(3600),
    };
    let task = tokio::spawn(run_monitor(h.monitor, inbox, timers, shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(3605)).await;
    assert_eq!(h.orator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.status.snapshot().await.state, MonitorState::Ready);

    // a spent timer must not fire again before the next full hour
    tokio::time::sleep(Duration::from_secs(1800)).await;
    assert_eq!(h.orator.calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(1800)).await;
    assert_eq!(h.orator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.status.snapshot().await.state, MonitorState::Ready);

    shutdown.cancel();
    task.await.unwrap();
}
