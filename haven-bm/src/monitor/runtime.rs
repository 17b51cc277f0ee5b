//! Monitor driver tasks
//!
//! The monitor is owned by a single task that drains its inbox, so transitions
//! never interleave. Collaborators and HTTP handlers reach it only through a
//! cloneable [`MonitorHandle`].

use super::{BackupMonitor, MonitorEvent};
use crate::models::stats::blocks_and_percent;
use crate::state::SharedInventory;
use haven_common::events::{EventBus, HavenEvent, MonitorState};
use haven_common::time;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Sender side of the monitor inbox
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<MonitorEvent>,
}

/// Receiver side of the monitor inbox
#[derive(Debug)]
pub struct MonitorInbox {
    rx: mpsc::UnboundedReceiver<MonitorEvent>,
}

impl MonitorHandle {
    pub fn channel() -> (Self, MonitorInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, MonitorInbox { rx })
    }

    /// Queue an event; returns false once the monitor task is gone
    pub fn post(&self, event: MonitorEvent) -> bool {
        if self.tx.send(event).is_err() {
            debug!("Monitor stopped, dropping {}", event);
            return false;
        }
        true
    }

    /// Queue an event after `delay`
    pub fn post_after(&self, event: MonitorEvent, delay: Duration) {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.post(event);
        });
    }
}

impl MonitorInbox {
    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MonitorEvent> {
        self.rx.try_recv().ok()
    }
}

/// Timer periods of the monitor task
#[derive(Debug, Clone, Copy)]
pub struct MonitorTimers {
    /// Period of the `timer-1sec` guard poll
    pub tick: Duration,
    /// Time spent in READY before `timer-1hour` fires
    pub ready_timeout: Duration,
}

impl Default for MonitorTimers {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(3600),
        }
    }
}

/// Drive the monitor until shutdown or until every handle is dropped
///
/// The hourly timer is re-armed each time the monitor enters READY and is
/// disarmed while it is anywhere else.
pub async fn run_monitor(
    mut monitor: BackupMonitor,
    mut inbox: MonitorInbox,
    timers: MonitorTimers,
    shutdown: CancellationToken,
) {
    info!("Backup monitor started in {}", monitor.state());

    let mut tick = tokio::time::interval(timers.tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ready_timer = tokio::time::sleep(timers.ready_timeout);
    tokio::pin!(ready_timer);
    let mut ready_armed = monitor.state() == MonitorState::Ready;

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = inbox.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tick.tick() => MonitorEvent::Tick,
            _ = &mut ready_timer, if ready_armed => MonitorEvent::HourlyTimer,
        };

        let transitions = monitor.automat(event).await;

        if transitions.iter().any(|t| t.new_state == MonitorState::Ready) {
            ready_timer
                .as_mut()
                .reset(Instant::now() + timers.ready_timeout);
        }
        ready_armed = monitor.state() == MonitorState::Ready;
    }

    info!("Backup monitor stopped in {}", monitor.state());
}

/// Publish availability of every backup touched since the last pass
pub async fn run_repaint(
    inventory: SharedInventory,
    event_bus: EventBus,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let dirty = inventory.take_dirty().await;
        if dirty.is_empty() {
            continue;
        }

        let state = inventory.read().await;
        for backup_id in dirty {
            let (blocks, percent) = blocks_and_percent(&state.remote, &backup_id);
            event_bus.emit_lossy(HavenEvent::BackupStatusChanged {
                backup_id,
                blocks,
                percent,
                timestamp: time::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FragmentKind, FragmentStatus};
    use haven_common::BackupId;

    #[tokio::test]
    async fn test_handle_post_and_receive() {
        let (handle, mut inbox) = MonitorHandle::channel();
        assert!(handle.post(MonitorEvent::Restart));
        assert_eq!(inbox.recv().await, Some(MonitorEvent::Restart));
        drop(inbox);
        assert!(!handle.post(MonitorEvent::Restart));
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_after_delays_event() {
        let (handle, mut inbox) = MonitorHandle::channel();
        handle.post_after(MonitorEvent::Restart, Duration::from_secs(1));
        tokio::task::yield_now().await;
        assert!(inbox.try_recv().is_none());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(inbox.try_recv(), Some(MonitorEvent::Restart));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repaint_flushes_dirty_backups() {
        let inventory = SharedInventory::new(vec!["a".to_string()]);
        let backup_id = BackupId::new("b1").unwrap();
        {
            let mut state = inventory.write().await;
            for kind in FragmentKind::BOTH {
                state
                    .remote
                    .set_fragment(&backup_id, 0, kind, 0, FragmentStatus::Present);
            }
        }
        inventory.mark_dirty(backup_id.clone()).await;

        let event_bus = EventBus::new(16);
        let mut rx = event_bus.subscribe();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_repaint(
            inventory.clone(),
            event_bus.clone(),
            Duration::from_secs(2),
            shutdown.clone(),
        ));

        match rx.recv().await.unwrap() {
            HavenEvent::BackupStatusChanged {
                backup_id: id,
                blocks,
                percent,
                ..
            } => {
                assert_eq!(id, backup_id);
                assert_eq!(blocks, 1);
                assert!((percent - 100.0).abs() < 1e-9);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(inventory.take_dirty().await.is_empty());

        shutdown.cancel();
        task.await.unwrap();
    }
}
