//! Event types for the haven event system
//!
//! Provides the shared HavenEvent enum and the broadcast EventBus used to fan
//! monitor activity out to SSE clients and other in-process listeners.

mod monitor_types;

pub use monitor_types::{MonitorState, OratorState, RebuilderState};

use crate::BackupId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Haven event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HavenEvent {
    /// Backup monitor changed state
    MonitorStateChanged {
        old_state: MonitorState,
        new_state: MonitorState,
        /// Wire name of the event that caused the transition
        trigger: String,
        timestamp: DateTime<Utc>,
    },

    /// Backup rebuilder changed its aggregate state
    RebuilderStateChanged {
        state: RebuilderState,
        timestamp: DateTime<Utc>,
    },

    /// Remote availability of a backup changed
    ///
    /// Emitted by the repaint loop, at most once per backup per interval.
    BackupStatusChanged {
        backup_id: BackupId,
        /// Number of blocks known remotely
        blocks: u64,
        /// Share of Data and Parity fragments confirmed on suppliers, 0-100
        percent: f64,
        timestamp: DateTime<Utc>,
    },

    /// A backup was removed from the registry
    BackupDeleted {
        backup_id: BackupId,
        files_removed: u64,
        bytes_freed: u64,
        timestamp: DateTime<Utc>,
    },

    /// Retention pass finished
    RetentionCompleted {
        backups_deleted: u64,
        bytes_freed: u64,
        timestamp: DateTime<Utc>,
    },

    /// Supplier roster replaced
    SupplierListChanged {
        supplier_count: usize,
        /// True when the count changed and all fragment info was discarded
        count_changed: bool,
        /// Positions whose identity changed (empty when `count_changed`)
        changed_positions: Vec<usize>,
        timestamp: DateTime<Utc>,
    },

    /// A supplier answered a list-files request
    ListFilesReceived {
        supplier_num: usize,
        backups: usize,
        timestamp: DateTime<Utc>,
    },
}

impl HavenEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            HavenEvent::MonitorStateChanged { .. } => "MonitorStateChanged",
            HavenEvent::RebuilderStateChanged { .. } => "RebuilderStateChanged",
            HavenEvent::BackupStatusChanged { .. } => "BackupStatusChanged",
            HavenEvent::BackupDeleted { .. } => "BackupDeleted",
            HavenEvent::RetentionCompleted { .. } => "RetentionCompleted",
            HavenEvent::SupplierListChanged { .. } => "SupplierListChanged",
            HavenEvent::ListFilesReceived { .. } => "ListFilesReceived",
        }
    }
}

/// Broadcast bus for HavenEvent
///
/// Cloning is cheap; all clones share one channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HavenEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    ///
    /// # Examples
    ///
    /// ```
    /// use haven_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<HavenEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` when nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: HavenEvent,
    ) -> Result<usize, broadcast::error::SendError<HavenEvent>> {
        self.tx.send(event)
    }

    /// Emit without caring whether anyone listens
    pub fn emit_lossy(&self, event: HavenEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_changed() -> HavenEvent {
        HavenEvent::MonitorStateChanged {
            old_state: MonitorState::Ready,
            new_state: MonitorState::Restart,
            trigger: "restart".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_emit_without_subscribers_fails() {
        let bus = EventBus::new(10);
        assert!(bus.emit(state_changed()).is_err());
    }

    #[test]
    fn test_eventbus_emit() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        assert_eq!(bus.emit(state_changed()).unwrap(), 1);

        let received = rx.try_recv().expect("Should receive event");
        assert_eq!(received.event_type(), "MonitorStateChanged");
    }

    #[test]
    fn test_eventbus_emit_lossy_on_full_channel() {
        let bus = EventBus::new(2);
        let _rx = bus.subscribe();
        for supplier_num in 0..10 {
            bus.emit_lossy(HavenEvent::ListFilesReceived {
                supplier_num,
                backups: 1,
                timestamp: Utc::now(),
            });
        }
        assert_eq!(bus.capacity(), 2);
    }

    #[test]
    fn test_eventbus_clones_share_channel() {
        let bus = EventBus::new(10);
        let clone = bus.clone();
        let mut rx = bus.subscribe();
        clone.emit_lossy(state_changed());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(state_changed()).unwrap();
        assert_eq!(json["type"], "MonitorStateChanged");
        assert_eq!(json["old_state"], "READY");
        assert_eq!(json["new_state"], "RESTART");
    }

    #[test]
    fn test_rebuilder_state_idle() {
        assert!(RebuilderState::Stopped.is_idle());
        assert!(RebuilderState::Done.is_idle());
        assert!(!RebuilderState::Running.is_idle());
    }

    #[test]
    fn test_state_wire_names_parse() {
        assert_eq!("SAW_FILES".parse::<OratorState>(), Ok(OratorState::SawFiles));
        assert_eq!("DONE".parse::<RebuilderState>(), Ok(RebuilderState::Done));
        assert!("done".parse::<RebuilderState>().is_err());
    }
}
