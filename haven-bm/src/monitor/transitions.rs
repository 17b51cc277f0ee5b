//! Backup monitor transition table
//!
//! `step` is a pure function of (state, event, guards). It never performs side
//! effects; it names them as [`Action`]s which the monitor executes after the
//! state change is committed.

use haven_common::events::{MonitorState, OratorState, RebuilderState};
use serde::Serialize;

/// Events the monitor reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorEvent {
    /// Abort whatever is in flight and start a new cycle
    Restart,
    /// Hourly timer, armed on entry to READY
    HourlyTimer,
    /// One-second timer polling the rebuilder guard
    Tick,
    /// List-files orator finished collecting replies
    Orator(OratorState),
    /// Raised by the monitor itself once the candidate set is prepared
    ListBackupsDone,
    /// Backup rebuilder reported its aggregate state
    Rebuilder(RebuilderState),
    /// Fire/hire asked for a replacement supplier
    HireNewSupplier,
    /// Fire/hire found no supplier to replace
    FireHireFinished,
}

impl MonitorEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::Restart => "restart",
            MonitorEvent::HourlyTimer => "timer-1hour",
            MonitorEvent::Tick => "timer-1sec",
            MonitorEvent::Orator(_) => "list_files_orator.state",
            MonitorEvent::ListBackupsDone => "list-backups-done",
            MonitorEvent::Rebuilder(_) => "backup_rebuilder.state",
            MonitorEvent::HireNewSupplier => "hire-new-supplier",
            MonitorEvent::FireHireFinished => "fire-hire-finished",
        }
    }

    /// Parse a wire name plus optional state argument
    ///
    /// The two collaborator state events require an argument; the rest reject one.
    pub fn parse(name: &str, arg: Option<&str>) -> Result<Self, String> {
        let event = match (name, arg) {
            ("restart", None) => MonitorEvent::Restart,
            ("timer-1hour", None) => MonitorEvent::HourlyTimer,
            ("timer-1sec", None) => MonitorEvent::Tick,
            ("list-backups-done", None) => MonitorEvent::ListBackupsDone,
            ("hire-new-supplier", None) => MonitorEvent::HireNewSupplier,
            ("fire-hire-finished", None) => MonitorEvent::FireHireFinished,
            ("list_files_orator.state", Some(arg)) => MonitorEvent::Orator(arg.parse()?),
            ("backup_rebuilder.state", Some(arg)) => MonitorEvent::Rebuilder(arg.parse()?),
            ("list_files_orator.state" | "backup_rebuilder.state", None) => {
                return Err(format!("event {} requires a state argument", name));
            }
            (
                "restart" | "timer-1hour" | "timer-1sec" | "list-backups-done"
                | "hire-new-supplier" | "fire-hire-finished",
                Some(_),
            ) => {
                return Err(format!("event {} takes no argument", name));
            }
            _ => return Err(format!("unknown event: {}", name)),
        };
        Ok(event)
    }
}

impl std::fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorEvent::Orator(state) => write!(f, "{}({})", self.name(), state),
            MonitorEvent::Rebuilder(state) => write!(f, "{}({})", self.name(), state),
            _ => f.write_str(self.name()),
        }
    }
}

/// Side effects requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    /// Ask the orator for fresh list-files replies
    RequestListFiles,
    /// Compute rebuild candidates and queue them; raises `list-backups-done`
    PrepareListBackups,
    StartRebuilder,
    StopRebuilder,
    StartFireHire,
    /// Retention pass over every directory group
    CleanUpBackups,
}

/// Collaborator state sampled when the event is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guards {
    pub rebuilder: RebuilderState,
}

/// Result of a defined transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub next: MonitorState,
    pub actions: Vec<Action>,
}

impl Step {
    fn to(next: MonitorState) -> Self {
        Self {
            next,
            actions: Vec::new(),
        }
    }

    fn with(next: MonitorState, action: Action) -> Self {
        Self {
            next,
            actions: vec![action],
        }
    }
}

/// Transition table; `None` means the event is ignored in this state
pub fn step(state: MonitorState, event: MonitorEvent, guards: Guards) -> Option<Step> {
    use MonitorEvent as E;
    use MonitorState as S;

    match (state, event) {
        (S::Ready, E::Restart | E::HourlyTimer) => Some(Step::to(S::Restart)),

        (S::Restart, E::Tick) if guards.rebuilder.is_idle() => {
            Some(Step::with(S::ListFiles, Action::RequestListFiles))
        }
        (S::Restart, E::Restart) => Some(Step::to(S::Restart)),

        (S::ListFiles, E::Orator(OratorState::SawFiles)) => {
            Some(Step::with(S::ListBackups, Action::PrepareListBackups))
        }
        (S::ListFiles, E::Orator(OratorState::NoFiles)) => Some(Step::to(S::Ready)),
        (S::ListFiles, E::Restart) => Some(Step::to(S::Restart)),

        (S::ListBackups, E::ListBackupsDone) => {
            Some(Step::with(S::Rebuilding, Action::StartRebuilder))
        }
        (S::ListBackups, E::Restart) => Some(Step::to(S::Restart)),

        (S::Rebuilding, E::Rebuilder(RebuilderState::Done)) => {
            Some(Step::with(S::FireHire, Action::StartFireHire))
        }
        (S::Rebuilding, E::Rebuilder(RebuilderState::Stopped)) => Some(Step::to(S::Ready)),
        (S::Rebuilding, E::Restart) => Some(Step::with(S::Restart, Action::StopRebuilder)),

        (S::FireHire, E::HireNewSupplier | E::Restart) => Some(Step::to(S::Restart)),
        (S::FireHire, E::FireHireFinished) => {
            Some(Step::with(S::Ready, Action::CleanUpBackups))
        }

        _ => None,
    }
}
