//! Monitor-related type definitions
//!
//! States of the backup monitor and of the collaborator automatons whose
//! status it reacts to. Wire names are the upper-case forms (`LIST_FILES`,
//! `SAW_FILES`, ...).

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Backup monitor state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    /// Idle, waiting for `restart` or the hourly timer
    Ready,
    /// Waiting for the rebuilder to settle before a new cycle
    Restart,
    /// Waiting for supplier list-files replies
    ListFiles,
    /// Candidate set computed, waiting for the self-raised done event
    ListBackups,
    /// Rebuilder is working through the candidate queue
    Rebuilding,
    /// Replacing unresponsive suppliers
    FireHire,
}

impl MonitorState {
    pub const ALL: [MonitorState; 6] = [
        MonitorState::Ready,
        MonitorState::Restart,
        MonitorState::ListFiles,
        MonitorState::ListBackups,
        MonitorState::Rebuilding,
        MonitorState::FireHire,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Ready => "READY",
            MonitorState::Restart => "RESTART",
            MonitorState::ListFiles => "LIST_FILES",
            MonitorState::ListBackups => "LIST_BACKUPS",
            MonitorState::Rebuilding => "REBUILDING",
            MonitorState::FireHire => "FIRE_HIRE",
        }
    }
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate state reported by the backup rebuilder
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebuilderState {
    /// Not running; either never started or halted by the stop flag
    Stopped,
    /// Working through its queue
    Running,
    /// Queue drained
    Done,
}

impl RebuilderState {
    /// Whether a new cycle may start
    pub fn is_idle(&self) -> bool {
        matches!(self, RebuilderState::Stopped | RebuilderState::Done)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RebuilderState::Stopped => "STOPPED",
            RebuilderState::Running => "RUNNING",
            RebuilderState::Done => "DONE",
        }
    }
}

impl std::fmt::Display for RebuilderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RebuilderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOPPED" => Ok(RebuilderState::Stopped),
            "RUNNING" => Ok(RebuilderState::Running),
            "DONE" => Ok(RebuilderState::Done),
            other => Err(format!("unknown rebuilder state: {}", other)),
        }
    }
}

/// Outcome reported by the list-files orator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OratorState {
    /// At least one backup is known locally or remotely
    SawFiles,
    /// Nothing known anywhere
    NoFiles,
}

impl OratorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OratorState::SawFiles => "SAW_FILES",
            OratorState::NoFiles => "NO_FILES",
        }
    }
}

impl std::fmt::Display for OratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OratorState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SAW_FILES" => Ok(OratorState::SawFiles),
            "NO_FILES" => Ok(OratorState::NoFiles),
            other => Err(format!("unknown orator state: {}", other)),
        }
    }
}
