//! # Haven Common Library
//!
//! Shared code for the haven backup services:
//! - Backup identifiers and their chronological ordering
//! - Event types (HavenEvent) and the broadcast EventBus
//! - Database initialization for the backup registry
//! - Bootstrap configuration and root folder resolution

pub mod backup_id;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use backup_id::BackupId;
pub use error::{Error, Result};
