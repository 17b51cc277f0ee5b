//! Database schema for the backup registry

pub mod init;
pub mod models;
