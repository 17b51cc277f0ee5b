//! Database access for haven-bm
//!
//! Tables are created by `haven_common::db::init`; these modules only query.

pub mod backups;
pub mod settings;
pub mod suppliers;

pub use backups::SqliteBackupRegistry;
