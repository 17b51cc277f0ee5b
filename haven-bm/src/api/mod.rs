//! HTTP API handlers for haven-bm

pub mod backups;
pub mod buildinfo;
pub mod health;
pub mod sse;
pub mod status;
pub mod suppliers;

pub use backups::{
    backup_stats, delete_backup, finish_backup, list_backups, mark_in_process, register_backup,
    unmark_in_process,
};
pub use buildinfo::get_build_info;
pub use health::health_routes;
pub use sse::event_stream;
pub use status::{get_status, post_event};
pub use suppliers::{incoming_list_files, list_suppliers, set_suppliers};
