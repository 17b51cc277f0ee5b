//! haven-bm library - backup monitor
//!
//! Keeps every registered backup fully stored across the supplier set:
//! collects file listings, re-sends missing fragments, replaces silent
//! suppliers and prunes old backups per source directory.

use axum::Router;
use chrono::{DateTime, Utc};
use haven_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod monitor;
pub mod services;
pub mod state;

use monitor::{MonitorHandle, SharedMonitorStatus};
use services::{BackupJanitor, BackupRebuilder, SupplierRoster, TransportOrator};
use state::SharedInventory;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub monitor: MonitorHandle,
    pub status: SharedMonitorStatus,
    pub inventory: SharedInventory,
    pub rebuilder: Arc<dyn BackupRebuilder>,
    pub janitor: Arc<BackupJanitor>,
    pub orator: TransportOrator,
    pub roster: SupplierRoster,
    pub event_bus: EventBus,
    pub startup_time: DateTime<Utc>,
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post, put};

    let api = Router::new()
        .route("/api/buildinfo", get(api::get_build_info))
        .route("/api/status", get(api::get_status))
        .route("/api/events", get(api::event_stream))
        .route("/api/events/:name", post(api::post_event))
        .route("/api/backups", get(api::list_backups).post(api::register_backup))
        .route("/api/backups/:id", axum::routing::delete(api::delete_backup))
        .route("/api/backups/:id/stats", get(api::backup_stats))
        .route("/api/backups/:id/finished", post(api::finish_backup))
        .route(
            "/api/backups/:id/in-process",
            post(api::mark_in_process).delete(api::unmark_in_process),
        )
        .route("/api/suppliers", get(api::list_suppliers).put(api::set_suppliers))
        .route("/api/suppliers/:num/list-files", post(api::incoming_list_files));

    Router::new()
        .merge(api)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
