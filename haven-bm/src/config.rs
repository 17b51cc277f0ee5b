//! Runtime settings
//!
//! Bootstrap settings (root folder, port, gateway, initial roster) come from
//! TOML via `haven_common::config`. Everything tunable at runtime lives in
//! the `settings` table; missing keys are written back with their defaults
//! so the database always shows the values in effect.

use crate::db::settings::ensure_setting;
use crate::models::list_files::DEFAULT_MAX_BLOCKS;
use haven_common::{time, Result};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    /// Newest backups kept per source directory (at least 1)
    pub backups_to_keep: usize,
    pub list_files_timeout_secs: u64,
    /// How long the monitor idles in READY before the next cycle
    pub restart_interval_secs: u64,
    pub tick_interval_ms: u64,
    pub repaint_interval_ms: u64,
    pub fire_inactive_supplier_hours: f64,
    pub event_bus_capacity: usize,
    /// List-files lines and local fragments naming a block at or past this are rejected
    pub max_blocks_per_backup: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            backups_to_keep: 2,
            list_files_timeout_secs: 20,
            restart_interval_secs: 3600,
            tick_interval_ms: 1000,
            repaint_interval_ms: 2000,
            fire_inactive_supplier_hours: 24.0,
            event_bus_capacity: 256,
            max_blocks_per_backup: DEFAULT_MAX_BLOCKS,
        }
    }
}

impl RuntimeSettings {
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        let mut backups_to_keep =
            ensure_setting(pool, "backups_to_keep", defaults.backups_to_keep).await?;
        if backups_to_keep == 0 {
            warn!("backups_to_keep = 0 would delete every backup, using 1");
            backups_to_keep = 1;
        }

        let settings = Self {
            backups_to_keep,
            list_files_timeout_secs: ensure_setting(
                pool,
                "list_files_timeout_secs",
                defaults.list_files_timeout_secs,
            )
            .await?,
            restart_interval_secs: ensure_setting(
                pool,
                "restart_interval_secs",
                defaults.restart_interval_secs,
            )
            .await?
            .max(1),
            tick_interval_ms: ensure_setting(pool, "tick_interval_ms", defaults.tick_interval_ms)
                .await?
                .max(10),
            repaint_interval_ms: ensure_setting(
                pool,
                "repaint_interval_ms",
                defaults.repaint_interval_ms,
            )
            .await?
            .max(10),
            fire_inactive_supplier_hours: ensure_setting(
                pool,
                "fire_inactive_supplier_hours",
                defaults.fire_inactive_supplier_hours,
            )
            .await?,
            event_bus_capacity: ensure_setting(
                pool,
                "event_bus_capacity",
                defaults.event_bus_capacity,
            )
            .await?
            .max(1),
            max_blocks_per_backup: ensure_setting(
                pool,
                "max_blocks_per_backup",
                defaults.max_blocks_per_backup,
            )
            .await?
            .max(1),
        };

        info!("Loaded runtime settings from database");
        Ok(settings)
    }

    pub fn list_files_timeout(&self) -> Duration {
        Duration::from_secs(self.list_files_timeout_secs)
    }

    pub fn restart_interval(&self) -> Duration {
        Duration::from_secs(self.restart_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        time::millis_to_duration(self.tick_interval_ms)
    }

    pub fn repaint_interval(&self) -> Duration {
        time::millis_to_duration(self.repaint_interval_ms)
    }
}
