//! haven-bm - backup monitor daemon
//!
//! Wires the monitor to its collaborators, starts the monitor and repaint
//! tasks, kicks off a first cycle and serves the control API.

use anyhow::{Context, Result};
use clap::Parser;
use haven_bm::config::RuntimeSettings;
use haven_bm::db::suppliers::{load_suppliers, save_suppliers};
use haven_bm::db::SqliteBackupRegistry;
use haven_bm::monitor::{
    run_monitor, run_repaint, BackupMonitor, MonitorDeps, MonitorEvent, MonitorHandle,
    MonitorTimers, SharedMonitorStatus,
};
use haven_bm::services::{
    BackupJanitor, BackupRebuilder, BackupRegistry, FireHire, HttpTransport, InactivityFireHire,
    ListFilesOrator, LocalCopyRepair, OfflineTransport, QueueRebuilder, SupplierRoster,
    SupplierTransport, TransportOrator,
};
use haven_bm::state::SharedInventory;
use haven_bm::{build_router, AppState};
use haven_common::config::{
    default_config_path, load_toml_config, CompiledDefaults, RootFolderInitializer,
    RootFolderResolver, TomlConfig,
};
use haven_common::db::init::init_database;
use haven_common::events::EventBus;
use haven_common::time;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MODULE_NAME: &str = "haven-bm";

#[derive(Parser, Debug)]
#[command(name = "haven-bm")]
#[command(about = "Backup monitor for the haven backup network")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "HAVEN_BM_PORT")]
    port: Option<u16>,

    /// Root folder holding haven.db and data-par/
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Bootstrap TOML file
    #[arg(short, long, env = "HAVEN_BM_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| default_config_path(MODULE_NAME));
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path).context("Failed to load config file")?,
        None => TomlConfig::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{},tower_http=info", toml_config.logging.level).into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true),
        )
        .init();

    info!(
        "Starting haven backup monitor (haven-bm) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml(&toml_config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;
    info!("Root folder: {}", initializer.root_folder().display());

    let pool = init_database(&initializer.database_path())
        .await
        .context("Failed to open database")?;
    let settings = RuntimeSettings::load(&pool).await?;
    let event_bus = EventBus::new(settings.event_bus_capacity);

    let mut suppliers = load_suppliers(&pool).await?;
    if suppliers.is_empty() && !toml_config.suppliers.is_empty() {
        info!("Seeding supplier roster from config file");
        suppliers = toml_config.suppliers.clone();
        save_suppliers(&pool, &suppliers).await?;
    }
    if suppliers.is_empty() {
        warn!("No suppliers configured; set them with PUT /api/suppliers");
    } else {
        info!("{} suppliers in roster", suppliers.len());
    }
    let inventory = SharedInventory::new(suppliers);

    let transport: Arc<dyn SupplierTransport> = match &toml_config.transport_gateway {
        Some(gateway) => {
            info!("Transport gateway: {}", gateway);
            Arc::new(HttpTransport::new(gateway)?)
        }
        None => {
            warn!("No transport gateway configured, every supplier reads as offline");
            Arc::new(OfflineTransport)
        }
    };

    let data_par_dir = initializer.data_par_dir();
    let (monitor_handle, inbox) = MonitorHandle::channel();

    let rebuilder = Arc::new(QueueRebuilder::new(
        inventory.clone(),
        Arc::new(LocalCopyRepair::new(transport.clone(), data_par_dir.clone())),
        transport.clone(),
        monitor_handle.clone(),
        event_bus.clone(),
    ));
    let rebuilder: Arc<dyn BackupRebuilder> = rebuilder;

    let registry: Arc<dyn BackupRegistry> = Arc::new(SqliteBackupRegistry::new(pool.clone()));
    let janitor = Arc::new(BackupJanitor::new(
        registry.clone(),
        inventory.clone(),
        rebuilder.clone(),
        event_bus.clone(),
        data_par_dir.clone(),
    ));
    let orator = TransportOrator::new(
        transport.clone(),
        inventory.clone(),
        monitor_handle.clone(),
        event_bus.clone(),
        data_par_dir,
        settings.list_files_timeout(),
        settings.max_blocks_per_backup,
    );
    let fire_hire: Arc<dyn FireHire> = Arc::new(InactivityFireHire::new(
        inventory.clone(),
        transport,
        monitor_handle.clone(),
        settings.fire_inactive_supplier_hours,
    ));
    let roster = SupplierRoster::new(
        pool.clone(),
        inventory.clone(),
        monitor_handle.clone(),
        event_bus.clone(),
    );

    let orator_dep: Arc<dyn ListFilesOrator> = Arc::new(orator.clone());
    let status = SharedMonitorStatus::new();
    let monitor = BackupMonitor::new(
        MonitorDeps {
            registry,
            orator: orator_dep,
            rebuilder: rebuilder.clone(),
            fire_hire,
            janitor: janitor.clone(),
            inventory: inventory.clone(),
            event_bus: event_bus.clone(),
        },
        settings.backups_to_keep,
        status.clone(),
    );

    let shutdown = CancellationToken::new();
    let timers = MonitorTimers {
        tick: settings.tick_interval(),
        ready_timeout: settings.restart_interval(),
    };
    let monitor_task = tokio::spawn(run_monitor(monitor, inbox, timers, shutdown.clone()));
    let repaint_task = tokio::spawn(run_repaint(
        inventory.clone(),
        event_bus.clone(),
        settings.repaint_interval(),
        shutdown.clone(),
    ));

    monitor_handle.post(MonitorEvent::Restart);

    let state = AppState {
        db: pool,
        monitor: monitor_handle,
        status,
        inventory,
        rebuilder,
        janitor,
        orator,
        roster,
        event_bus,
        startup_time: time::now(),
    };
    let app = build_router(state);

    let port = args
        .port
        .or(toml_config.port)
        .unwrap_or(CompiledDefaults::for_current_platform().port);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("haven-bm listening on http://{}", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    for (name, task) in [("monitor", monitor_task), ("repaint", repaint_task)] {
        if let Err(e) = task.await {
            error!("{} task ended abnormally: {}", name, e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
