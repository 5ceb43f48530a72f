use anyhow::{Context, Result};
use rollcall_core::{Controller, CsvAttendanceStore, ReferenceIndex, SystemClock};
use rollcall_hw::Camera;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod matcher;
mod source;

use config::Config;
use dbus_interface::RollcallService;
use matcher::CommandMatcher;
use source::CameraSource;

const BUS_NAME: &str = "org.rollcall.Rollcall1";
const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load()?;

    let reference_db = &config.attendance.reference_db;
    let reference = match ReferenceIndex::scan(reference_db) {
        Ok(index) => {
            tracing::info!(
                root = %index.root().display(),
                identities = index.len(),
                "reference database loaded"
            );
            if index.is_empty() {
                tracing::warn!("reference database has no enrolled identities");
            }
            index
        }
        Err(e) => {
            tracing::warn!(error = %e, "reference database unavailable; matching fails until it appears");
            ReferenceIndex::empty(reference_db)
        }
    };

    let matcher = CommandMatcher::new(&config.matcher_command, config.matcher_timeout())?;

    let mut camera = Camera::open(&config.camera_device)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    camera.warmup(config.warmup_frames);
    let source = CameraSource::new(camera, config.skip_dark_frames);

    let mut controller = Controller::new(
        source,
        matcher,
        reference,
        config.attendance.distance_threshold,
        SystemClock,
    );
    controller.refresh_reference(config.reference_refresh());

    let store = CsvAttendanceStore::new(&config.attendance.log_path);
    match controller.attach_store(store) {
        Ok(()) => {
            tracing::info!(path = %config.attendance.log_path.display(), "attendance log ready");
            if config.reconcile_on_start {
                if let Err(e) = controller.reconcile() {
                    tracing::warn!(error = %e, "could not read today's attendance; ledger starts empty");
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "attendance log unavailable; recording disabled");
        }
    }

    let engine = engine::spawn_engine(controller, config.tick_interval())?;
    let shutdown = Arc::new(Notify::new());

    let service = RollcallService {
        engine: engine.clone(),
        shutdown: Arc::clone(&shutdown),
    };

    let _conn = match serve(service).await {
        Ok(conn) => conn,
        Err(e) => {
            let _ = engine.shutdown().await;
            return Err(e);
        }
    };
    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");

    if config.autostart {
        engine.start()?;
    }

    tracing::info!("rollcalld ready");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("interrupted");
        }
        _ = shutdown.notified() => {}
    }

    tracing::info!("rollcalld shutting down");
    // Already gone if the exit came through D-Bus Shutdown.
    if let Err(e) = engine.shutdown().await {
        tracing::debug!(error = %e, "engine already stopped");
    }

    Ok(())
}

async fn serve(service: RollcallService) -> Result<zbus::Connection> {
    let conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to acquire D-Bus name {BUS_NAME}"))?;
    Ok(conn)
}
