use anyhow::Result;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use dbus_interface::{GuidanceService, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("poseguided starting");

    let config = config::Config::from_env();
    let catalog = config.load_catalog()?;
    let calibration = config.load_calibration()?;
    tracing::info!(
        steps = catalog.len(),
        rules = ?config.rules_path,
        calibration = ?config.calibration_path,
        "configuration loaded"
    );

    let (engine, mut events) = engine::spawn_engine(catalog, calibration, config.event_buffer)?;

    let service = GuidanceService {
        engine: engine.clone(),
    };
    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let connection = builder
        .name(config.bus_name.as_str())?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;
    tracing::info!(bus_name = %config.bus_name, path = OBJECT_PATH, "D-Bus interface registered");

    // Countdown seconds are observed within one interval.
    let ticker = engine.clone();
    let tick_period = Duration::from_millis(config.tick_interval_ms);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if ticker.tick().await.is_err() {
                tracing::warn!("engine gone; stopping ticker");
                break;
            }
        }
    });

    let iface = connection
        .object_server()
        .interface::<_, GuidanceService>(OBJECT_PATH)
        .await?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!(?event, "guidance event");
            if let Err(e) = dbus_interface::emit_event(iface.signal_emitter(), &event).await {
                tracing::warn!(error = %e, "failed to emit signal");
            }
        }
    });

    tracing::info!("poseguided ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("poseguided shutting down");

    Ok(())
}
