//! RoboVac Bridge
//!
//! Exposes a Eufy RoboVac as a home-automation accessory backed by a cached,
//! self-healing device session.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use robovac_bridge::accessory::{AccessoryOptions, CharacteristicUpdate, RoboVacAccessory};
use robovac_bridge::config::{AppConfig, ConfigWatcher};
use robovac_bridge::device::{PartialState, PropertyKey, RoboVac, RoboVacOptions, SessionState};
use robovac_bridge::logging::init_logging;
use robovac_bridge::paths::AppPaths;
use robovac_bridge::transport::SimulatedTransport;
use robovac_bridge::cli;

/// RoboVac Bridge - cached, self-healing bridge for Eufy RoboVac vacuums
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the application data dir)
    #[arg(short, long, env = "ROBOVAC_CONFIG")]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write daily-rolling logs into this directory
    #[arg(long, env = "ROBOVAC_LOG_DIR")]
    log_file: Option<PathBuf>,

    /// Emit console logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Start an interactive shell instead of the bridge loop
    #[arg(long)]
    repl: bool,

    /// Print the resolved configuration path and exit
    #[arg(long)]
    print_config_path: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let paths = AppPaths::detect();

    if args.print_config_path {
        println!("{}", paths.config.display());
        return Ok(());
    }

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => {
            paths.ensure_directories()?;
            paths.config.to_string_lossy().into_owned()
        },
    };

    let _log_guard = init_logging(&args.log_level, args.log_file.as_deref(), args.log_json)?;

    info!("Starting RoboVac Bridge v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", config_path);
    info!("Data directory: {}", paths.base_dir().display());

    let config_watcher = ConfigWatcher::new(config_path).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    let config = config_watcher.current().clone();
    let vac = RoboVac::new(
        RoboVacOptions::from_config(&config),
        Arc::new(simulated_transport(&config)),
    );

    let name = vac.name().to_string();
    vac.subscribe_status(Arc::new(move |state: SessionState| {
        info!(device = %name, ?state, "Session state changed");
    }));

    let accessory = RoboVacAccessory::new(vac.clone(), AccessoryOptions::from_config(&config));
    accessory.set_update_callback(Arc::new(|updates: &[CharacteristicUpdate]| {
        for update in updates {
            info!(
                "📤 {:?}.{} = {}",
                update.service, update.characteristic, update.value
            );
        }
    }));

    if args.repl {
        let reload_task = tokio::spawn(config_watcher.drive(vac.clone()));
        cli::run_repl(vac.clone()).await?;
        reload_task.abort();
    } else {
        run_bridge(&accessory, config_watcher, shutdown_signal()).await;
    }

    info!("Shutting down...");
    vac.disconnect().await;
    info!("RoboVac Bridge shutdown complete");
    Ok(())
}

/// Device used until a network transport is configured
fn simulated_transport(config: &AppConfig) -> SimulatedTransport {
    let transport = SimulatedTransport::new(config.device_id.clone())
        .with_latency(Duration::from_millis(config.simulator.latency_ms));
    transport.set_device_state(
        &PartialState::new().with(PropertyKey::BatteryLevel, i64::from(config.simulator.initial_battery)),
    );
    transport
}

async fn run_bridge(
    accessory: &RoboVacAccessory,
    mut config_watcher: ConfigWatcher,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let vac = accessory.device();
    info!(
        "Publishing {} services for {}",
        accessory.services().len(),
        accessory.name()
    );

    // Warm the cache so the first host read is served locally
    match vac.refresh().await {
        Ok(state) => info!("Initial status:\n{}", state.format_status()),
        Err(e) => warn!("Initial status request failed (will retry on demand): {}", e),
    }

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(reload) = config_watcher.next_reload() => {
                reload.apply(vac);
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
}
