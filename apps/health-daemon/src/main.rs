use anyhow::{Context, Result};
use battery_link::{BatteryMonitor, MockLink, MonitorHandle};
use board_probe::{Board, BoardCapabilities, ProbeInputs, SystemProbe};
use clap::{ArgAction, Parser};
use health_cache::{MetricsHub, TtlCache};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

mod config;
mod error;
mod resources;
mod routes;
mod triggers;
mod watchdog;

use config::{BatteryConfig, DaemonConfig};
use resources::{build_registry, Sources};
use routes::AppState;
use triggers::Triggers;
use watchdog::Health;

#[derive(Parser)]
#[command(name = "health-daemon")]
#[command(about = "Robot health daemon: battery link, cached hardware metrics and HTTP API")]
struct Args {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration
    #[arg(long)]
    bind: Option<String>,

    /// Use the simulated battery instead of the USB serial link
    #[arg(long, action = ArgAction::SetTrue)]
    mock: bool,

    /// Battery device path, skips USB discovery
    #[arg(long)]
    device: Option<String>,

    /// Log at debug level when RUST_LOG is not set
    #[arg(long, action = ArgAction::SetTrue)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing(args.debug || std::env::var("DEBUG").is_ok_and(|v| v == "1"));

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(device) = args.device {
        config.battery.device = Some(device);
    }

    info!("health-daemon starting");
    let metrics = MetricsHub::new().map_err(|e| anyhow::anyhow!(e))?;
    let cache = Arc::new(TtlCache::new());

    let battery = if config.battery.enabled {
        Some(start_battery(&config.battery, args.mock, cache.clone(), &metrics)?)
    } else {
        info!("Battery monitor disabled");
        None
    };

    let board = Board::select(config.board, ProbeInputs::gather());
    info!(family = ?board.family(), "Board ready");
    let sources = Sources {
        board: Arc::new(board),
        system: Arc::new(SystemProbe::new()),
        battery: battery.clone(),
    };
    let registry = Arc::new(build_registry(
        sources,
        cache,
        &config.resources,
        Some(metrics.cache.clone()),
    )?);

    let health = Health::default();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watchdog = tokio::spawn(watchdog::run(
        health.clone(),
        registry.clone(),
        Duration::from_millis(config.watchdog.period_ms),
        shutdown_rx,
    ));

    let triggers = Triggers::new(config.triggers.clone(), battery.clone());
    if triggers.enabled() {
        warn!("Power triggers are enabled");
    }
    let app = routes::router(AppState {
        registry,
        battery: battery.clone(),
        health,
        metrics,
        triggers: Arc::new(triggers),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("cannot bind {}", config.server.bind))?;
    info!(addr = %config.server.bind, "HTTP API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = watchdog.await {
        warn!(error = %e, "Watchdog task failed");
    }
    if let Some(handle) = battery {
        tokio::task::spawn_blocking(move || handle.shutdown()).await?;
    }
    info!("health-daemon stopped");
    Ok(())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BatteryBackend {
    Simulated,
    UsbSerial,
}

/// The simulated pack only runs when asked for; a build without the serial
/// backend refuses to start rather than serve made-up readings.
fn battery_backend(mock: bool) -> Result<BatteryBackend> {
    if mock {
        return Ok(BatteryBackend::Simulated);
    }
    if cfg!(feature = "serial") {
        Ok(BatteryBackend::UsbSerial)
    } else {
        anyhow::bail!(
            "built without the `serial` feature; pass --mock, disable the battery, or rebuild with --features serial"
        )
    }
}

fn start_battery(
    cfg: &BatteryConfig,
    mock: bool,
    cache: Arc<TtlCache<serde_json::Value>>,
    metrics: &MetricsHub,
) -> Result<MonitorHandle> {
    let monitor_config = cfg.monitor_config();
    match battery_backend(mock)? {
        BatteryBackend::Simulated => {
            info!("Starting battery monitor on the simulated link");
            Ok(BatteryMonitor::new(MockLink::simulated(), cache, monitor_config)
                .with_metrics(metrics.link.clone())
                .spawn()?)
        }
        BatteryBackend::UsbSerial => {
            #[cfg(feature = "serial")]
            {
                let usb = cfg.usb()?;
                info!(%usb, "Starting battery monitor on USB serial");
                let link = battery_link::UsbSerialLink::new(usb, cfg.read_timeout());
                return Ok(BatteryMonitor::new(link, cache, monitor_config)
                    .with_metrics(metrics.link.clone())
                    .spawn()?);
            }
            #[cfg(not(feature = "serial"))]
            anyhow::bail!("serial backend not compiled in");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn setup_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
