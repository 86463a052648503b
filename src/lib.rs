pub mod breaks;
pub mod collector;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod session;
pub mod shifts;
pub mod utils;

use std::sync::Arc;

use chrono::Local;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use breaks::BreakStateMachine;
use collector::{CollectionOrchestrator, CollectionStatusObserver};
use config::{CollectorConfig, LoggingConfig};
use connection::{ConnectionManager, ConnectionSettings};
use db::Database;
use error::StartupError;
use session::{simulated::is_simulated, SessionFactory, SimulatedFactory, SimulatedLine};
use utils::TeeWriter;

/// Picks the session driver for the configured endpoint.
fn session_factory(config: &CollectorConfig) -> Result<Arc<dyn SessionFactory>, StartupError> {
    let endpoint = &config.connection.endpoint;
    if is_simulated(endpoint) {
        info!("Using simulated line controller at {endpoint}");
        return Ok(Arc::new(SimulatedFactory::new(
            endpoint.clone(),
            SimulatedLine::new(),
            &config.security(),
        )));
    }
    Err(StartupError::config(format!(
        "no protocol driver is linked for {endpoint}; use a sim:// endpoint"
    )))
}

fn spawn_shutdown_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(err) => error!("Failed to listen for shutdown signal: {err}"),
        }
        shutdown.cancel();
    });
}

fn init_logging(logging: &LoggingConfig) {
    let level = if config::debug_mode() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    // Initialize logging (reads RUST_LOG env var)
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    if let Some(path) = &logging.file {
        match TeeWriter::open(path) {
            Ok(writer) => {
                builder.target(env_logger::Target::Pipe(Box::new(writer)));
            }
            Err(err) => eprintln!(
                "Failed to open log file {}: {err}; logging to console only",
                path.display()
            ),
        }
    }
    builder.init();
}

pub async fn run() -> Result<(), StartupError> {
    let config_path = CollectorConfig::default_path();
    let config = CollectorConfig::load(&config_path)?;
    init_logging(&config.logging);

    info!("OEE collector starting up...");
    info!(
        "Loaded configuration from {} (tracked units: {:?})",
        config_path.display(),
        config.machine.tracked_units
    );

    let db = Database::new(config.database.path.clone()).map_err(StartupError::Store)?;
    let factory = session_factory(&config)?;

    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    let mut breaks = BreakStateMachine::new(
        db.clone(),
        config.shifts,
        config.machine.reference_strategy(),
    );
    match breaks.recover_open_breaks(Local::now().naive_local()).await {
        Ok(0) => {}
        Ok(count) => warn!("Closed {count} break record(s) left open by a previous run"),
        Err(err) => error!("Failed to recover open breaks: {err:?}"),
    }

    let mut manager = ConnectionManager::new(
        factory,
        ConnectionSettings::from_config(&config.connection),
        db.clone(),
        &shutdown,
    )
    .with_observer(Arc::new(CollectionStatusObserver));
    manager.start().await?;

    let mut orchestrator = CollectionOrchestrator::new(
        db.clone(),
        manager.handles(),
        breaks,
        &config.machine,
        config.nodes.clone(),
    );
    orchestrator.run(config.interval(), shutdown.clone()).await;

    if let Err(err) = orchestrator.shutdown(Local::now().naive_local()).await {
        error!("Failed to close open break on shutdown: {err:?}");
    }
    if let Err(err) = manager.stop().await {
        error!("Failed to stop connection manager: {err:?}");
    }

    info!("OEE collector stopped");
    Ok(())
}
