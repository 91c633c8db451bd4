use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LoggingConfig};
use crate::service::{ForecastService, ForecastSink, ServiceSettings};
use crate::store::{JsonSnapshotSink, SqliteForecastStore, SqlitePriceStore};

pub type SqliteForecastService = ForecastService<SqlitePriceStore, Vec<Box<dyn ForecastSink>>>;

/// JSON lines to `logging.file` (or stderr). `RUST_LOG` overrides `logging.level`.
pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &logging.file {
        Some(path) => {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create log dir {}", parent.display()))?;
                }
            }
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(log_file)
                .with_ansi(false)
                .json()
                .try_init()
                .map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .try_init()
            .map_err(|e| anyhow!("failed to install tracing subscriber: {}", e)),
    }
}

/// Output sinks in fan-out order: the forecast table, then daily JSON snapshots.
pub fn build_sinks(config: &Config) -> Result<Vec<Box<dyn ForecastSink>>> {
    let mut sinks: Vec<Box<dyn ForecastSink>> = Vec::new();
    let store = SqliteForecastStore::open(&config.storage.forecast_db_path)
        .with_context(|| format!("failed to open {}", config.storage.forecast_db_path))?;
    sinks.push(Box::new(store));
    if let Some(dir) = &config.storage.snapshot_dir {
        sinks.push(Box::new(JsonSnapshotSink::new(dir)));
    }
    Ok(sinks)
}

pub fn build_service(config: &Config) -> Result<SqliteForecastService> {
    let source = SqlitePriceStore::open(&config.storage.price_db_path)
        .with_context(|| format!("failed to open {}", config.storage.price_db_path))?;
    Ok(ForecastService::new(
        source,
        build_sinks(config)?,
        config.forecast,
        config.registry.to_registry_config(),
        ServiceSettings::from(&config.service),
    ))
}
