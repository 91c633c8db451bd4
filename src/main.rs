use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;

use online_forecast::app::{build_service, init_tracing};
use online_forecast::config::Config;
use online_forecast::runtime::scheduler::run_scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set FORECAST_CONFIG_PATH or create config/default.toml");
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging)?;

    let interval = Duration::from_millis(config.service.interval_ms()?);
    tracing::info!(
        interval = %config.service.interval,
        price_db = %config.storage.price_db_path,
        forecast_db = %config.storage.forecast_db_path,
        sequence_length = config.forecast.sequence_length,
        "Starting online-forecast"
    );

    let mut service = build_service(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Ctrl-C received; stopping after the current pass");
        let _ = shutdown_tx.send(true);
    });

    let passes = run_scheduler(&mut service, interval, shutdown_rx).await;
    tracing::info!(
        passes,
        symbols = service.registry().len(),
        "Shutdown complete"
    );
    Ok(())
}
