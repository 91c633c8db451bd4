use anyhow::{bail, Result};
use chrono::Utc;

use online_forecast::app::{build_service, init_tracing};
use online_forecast::config::Config;

/// Train on the stored series for one symbol, forecast once, print JSON to stdout.
fn main() -> Result<()> {
    let Some(symbol) = std::env::args().nth(1) else {
        bail!("usage: forecast-once <symbol>");
    };

    let config = Config::load()?;
    init_tracing(&config.logging)?;

    let mut service = build_service(&config)?;
    let now = Utc::now();
    let output = match service.process_and_persist(&symbol, now)? {
        Some(result) => serde_json::to_string_pretty(&result)?,
        None => serde_json::to_string_pretty(&serde_json::json!({
            "symbol": symbol.trim().to_lowercase(),
            "current_price": null,
            "historical_prices": [],
            "forecasts": [],
            "generated_at": now,
        }))?,
    };
    println!("{}", output);
    Ok(())
}
