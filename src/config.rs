use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::forecast::ForecastConfig;
use crate::model::observation::normalize_symbol;
use crate::predictor::RegressorConfig;
use crate::runtime::model_registry::{RegistryConfig, DEFAULT_HISTORY_CAPACITY};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const MAX_SYMBOLS_PER_PASS: usize = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub forecast: ForecastConfig,
    pub service: ServiceConfig,
    #[serde(default)]
    pub registry: RegistrySection,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Pass cadence, e.g. "1m".
    pub interval: String,
    /// Explicit symbols; empty means "whatever the price store tracks".
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default = "default_max_symbols_per_pass")]
    pub max_symbols_per_pass: usize,
    #[serde(default = "default_history_window_minutes")]
    pub history_window_minutes: i64,
    #[serde(default = "default_min_history_points")]
    pub min_history_points: usize,
    /// Most recent observations loaded per symbol and pass.
    #[serde(default = "default_series_limit")]
    pub series_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub history_capacity: usize,
    pub max_symbols: Option<usize>,
    pub regularization: f64,
    pub pinv_epsilon: f64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        let reg = RegressorConfig::default();
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            max_symbols: None,
            regularization: reg.regularization,
            pinv_epsilon: reg.pinv_epsilon,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub price_db_path: String,
    pub forecast_db_path: String,
    #[serde(default)]
    pub snapshot_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_max_symbols_per_pass() -> usize {
    MAX_SYMBOLS_PER_PASS
}

fn default_history_window_minutes() -> i64 {
    60
}

fn default_min_history_points() -> usize {
    10
}

fn default_series_limit() -> usize {
    1_440
}

/// Parse an interval string (e.g. "30s", "1m", "1h", "1d") into milliseconds.
pub fn parse_interval_ms(s: &str) -> Result<u64> {
    if s.len() < 2 {
        bail!("invalid interval '{}': expected format like '1m'", s);
    }

    let (num_str, suffix) = s.split_at(s.len() - 1);
    let n: u64 = num_str.parse().with_context(|| {
        format!(
            "invalid interval '{}': quantity must be a positive integer",
            s
        )
    })?;
    if n == 0 {
        bail!("invalid interval '{}': quantity must be > 0", s);
    }

    let unit_ms = match suffix {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => bail!(
            "invalid interval '{}': unsupported suffix '{}', expected one of s/m/h/d",
            s,
            suffix
        ),
    };

    n.checked_mul(unit_ms)
        .with_context(|| format!("invalid interval '{}': value is too large", s))
}

impl ServiceConfig {
    pub fn interval_ms(&self) -> Result<u64> {
        parse_interval_ms(&self.interval)
    }

    /// Configured symbols, normalized, de-duplicated and capped per pass.
    pub fn tracked_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for sym in &self.symbols {
            let s = normalize_symbol(sym);
            if !s.is_empty() && !out.iter().any(|v| v == &s) {
                out.push(s);
            }
        }
        out.truncate(self.max_symbols_per_pass);
        out
    }
}

impl RegistrySection {
    pub fn to_registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            regressor: RegressorConfig {
                regularization: self.regularization,
                pinv_epsilon: self.pinv_epsilon,
            },
            history_capacity: self.history_capacity,
            max_symbols: self.max_symbols,
        }
    }
}

fn config_path() -> PathBuf {
    std::env::var("FORECAST_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::load_from_path(&config_path())?;

        if let Ok(path) = std::env::var("FORECAST_PRICE_DB") {
            config.storage.price_db_path = path;
        }
        if let Ok(path) = std::env::var("FORECAST_OUTPUT_DB") {
            config.storage.forecast_db_path = path;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.service
            .interval_ms()
            .context("service.interval is invalid")?;
        if self.forecast.sequence_length == 0 {
            bail!("forecast.sequence_length must be > 0");
        }
        if !(self.forecast.max_deviation > 0.0) {
            bail!("forecast.max_deviation must be > 0");
        }
        if !(self.forecast.ratio_min < self.forecast.ratio_max) {
            bail!("forecast.ratio_min must be below forecast.ratio_max");
        }
        if !(self.registry.regularization > 0.0) {
            bail!("registry.regularization must be > 0");
        }
        if self.registry.pinv_epsilon < 0.0 {
            bail!("registry.pinv_epsilon must be >= 0");
        }
        if self.registry.max_symbols == Some(0) {
            bail!("registry.max_symbols must be > 0 when set");
        }
        if self.service.max_symbols_per_pass == 0 {
            bail!("service.max_symbols_per_pass must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[forecast]
sequence_length = 12

[service]
interval = "1m"
symbols = ["bitcoin", " Ethereum ", "BITCOIN", "  "]

[registry]
max_symbols = 64

[storage]
price_db_path = "data/prices.sqlite"
forecast_db_path = "data/forecasts.sqlite"
snapshot_dir = "data/forecasts"

[logging]
level = "debug"
"#;

    #[test]
    fn parse_sample_toml() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.forecast.sequence_length, 12);
        assert!((config.forecast.max_deviation - 0.07).abs() < f64::EPSILON);
        assert_eq!(config.service.max_symbols_per_pass, 50);
        assert_eq!(config.service.history_window_minutes, 60);
        assert_eq!(config.registry.history_capacity, 100);
        assert_eq!(config.registry.max_symbols, Some(64));
        assert!((config.registry.regularization - 0.01).abs() < f64::EPSILON);
        assert_eq!(config.storage.snapshot_dir.as_deref(), Some("data/forecasts"));
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn tracked_symbols_dedup_and_normalize() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            config.service.tracked_symbols(),
            vec!["bitcoin".to_string(), "ethereum".to_string()]
        );
    }

    #[test]
    fn rejects_zero_sequence_length() {
        let s = SAMPLE.replace("sequence_length = 12", "sequence_length = 0");
        assert!(Config::from_toml_str(&s).is_err());
    }

    #[test]
    fn parse_interval_valid() {
        assert_eq!(parse_interval_ms("1m").unwrap(), 60_000);
        assert_eq!(parse_interval_ms("30s").unwrap(), 30_000);
        assert_eq!(parse_interval_ms("2h").unwrap(), 7_200_000);
    }

    #[test]
    fn parse_interval_rejects_invalid_inputs() {
        assert!(parse_interval_ms("").is_err());
        assert!(parse_interval_ms("m").is_err());
        assert!(parse_interval_ms("0m").is_err());
        assert!(parse_interval_ms("1x").is_err());
    }
}
