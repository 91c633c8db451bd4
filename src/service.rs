use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};

use crate::config::ServiceConfig;
use crate::forecast::{ForecastConfig, ForecastGenerator};
use crate::model::forecast::ForecastResult;
use crate::model::observation::{normalize_symbol, prices_of, PriceObservation};
use crate::runtime::model_registry::{ModelRegistry, RegistryConfig};
use crate::store::{JsonSnapshotSink, SqliteForecastStore, SqlitePriceStore};

/// Where observed price series come from.
pub trait PriceSource {
    /// Up to `limit` newest observations for `symbol`, oldest first.
    fn load_series(&self, symbol: &str, limit: usize) -> Result<Vec<PriceObservation>>;

    fn tracked_symbols(&self, limit: usize) -> Result<Vec<String>>;
}

/// Where finished forecasts go.
pub trait ForecastSink {
    fn persist(&mut self, result: &ForecastResult) -> Result<()>;
}

impl PriceSource for SqlitePriceStore {
    fn load_series(&self, symbol: &str, limit: usize) -> Result<Vec<PriceObservation>> {
        Ok(SqlitePriceStore::load_series(self, symbol, limit)?)
    }

    fn tracked_symbols(&self, limit: usize) -> Result<Vec<String>> {
        Ok(SqlitePriceStore::tracked_symbols(self, limit)?)
    }
}

impl ForecastSink for SqliteForecastStore {
    fn persist(&mut self, result: &ForecastResult) -> Result<()> {
        Ok(SqliteForecastStore::persist(self, result)?)
    }
}

impl ForecastSink for JsonSnapshotSink {
    fn persist(&mut self, result: &ForecastResult) -> Result<()> {
        self.write(result)?;
        Ok(())
    }
}

/// Every sink gets the result; the first failure is reported after all were tried.
impl ForecastSink for Vec<Box<dyn ForecastSink>> {
    fn persist(&mut self, result: &ForecastResult) -> Result<()> {
        let mut first_err = None;
        for sink in self.iter_mut() {
            if let Err(e) = sink.persist(result) {
                tracing::warn!(symbol = %result.symbol, error = %e, "Forecast sink failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    /// Explicit symbols; empty means ask the source.
    pub symbols: Vec<String>,
    pub max_symbols_per_pass: usize,
    pub history_window_minutes: i64,
    pub min_history_points: usize,
    pub series_limit: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            max_symbols_per_pass: 50,
            history_window_minutes: 60,
            min_history_points: 10,
            series_limit: 1_440,
        }
    }
}

impl From<&ServiceConfig> for ServiceSettings {
    fn from(cfg: &ServiceConfig) -> Self {
        Self {
            symbols: cfg.tracked_symbols(),
            max_symbols_per_pass: cfg.max_symbols_per_pass,
            history_window_minutes: cfg.history_window_minutes,
            min_history_points: cfg.min_history_points,
            series_limit: cfg.series_limit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub symbols: usize,
    pub forecasted: usize,
    /// Symbols with no observations.
    pub skipped: usize,
    /// Symbols whose series could not be loaded.
    pub failed: usize,
    pub persist_failures: usize,
    pub model_based: usize,
    pub fallback: usize,
}

/// Last `window_minutes` of the series. When that holds fewer than
/// `min_points` observations, the tail of `max(min_points, min(window_minutes, len))`
/// observations is used instead.
pub fn recent_window(
    series: &[PriceObservation],
    window_minutes: i64,
    min_points: usize,
) -> &[PriceObservation] {
    let Some(last) = series.last() else {
        return series;
    };
    let cutoff = last.timestamp - Duration::minutes(window_minutes);
    let start = series.partition_point(|o| o.timestamp < cutoff);
    if series.len() - start >= min_points {
        return &series[start..];
    }
    let take = min_points
        .max(series.len().min(window_minutes.max(0) as usize))
        .min(series.len());
    &series[series.len() - take..]
}

/// Train-then-forecast loop over a price source, one symbol at a time.
pub struct ForecastService<S: PriceSource, K: ForecastSink> {
    source: S,
    sink: K,
    registry: ModelRegistry,
    generator: ForecastGenerator,
    settings: ServiceSettings,
}

impl<S: PriceSource, K: ForecastSink> ForecastService<S, K> {
    pub fn new(
        source: S,
        sink: K,
        forecast: ForecastConfig,
        registry: RegistryConfig,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            source,
            sink,
            registry: ModelRegistry::new(registry),
            generator: ForecastGenerator::new(forecast),
            settings,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModelRegistry {
        &mut self.registry
    }

    pub fn generator(&self) -> &ForecastGenerator {
        &self.generator
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Load, train on unseen pairs, forecast. `Ok(None)` when the symbol has no data.
    pub fn process_symbol(&mut self, symbol: &str, now: DateTime<Utc>) -> Result<Option<ForecastResult>> {
        let symbol = normalize_symbol(symbol);
        let series = self
            .source
            .load_series(&symbol, self.settings.series_limit)
            .with_context(|| format!("failed to load price series for {}", symbol))?;
        if series.is_empty() {
            tracing::debug!(symbol = %symbol, "No price observations; skipping");
            return Ok(None);
        }
        let prices = prices_of(&series);

        let model = self.registry.get_or_create(&symbol);
        model.observe(&series);
        let first_target = match model.last_trained_at {
            Some(t) => series.partition_point(|o| o.timestamp <= t),
            None => 0,
        };
        if let Some(set) = self
            .generator
            .preparer()
            .prepare_training_from(&prices, first_target)
        {
            let last_index = set.target_indices.last().copied();
            match model.train(&set.design_matrix(), &set.target_vector()) {
                Ok(outcome) => {
                    if let Some(i) = last_index {
                        model.last_trained_at = Some(series[i].timestamp);
                    }
                    tracing::debug!(
                        symbol = %symbol,
                        samples = outcome.samples,
                        scaled = outcome.scaled,
                        solve = outcome.solve.as_str(),
                        weights_norm = model.regressor.weights_norm(),
                        "Model updated"
                    );
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Training batch rejected");
                }
            }
        }

        let window = recent_window(
            &series,
            self.settings.history_window_minutes,
            self.settings.min_history_points,
        );
        let recent = prices_of(window);
        let current_price = recent.last().copied().unwrap_or(0.0);
        let forecast = self
            .generator
            .forecast(self.registry.get(&symbol), current_price, &recent, now);
        if let Some(reason) = forecast.strategy.fallback_reason() {
            tracing::debug!(symbol = %symbol, reason = reason.as_str(), "Using trend fallback");
        }

        Ok(Some(ForecastResult {
            symbol,
            current_price,
            historical_prices: recent,
            forecasts: forecast.points,
            generated_at: now,
            strategy: forecast.strategy,
        }))
    }

    /// [`process_symbol`](Self::process_symbol) followed by a sink write.
    pub fn process_and_persist(&mut self, symbol: &str, now: DateTime<Utc>) -> Result<Option<ForecastResult>> {
        let Some(result) = self.process_symbol(symbol, now)? else {
            return Ok(None);
        };
        self.sink
            .persist(&result)
            .with_context(|| format!("failed to persist forecast for {}", result.symbol))?;
        Ok(Some(result))
    }

    fn pass_symbols(&self) -> Result<Vec<String>> {
        if !self.settings.symbols.is_empty() {
            let mut symbols = self.settings.symbols.clone();
            symbols.truncate(self.settings.max_symbols_per_pass);
            return Ok(symbols);
        }
        self.source
            .tracked_symbols(self.settings.max_symbols_per_pass)
            .context("failed to list tracked symbols")
    }

    /// Forecast every tracked symbol. A failing symbol never stops the pass.
    pub fn run_pass(&mut self, now: DateTime<Utc>) -> PassReport {
        let mut report = PassReport::default();
        let symbols = match self.pass_symbols() {
            Ok(symbols) => symbols,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "Forecast pass aborted");
                return report;
            }
        };
        report.symbols = symbols.len();

        for symbol in &symbols {
            match self.process_symbol(symbol, now) {
                Ok(Some(result)) => {
                    report.forecasted += 1;
                    if result.strategy.is_model_based() {
                        report.model_based += 1;
                    } else {
                        report.fallback += 1;
                    }
                    if let Err(e) = self.sink.persist(&result) {
                        report.persist_failures += 1;
                        tracing::warn!(symbol = %symbol, error = %format!("{:#}", e), "Failed to persist forecast");
                    }
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(symbol = %symbol, error = %format!("{:#}", e), "Forecast failed");
                }
            }
        }

        tracing::info!(
            symbols = report.symbols,
            forecasted = report.forecasted,
            model_based = report.model_based,
            fallback = report.fallback,
            skipped = report.skipped,
            failed = report.failed,
            persist_failures = report.persist_failures,
            "Forecast pass complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn series(n: usize) -> Vec<PriceObservation> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| PriceObservation::new("btc", t0 + Duration::minutes(i as i64), 100.0 + i as f64))
            .collect()
    }

    #[test]
    fn recent_window_keeps_last_hour() {
        let s = series(200);
        let w = recent_window(&s, 60, 10);
        assert_eq!(w.len(), 61);
        assert_eq!(w.last(), s.last());
    }

    #[test]
    fn recent_window_widens_sparse_series() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let sparse: Vec<_> = (0..30)
            .map(|i| PriceObservation::new("btc", t0 + Duration::hours(i), 1.0))
            .collect();
        assert_eq!(recent_window(&sparse, 60, 10).len(), 30);
        assert_eq!(recent_window(&sparse[..4], 60, 10).len(), 4);
    }

    #[test]
    fn recent_window_empty() {
        assert!(recent_window(&[], 60, 10).is_empty());
    }
}
