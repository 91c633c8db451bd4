use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use online_forecast::forecast::ForecastConfig;
use online_forecast::model::forecast::{FallbackReason, ForecastResult, FORECAST_HORIZON};
use online_forecast::model::observation::PriceObservation;
use online_forecast::runtime::model_registry::RegistryConfig;
use online_forecast::service::{
    ForecastService, ForecastSink, PassReport, PriceSource, ServiceSettings,
};

#[derive(Default)]
struct MockSource {
    series: HashMap<String, Vec<PriceObservation>>,
    broken: Vec<String>,
}

impl PriceSource for MockSource {
    fn load_series(&self, symbol: &str, limit: usize) -> Result<Vec<PriceObservation>> {
        if self.broken.iter().any(|s| s == symbol) {
            bail!("connection reset");
        }
        let all = self.series.get(symbol).cloned().unwrap_or_default();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    fn tracked_symbols(&self, limit: usize) -> Result<Vec<String>> {
        let mut symbols: Vec<String> = self
            .series
            .keys()
            .chain(self.broken.iter())
            .cloned()
            .collect();
        symbols.sort();
        symbols.truncate(limit);
        Ok(symbols)
    }
}

#[derive(Default)]
struct MemorySink {
    results: Vec<ForecastResult>,
    fail: bool,
}

impl ForecastSink for MemorySink {
    fn persist(&mut self, result: &ForecastResult) -> Result<()> {
        if self.fail {
            bail!("disk full");
        }
        self.results.push(result.clone());
        Ok(())
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn minute_series(symbol: &str, n: usize) -> Vec<PriceObservation> {
    (0..n)
        .map(|i| {
            let wobble = if i % 3 == 0 { 0.05 } else { -0.02 };
            PriceObservation::new(
                symbol,
                t0() + Duration::minutes(i as i64),
                100.0 + 0.01 * i as f64 + wobble,
            )
        })
        .collect()
}

fn smooth_series(symbol: &str, n: usize) -> Vec<PriceObservation> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            PriceObservation::new(
                symbol,
                t0() + Duration::minutes(i as i64),
                100.0 + 0.01 * t + 0.05 * (0.7 * t).sin(),
            )
        })
        .collect()
}

fn service(source: MockSource, sink: MemorySink) -> ForecastService<MockSource, MemorySink> {
    ForecastService::new(
        source,
        sink,
        ForecastConfig::default(),
        RegistryConfig::default(),
        ServiceSettings::default(),
    )
}

#[test]
/// One symbol failing to load must not stop the others in the same pass.
fn failing_symbol_does_not_abort_pass() {
    let mut source = MockSource::default();
    source.series.insert("good".into(), smooth_series("good", 150));
    source.series.insert("empty".into(), Vec::new());
    source.broken.push("bad".into());
    let mut svc = service(source, MemorySink::default());

    let report = svc.run_pass(t0() + Duration::minutes(150));
    assert_eq!(
        report,
        PassReport {
            symbols: 3,
            forecasted: 1,
            skipped: 1,
            failed: 1,
            persist_failures: 0,
            model_based: 1,
            fallback: 0,
        }
    );

    let results = &svc.sink().results;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].symbol, "good");
    assert_eq!(results[0].forecasts.len(), FORECAST_HORIZON);
    assert_eq!(
        Some(&results[0].current_price),
        results[0].historical_prices.last()
    );
}

#[test]
/// Only pairs whose target is newer than the last trained one are fed again.
fn retraining_is_incremental() {
    let mut source = MockSource::default();
    source.series.insert("btc".into(), minute_series("btc", 40));
    let mut svc = service(source, MemorySink::default());

    svc.process_symbol("btc", t0()).expect("first").expect("result");
    let model = svc.registry().get("btc").expect("model");
    assert_eq!(model.regressor.n_samples(), 20);
    assert_eq!(model.last_trained_at, Some(t0() + Duration::minutes(39)));

    svc.process_symbol("btc", t0()).expect("second").expect("result");
    assert_eq!(svc.registry().get("btc").expect("model").regressor.n_samples(), 20);
}

#[test]
fn new_observations_extend_training() {
    let mut source = MockSource::default();
    source.series.insert("btc".into(), minute_series("btc", 40));
    let mut svc = service(source, MemorySink::default());
    svc.process_symbol("btc", t0()).expect("first");

    svc.source_mut()
        .series
        .insert("btc".into(), minute_series("btc", 45));
    svc.process_symbol("btc", t0()).expect("second");

    let model = svc.registry().get("btc").expect("model");
    assert_eq!(model.regressor.n_samples(), 25);
    assert_eq!(model.history().len(), 45);
}

#[test]
fn short_series_forecasts_without_training() {
    let mut source = MockSource::default();
    source.series.insert("doge".into(), minute_series("doge", 8));
    let mut svc = service(source, MemorySink::default());

    let result = svc
        .process_symbol("DOGE", t0())
        .expect("load ok")
        .expect("has data");
    assert_eq!(result.symbol, "doge");
    assert_eq!(result.strategy.fallback_reason(), Some(FallbackReason::NoModel));
    assert_eq!(result.historical_prices.len(), 8);
    assert!(!svc.registry().get("doge").expect("created").is_trained());
}

#[test]
fn empty_series_yields_none() {
    let mut source = MockSource::default();
    source.series.insert("ghost".into(), Vec::new());
    let mut svc = service(source, MemorySink::default());
    assert!(svc.process_symbol("ghost", t0()).expect("load ok").is_none());
}

#[test]
fn historical_prices_cover_last_hour() {
    let mut source = MockSource::default();
    source.series.insert("eth".into(), minute_series("eth", 200));
    let mut svc = service(source, MemorySink::default());
    let result = svc.process_symbol("eth", t0()).expect("ok").expect("result");
    assert_eq!(result.historical_prices.len(), 61);
}

#[test]
fn sink_failures_are_counted_not_fatal() {
    let mut source = MockSource::default();
    source.series.insert("a".into(), minute_series("a", 30));
    source.series.insert("b".into(), minute_series("b", 30));
    let mut svc = service(
        source,
        MemorySink {
            fail: true,
            ..MemorySink::default()
        },
    );
    let report = svc.run_pass(t0());
    assert_eq!(report.forecasted, 2);
    assert_eq!(report.persist_failures, 2);
    assert!(svc.process_and_persist("a", t0()).is_err());
}

#[test]
fn configured_symbols_override_source_listing() {
    let mut source = MockSource::default();
    source.series.insert("a".into(), minute_series("a", 30));
    source.series.insert("b".into(), minute_series("b", 30));
    let mut svc = ForecastService::new(
        source,
        MemorySink::default(),
        ForecastConfig::default(),
        RegistryConfig::default(),
        ServiceSettings {
            symbols: vec!["b".into()],
            ..ServiceSettings::default()
        },
    );
    let report = svc.run_pass(t0());
    assert_eq!(report.symbols, 1);
    assert_eq!(svc.sink().results[0].symbol, "b");
}

struct CountingSink(Rc<Cell<usize>>);

impl ForecastSink for CountingSink {
    fn persist(&mut self, _result: &ForecastResult) -> Result<()> {
        self.0.set(self.0.get() + 1);
        Ok(())
    }
}

#[test]
/// A failing sink is reported but the sinks after it still receive the result.
fn fan_out_sink_reaches_every_target() {
    let delivered = Rc::new(Cell::new(0));
    let mut sinks: Vec<Box<dyn ForecastSink>> = vec![
        Box::new(MemorySink {
            fail: true,
            ..MemorySink::default()
        }),
        Box::new(CountingSink(delivered.clone())),
    ];
    let mut source = MockSource::default();
    source.series.insert("a".into(), minute_series("a", 30));
    let mut svc = service(source, MemorySink::default());
    let result = svc.process_symbol("a", t0()).expect("ok").expect("result");

    assert!(sinks.persist(&result).is_err());
    assert_eq!(delivered.get(), 1);
}

#[test]
/// A bad price in the stored series neither stops the pass nor poisons the model.
fn infinite_price_in_series_is_survived() {
    let mut series = smooth_series("btc", 150);
    series[140].price = f64::INFINITY;
    let mut source = MockSource::default();
    source.series.insert("btc".into(), series);
    source.series.insert("eth".into(), smooth_series("eth", 150));
    let mut svc = service(source, MemorySink::default());

    let report = svc.run_pass(t0());
    assert_eq!(report.forecasted, 2);
    assert_eq!(report.failed, 0);
    let model = svc.registry().get("btc").expect("model");
    assert!(model.is_trained());
    let st = model.regressor.state().expect("fitted");
    assert!(st.weights.iter().all(|w| w.is_finite()));
    for result in &svc.sink().results {
        assert!(result.forecasts.iter().all(|p| p.forecast_price.is_finite()));
    }
}
