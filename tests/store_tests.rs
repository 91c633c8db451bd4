use chrono::{DateTime, Duration, TimeZone, Utc};
use online_forecast::model::forecast::{
    FallbackReason, ForecastPoint, ForecastResult, ForecastStrategy,
};
use online_forecast::model::observation::PriceObservation;
use online_forecast::store::snapshot::load_snapshot;
use online_forecast::store::{JsonSnapshotSink, SqliteForecastStore, SqlitePriceStore};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 4, 15, 0, 0).unwrap()
}

fn result_at(symbol: &str, generated_at: DateTime<Utc>, base: f64) -> ForecastResult {
    ForecastResult {
        symbol: symbol.to_string(),
        current_price: base,
        historical_prices: vec![base - 1.0, base],
        forecasts: (1..=5)
            .map(|m| ForecastPoint {
                minute: m,
                forecast_price: base + m as f64 * 0.1,
                timestamp: generated_at + Duration::minutes(m as i64),
            })
            .collect(),
        generated_at,
        strategy: ForecastStrategy::TrendFallback {
            reason: FallbackReason::NoModel,
        },
    }
}

#[test]
fn price_store_returns_newest_window_in_order() {
    let mut store = SqlitePriceStore::in_memory().expect("open");
    let obs: Vec<_> = (0..10)
        .map(|i| PriceObservation::new("BTC", t0() + Duration::minutes(i), 100.0 + i as f64))
        .collect();
    assert_eq!(store.record(&obs).expect("record"), 10);

    let series = store.load_series("btc", 4).expect("load");
    let prices: Vec<f64> = series.iter().map(|o| o.price).collect();
    assert_eq!(prices, vec![106.0, 107.0, 108.0, 109.0]);
    assert_eq!(series[0].symbol, "btc");
    assert_eq!(series[3].timestamp, t0() + Duration::minutes(9));
}

#[test]
fn price_store_upserts_same_timestamp() {
    let mut store = SqlitePriceStore::in_memory().expect("open");
    store
        .record(&[PriceObservation::new("eth", t0(), 1.0)])
        .expect("first");
    store
        .record(&[PriceObservation::new("eth", t0(), 2.0)])
        .expect("second");
    let series = store.load_series("eth", 10).expect("load");
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].price, 2.0);
}

#[test]
fn tracked_symbols_most_recent_first() {
    let mut store = SqlitePriceStore::in_memory().expect("open");
    store
        .record(&[
            PriceObservation::new("old", t0(), 1.0),
            PriceObservation::new("new", t0() + Duration::minutes(5), 1.0),
            PriceObservation::new("mid", t0() + Duration::minutes(2), 1.0),
        ])
        .expect("record");
    assert_eq!(
        store.tracked_symbols(2).expect("list"),
        vec!["new".to_string(), "mid".to_string()]
    );
    assert!(store.load_series("missing", 10).expect("load").is_empty());
}

#[test]
/// A forecast within five minutes of the previous one replaces it; older
/// generations are kept.
fn forecast_store_replaces_recent_generation() {
    let mut store = SqliteForecastStore::in_memory().expect("open");
    store.persist(&result_at("btc", t0(), 100.0)).expect("first");
    store
        .persist(&result_at("btc", t0() + Duration::minutes(2), 101.0))
        .expect("replace");
    assert_eq!(
        store.generations("btc").expect("generations"),
        vec![t0() + Duration::minutes(2)]
    );

    store
        .persist(&result_at("btc", t0() + Duration::minutes(10), 102.0))
        .expect("append");
    assert_eq!(store.generations("btc").expect("generations").len(), 2);

    store.persist(&result_at("eth", t0(), 5.0)).expect("other symbol");
    assert_eq!(store.generations("btc").expect("generations").len(), 2);
}

#[test]
fn latest_forecast_reads_back_points() {
    let mut store = SqliteForecastStore::in_memory().expect("open");
    assert!(store.latest_forecast("btc").expect("query").is_none());

    store.persist(&result_at("BTC", t0(), 100.0)).expect("persist");
    let latest = store
        .latest_forecast("btc")
        .expect("query")
        .expect("stored");
    assert_eq!(latest.symbol, "btc");
    assert_eq!(latest.generated_at, t0());
    assert_eq!(latest.current_price, 100.0);
    assert_eq!(latest.strategy, "no_model");
    assert_eq!(latest.points, result_at("btc", t0(), 100.0).forecasts);
}

#[test]
fn snapshot_sink_writes_daily_file() {
    let dir = std::env::temp_dir().join(format!(
        "online-forecast-snapshots-{}-{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    let sink = JsonSnapshotSink::new(&dir);
    let result = result_at("Sol", t0(), 20.0);

    let path = sink.write(&result).expect("write");
    assert_eq!(path, dir.join("sol_forecast_2024-07-04.json"));
    let loaded = load_snapshot(&path).expect("read back");
    assert_eq!(loaded.symbol, "Sol");
    assert_eq!(loaded.strategy, result.strategy);
    assert_eq!(loaded.generated_at, result.generated_at);
    assert_eq!(loaded.forecasts.len(), 5);
    for (a, b) in loaded.forecasts.iter().zip(&result.forecasts) {
        assert_eq!(a.timestamp, b.timestamp);
        assert!((a.forecast_price - b.forecast_price).abs() < 1e-9);
    }

    let later = result_at("sol", t0() + Duration::hours(1), 21.0);
    assert_eq!(sink.write(&later).expect("overwrite"), path);
    let loaded = load_snapshot(&path).expect("read back");
    assert!((loaded.current_price - 21.0).abs() < 1e-9);

    std::fs::remove_dir_all(&dir).ok();
}
