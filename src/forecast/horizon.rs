//! Multi-step expansion of a one-step view into the fixed forecast horizon.
//!
//! Both paths compound from the current price and clamp every step into the
//! `[1 - max_deviation, 1 + max_deviation] × current` band, so no step of any
//! forecast can leave the band even if an earlier step was clipped.

use crate::forecast::ForecastConfig;
use crate::model::forecast::FORECAST_HORIZON;

/// Ordered `(low, high)` band around `current`.
pub fn price_band(current: f64, max_deviation: f64) -> (f64, f64) {
    let a = current * (1.0 - max_deviation);
    let b = current * (1.0 + max_deviation);
    (a.min(b), a.max(b))
}

pub fn clamp_to_band(price: f64, band: (f64, f64)) -> f64 {
    price.max(band.0).min(band.1)
}

pub fn flat_prices(current: f64) -> Vec<f64> {
    vec![current; FORECAST_HORIZON]
}

/// Model path: multiplicative trend decaying by `model_dampening^k`.
pub fn expand_model_trend(current: f64, base_trend: f64, cfg: &ForecastConfig) -> Vec<f64> {
    let band = price_band(current, cfg.max_deviation);
    let step_clip = cfg.max_step_change.abs();
    let mut out = Vec::with_capacity(FORECAST_HORIZON);
    let mut last = current;
    for k in 1..=FORECAST_HORIZON {
        let trend = (base_trend * cfg.model_dampening.powi(k as i32)).clamp(-step_clip, step_clip);
        last = clamp_to_band(last * (1.0 + trend), band);
        out.push(last);
    }
    out
}

/// Average successive difference over the last `lookback` prices, clipped to
/// `max_step_change × current`. Zero when there is nothing to average.
pub fn average_delta(current: f64, recent: &[f64], cfg: &ForecastConfig) -> f64 {
    let lookback = cfg.trend_lookback.max(2);
    let tail = &recent[recent.len().saturating_sub(lookback)..];
    if tail.len() < 2 {
        return 0.0;
    }
    let diffs = tail.len() - 1;
    let sum: f64 = tail.windows(2).map(|w| w[1] - w[0]).sum();
    let avg = sum / diffs as f64;
    if !avg.is_finite() {
        return 0.0;
    }
    let max_change = (current * cfg.max_step_change).abs();
    avg.clamp(-max_change, max_change)
}

/// Fallback path: additive delta decaying by `trend_dampening^k`. Flat when
/// fewer than `min_trend_history` prices are available.
pub fn trend_fallback_prices(current: f64, recent: &[f64], cfg: &ForecastConfig) -> Vec<f64> {
    if recent.len() < cfg.min_trend_history {
        return flat_prices(current);
    }
    let band = price_band(current, cfg.max_deviation);
    let avg_delta = average_delta(current, recent, cfg);
    let mut out = Vec::with_capacity(FORECAST_HORIZON);
    let mut last = current;
    for k in 1..=FORECAST_HORIZON {
        let delta = avg_delta * cfg.trend_dampening.powi(k as i32);
        last = clamp_to_band(last + delta, band);
        out.push(last);
    }
    out
}
