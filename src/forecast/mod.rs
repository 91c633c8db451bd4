pub mod generator;
pub mod horizon;

use serde::Deserialize;

pub use generator::ForecastGenerator;

/// Thresholds of the forecast decision procedure.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Trailing prices per feature window.
    pub sequence_length: usize,
    /// Every forecast price stays within `current × (1 ± max_deviation)`.
    pub max_deviation: f64,
    pub ratio_min: f64,
    pub ratio_max: f64,
    /// Largest accepted one-step move implied by the model, as a fraction.
    pub max_one_step_move: f64,
    pub model_dampening: f64,
    pub trend_dampening: f64,
    /// Per-step cap on trend, as a fraction of price.
    pub max_step_change: f64,
    pub min_model_history: usize,
    pub min_trend_history: usize,
    pub trend_lookback: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            sequence_length: 20,
            max_deviation: 0.07,
            ratio_min: 0.5,
            ratio_max: 2.0,
            max_one_step_move: 0.01,
            model_dampening: 0.3,
            trend_dampening: 0.7,
            max_step_change: 0.005,
            min_model_history: 5,
            min_trend_history: 3,
            trend_lookback: 10,
        }
    }
}
