use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of one-minute steps produced by every forecast call.
pub const FORECAST_HORIZON: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub minute: u32,
    pub forecast_price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Why the generator left the model-based path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No fitted model for the symbol yet.
    NoModel,
    /// Fewer observations than the model path needs.
    InsufficientHistory,
    /// Too few observations to estimate any trend; the forecast is flat.
    FlatHistory,
    /// Scaler could not transform the inference vector.
    ScalerNotReady,
    /// Regressor rejected the input.
    PredictionFailed,
    /// Predicted one-step ratio outside the sanity band.
    RatioOutOfBand,
    /// Implied one-step move larger than the instability threshold.
    UnstableMove,
    /// Current price is non-finite or non-positive.
    InvalidPrice,
}

impl FallbackReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackReason::NoModel => "no_model",
            FallbackReason::InsufficientHistory => "insufficient_history",
            FallbackReason::FlatHistory => "flat_history",
            FallbackReason::ScalerNotReady => "scaler_not_ready",
            FallbackReason::PredictionFailed => "prediction_failed",
            FallbackReason::RatioOutOfBand => "ratio_out_of_band",
            FallbackReason::UnstableMove => "unstable_move",
            FallbackReason::InvalidPrice => "invalid_price",
        }
    }
}

/// Which path produced a forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForecastStrategy {
    ModelBased,
    TrendFallback { reason: FallbackReason },
}

impl ForecastStrategy {
    pub fn is_model_based(&self) -> bool {
        matches!(self, ForecastStrategy::ModelBased)
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            ForecastStrategy::ModelBased => None,
            ForecastStrategy::TrendFallback { reason } => Some(*reason),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ForecastStrategy::ModelBased => "model",
            ForecastStrategy::TrendFallback { reason } => reason.as_str(),
        }
    }
}

/// Output of one generator call: the tag plus exactly [`FORECAST_HORIZON`] points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub strategy: ForecastStrategy,
    pub points: Vec<ForecastPoint>,
}

impl Forecast {
    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.forecast_price).collect()
    }
}

/// Per-symbol result handed to the storage/API boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub symbol: String,
    pub current_price: f64,
    pub historical_prices: Vec<f64>,
    pub forecasts: Vec<ForecastPoint>,
    pub generated_at: DateTime<Utc>,
    pub strategy: ForecastStrategy,
}
