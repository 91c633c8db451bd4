use chrono::{DateTime, Duration, Utc};
use nalgebra::DMatrix;

use crate::forecast::horizon::{expand_model_trend, flat_prices, trend_fallback_prices};
use crate::forecast::ForecastConfig;
use crate::model::forecast::{FallbackReason, Forecast, ForecastPoint, ForecastStrategy};
use crate::predictor::FeaturePreparer;
use crate::runtime::model_registry::SymbolModel;

/// Runs the validate-or-fallback chain for one symbol.
///
/// Gates, in order: model present and enough history, scaler transform,
/// predicted ratio inside `[ratio_min, ratio_max]`, implied one-step move
/// within `max_one_step_move`. Any failed gate switches to the trend
/// fallback. The call itself cannot fail.
#[derive(Debug, Clone)]
pub struct ForecastGenerator {
    cfg: ForecastConfig,
    preparer: FeaturePreparer,
}

impl ForecastGenerator {
    pub fn new(cfg: ForecastConfig) -> Self {
        Self {
            cfg,
            preparer: FeaturePreparer::new(cfg.sequence_length),
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.cfg
    }

    pub fn preparer(&self) -> &FeaturePreparer {
        &self.preparer
    }

    pub fn forecast(
        &self,
        model: Option<&SymbolModel>,
        current_price: f64,
        recent_prices: &[f64],
        now: DateTime<Utc>,
    ) -> Forecast {
        if !current_price.is_finite() || current_price <= 0.0 {
            return build(
                ForecastStrategy::TrendFallback {
                    reason: FallbackReason::InvalidPrice,
                },
                flat_prices(current_price),
                now,
            );
        }

        match self.model_prices(model, current_price, recent_prices) {
            Ok(prices) => build(ForecastStrategy::ModelBased, prices, now),
            Err(reason) => self.fallback(reason, current_price, recent_prices, now),
        }
    }

    /// Trend-only forecast, tagged with the reason the model path was skipped.
    pub fn fallback(
        &self,
        reason: FallbackReason,
        current_price: f64,
        recent_prices: &[f64],
        now: DateTime<Utc>,
    ) -> Forecast {
        let reason = if recent_prices.len() < self.cfg.min_trend_history {
            FallbackReason::FlatHistory
        } else {
            reason
        };
        build(
            ForecastStrategy::TrendFallback { reason },
            trend_fallback_prices(current_price, recent_prices, &self.cfg),
            now,
        )
    }

    /// One-step ratio predicted by the model for the latest window.
    pub fn predict_ratio(
        &self,
        model: &SymbolModel,
        current_price: f64,
        recent_prices: &[f64],
    ) -> Result<f64, FallbackReason> {
        let features = self.preparer.inference_vector(recent_prices, current_price);
        let x = DMatrix::from_row_slice(1, features.len(), &features);
        let scaled = model
            .scaler
            .transform(&x)
            .map_err(|_| FallbackReason::ScalerNotReady)?;
        let prediction = model
            .regressor
            .predict(&scaled)
            .map_err(|_| FallbackReason::PredictionFailed)?;
        prediction
            .iter()
            .next()
            .copied()
            .ok_or(FallbackReason::PredictionFailed)
    }

    fn model_prices(
        &self,
        model: Option<&SymbolModel>,
        current_price: f64,
        recent_prices: &[f64],
    ) -> Result<Vec<f64>, FallbackReason> {
        let model = model
            .filter(|m| m.is_trained())
            .ok_or(FallbackReason::NoModel)?;
        if recent_prices.len() < self.cfg.min_model_history {
            return Err(FallbackReason::InsufficientHistory);
        }

        let ratio = self.predict_ratio(model, current_price, recent_prices)?;
        if !(self.cfg.ratio_min..=self.cfg.ratio_max).contains(&ratio) {
            return Err(FallbackReason::RatioOutOfBand);
        }

        let next_price = ratio * current_price;
        let relative_move = (next_price - current_price).abs() / current_price;
        if !relative_move.is_finite() || relative_move > self.cfg.max_one_step_move {
            return Err(FallbackReason::UnstableMove);
        }

        let base_trend = (next_price - current_price) / current_price;
        Ok(expand_model_trend(current_price, base_trend, &self.cfg))
    }
}

fn build(strategy: ForecastStrategy, prices: Vec<f64>, now: DateTime<Utc>) -> Forecast {
    let points = prices
        .into_iter()
        .enumerate()
        .map(|(i, forecast_price)| ForecastPoint {
            minute: i as u32 + 1,
            forecast_price,
            timestamp: now + Duration::minutes(i as i64 + 1),
        })
        .collect();
    Forecast { strategy, points }
}
