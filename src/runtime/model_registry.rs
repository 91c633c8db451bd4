use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};

use crate::error::ModelError;
use crate::model::observation::{normalize_symbol, PriceObservation};
use crate::predictor::{FeatureScaler, OnlineRegressor, RegressorConfig, SolveMethod};

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistryConfig {
    pub regressor: RegressorConfig,
    pub history_capacity: usize,
    /// Least-recently-used bound on tracked symbols; `None` keeps every symbol.
    pub max_symbols: Option<usize>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            regressor: RegressorConfig::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            max_symbols: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainOutcome {
    pub samples: usize,
    /// False when the scaler failed and raw features were used for this batch.
    pub scaled: bool,
    pub solve: SolveMethod,
}

/// Everything the engine keeps for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolModel {
    pub regressor: OnlineRegressor,
    pub scaler: FeatureScaler,
    /// Bounded record of recent observations for callers; training and
    /// forecasting work from the series passed in, not from this buffer.
    history: VecDeque<PriceObservation>,
    history_capacity: usize,
    pub last_trained_at: Option<DateTime<Utc>>,
}

impl SymbolModel {
    pub fn new(regressor: RegressorConfig, history_capacity: usize) -> Self {
        Self::from_parts(OnlineRegressor::new(regressor), FeatureScaler::new(), history_capacity)
    }

    pub fn from_parts(
        regressor: OnlineRegressor,
        scaler: FeatureScaler,
        history_capacity: usize,
    ) -> Self {
        let history_capacity = history_capacity.max(1);
        Self {
            regressor,
            scaler,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            last_trained_at: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.regressor.is_fitted()
    }

    /// Scale the batch (fitting the scaler on first use) and update the regressor.
    ///
    /// Rows with a non-finite feature or target are dropped first, so one bad
    /// price only costs the pairs it touches. A scaler failure is tolerated
    /// here: the batch is fed to the regressor unscaled. Inference never does this.
    pub fn train(&mut self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<TrainOutcome, ModelError> {
        if x.nrows() != y.len() {
            return Err(ModelError::LengthMismatch {
                rows: x.nrows(),
                targets: y.len(),
            });
        }
        let keep: Vec<usize> = (0..x.nrows())
            .filter(|&i| y[i].is_finite() && x.row(i).iter().all(|v| v.is_finite()))
            .collect();
        if keep.is_empty() && x.nrows() > 0 {
            return Err(ModelError::NonFinite("training batch"));
        }
        let (x, y) = if keep.len() == x.nrows() {
            (x.clone(), y.clone())
        } else {
            tracing::warn!(
                dropped = x.nrows() - keep.len(),
                kept = keep.len(),
                "Dropping non-finite training rows"
            );
            (x.select_rows(keep.iter()), y.select_rows(keep.iter()))
        };

        let fitted = if self.scaler.is_fitted() {
            self.scaler.partial_fit(&x)
        } else {
            self.scaler.fit(&x)
        };
        let scaled = fitted.and_then(|_| self.scaler.transform(&x));
        let (features, scaled) = match scaled {
            Ok(features) => (features, true),
            Err(e) => {
                tracing::warn!(error = %e, "Scaler unavailable for training batch; using raw features");
                (x.clone(), false)
            }
        };
        let solve = self.regressor.partial_fit(&features, &y)?;
        Ok(TrainOutcome {
            samples: x.nrows(),
            scaled,
            solve,
        })
    }

    /// Append observations newer than the newest buffered one. Returns how many were kept.
    pub fn observe(&mut self, observations: &[PriceObservation]) -> usize {
        let mut appended = 0;
        for obs in observations {
            if let Some(last) = self.history.back() {
                if obs.timestamp <= last.timestamp {
                    continue;
                }
            }
            if self.history.len() == self.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(obs.clone());
            appended += 1;
        }
        appended
    }

    pub fn history(&self) -> &VecDeque<PriceObservation> {
        &self.history
    }

    pub fn history_prices(&self) -> Vec<f64> {
        self.history.iter().map(|o| o.price).collect()
    }
}

struct RegistryEntry {
    model: SymbolModel,
    last_touch: u64,
}

/// Owns per-symbol models; entries are created on first use.
#[derive(Default)]
pub struct ModelRegistry {
    cfg: RegistryConfig,
    entries: HashMap<String, RegistryEntry>,
    clock: u64,
}

impl ModelRegistry {
    pub fn new(cfg: RegistryConfig) -> Self {
        Self {
            cfg,
            entries: HashMap::new(),
            clock: 0,
        }
    }

    pub fn config(&self) -> RegistryConfig {
        self.cfg
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.contains_key(&normalize_symbol(symbol))
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolModel> {
        self.entries.get(&normalize_symbol(symbol)).map(|e| &e.model)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut SymbolModel> {
        let tick = self.tick();
        let entry = self.entries.get_mut(&normalize_symbol(symbol))?;
        entry.last_touch = tick;
        Some(&mut entry.model)
    }

    pub fn get_or_create(&mut self, symbol: &str) -> &mut SymbolModel {
        let key = normalize_symbol(symbol);
        if !self.entries.contains_key(&key) {
            self.make_room();
        }
        let tick = self.tick();
        let (regressor, capacity) = (self.cfg.regressor, self.cfg.history_capacity);
        let entry = self.entries.entry(key).or_insert_with(|| RegistryEntry {
            model: SymbolModel::new(regressor, capacity),
            last_touch: tick,
        });
        entry.last_touch = tick;
        &mut entry.model
    }

    /// Replace (or add) a symbol's model, e.g. one built from a saved state.
    pub fn insert(&mut self, symbol: &str, model: SymbolModel) {
        let key = normalize_symbol(symbol);
        self.entries.remove(&key);
        self.insert_entry(key, model);
    }

    pub fn observe(&mut self, symbol: &str, observations: &[PriceObservation]) -> usize {
        self.get_or_create(symbol).observe(observations)
    }

    pub fn remove(&mut self, symbol: &str) -> Option<SymbolModel> {
        self.entries.remove(&normalize_symbol(symbol)).map(|e| e.model)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Tracked symbols in lexical order.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.entries.keys().cloned().collect();
        out.sort();
        out
    }

    fn insert_entry(&mut self, key: String, model: SymbolModel) {
        self.make_room();
        let tick = self.tick();
        self.entries.insert(
            key,
            RegistryEntry {
                model,
                last_touch: tick,
            },
        );
    }

    fn make_room(&mut self) {
        let Some(max) = self.cfg.max_symbols else {
            return;
        };
        while self.entries.len() >= max.max(1) {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_touch)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            tracing::debug!(symbol = %oldest, "Evicting least recently used symbol model");
            self.entries.remove(&oldest);
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock = self.clock.saturating_add(1);
        self.clock
    }
}
