//! Per-symbol estimators: incremental ridge regressor, running scaler and the
//! price-window feature transform feeding both.

pub mod features;
pub mod regressor;
pub mod scaler;

pub use features::{FeaturePreparer, FeatureVector, TrainingSet, DERIVED_FEATURES};
pub use regressor::{OnlineRegressor, RegressorConfig, RegressorState, SolveMethod};
pub use scaler::{FeatureScaler, ScalerState};
