use nalgebra::{DMatrix, DVector};

use crate::error::ModelError;

/// Columns whose standard deviation falls below this are left unscaled.
const MIN_SCALE: f64 = 10.0 * f64::EPSILON;

#[derive(Debug, Clone, PartialEq)]
pub struct ScalerState {
    pub mean: DVector<f64>,
    /// Population variance per column.
    pub var: DVector<f64>,
    pub n_samples: u64,
}

impl ScalerState {
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }
}

/// Running standardization `(x - mean) / std`, updated batch by batch.
#[derive(Debug, Clone, Default)]
pub struct FeatureScaler {
    state: Option<ScalerState>,
}

impl FeatureScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: ScalerState) -> Self {
        Self { state: Some(state) }
    }

    pub fn state(&self) -> Option<&ScalerState> {
        self.state.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Replace any statistics with those of `x`.
    pub fn fit(&mut self, x: &DMatrix<f64>) -> Result<(), ModelError> {
        self.state = Some(batch_stats(x)?);
        Ok(())
    }

    /// Merge `x` into the running statistics; behaves like `fit` when unfitted.
    pub fn partial_fit(&mut self, x: &DMatrix<f64>) -> Result<(), ModelError> {
        let batch = batch_stats(x)?;
        let Some(st) = &mut self.state else {
            self.state = Some(batch);
            return Ok(());
        };
        if st.n_features() != batch.n_features() {
            return Err(ModelError::DimensionMismatch {
                expected: st.n_features(),
                got: batch.n_features(),
            });
        }

        let n_a = st.n_samples as f64;
        let n_b = batch.n_samples as f64;
        let n = n_a + n_b;
        for j in 0..st.n_features() {
            let delta = batch.mean[j] - st.mean[j];
            let m2 = st.var[j] * n_a + batch.var[j] * n_b + delta * delta * n_a * n_b / n;
            st.mean[j] += delta * n_b / n;
            st.var[j] = m2 / n;
        }
        st.n_samples = st.n_samples.saturating_add(batch.n_samples);
        Ok(())
    }

    pub fn transform(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, ModelError> {
        let st = self.state.as_ref().ok_or(ModelError::NotFitted)?;
        if x.ncols() != st.n_features() {
            return Err(ModelError::DimensionMismatch {
                expected: st.n_features(),
                got: x.ncols(),
            });
        }
        let mut out = x.clone();
        for j in 0..x.ncols() {
            let scale = column_scale(st.var[j]);
            for i in 0..x.nrows() {
                out[(i, j)] = (x[(i, j)] - st.mean[j]) / scale;
            }
        }
        if out.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("scaled features"));
        }
        Ok(out)
    }

    pub fn fit_transform(&mut self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, ModelError> {
        self.fit(x)?;
        self.transform(x)
    }
}

fn column_scale(var: f64) -> f64 {
    let std = var.max(0.0).sqrt();
    if std < MIN_SCALE || !std.is_finite() {
        1.0
    } else {
        std
    }
}

fn batch_stats(x: &DMatrix<f64>) -> Result<ScalerState, ModelError> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(ModelError::EmptyBatch);
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite("scaler input"));
    }
    let n = x.nrows() as f64;
    let mut mean = DVector::<f64>::zeros(x.ncols());
    let mut var = DVector::<f64>::zeros(x.ncols());
    for (j, col) in x.column_iter().enumerate() {
        let m = col.sum() / n;
        mean[j] = m;
        var[j] = col.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n;
    }
    Ok(ScalerState {
        mean,
        var,
        n_samples: x.nrows() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_variance_column_maps_to_zero() {
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 1.0, 4.0, 1.0, 6.0]);
        let mut s = FeatureScaler::new();
        let t = s.fit_transform(&x).unwrap();
        for i in 0..3 {
            assert_eq!(t[(i, 0)], 0.0);
        }
        assert!((t[(0, 1)] + t[(2, 1)]).abs() < 1e-12);
    }

    #[test]
    fn column_scale_guards_tiny_variance() {
        assert_eq!(column_scale(0.0), 1.0);
        assert_eq!(column_scale(-1e-30), 1.0);
        assert!((column_scale(4.0) - 2.0).abs() < 1e-12);
    }
}
