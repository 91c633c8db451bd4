use nalgebra::{DMatrix, DVector};

use crate::error::ModelError;

/// Below this pivot ratio the regularized normal matrix is treated as singular.
const MIN_PIVOT_RATIO: f64 = 1e-12;
const PINV_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressorConfig {
    /// Ridge term added to the diagonal of the accumulated cross-product.
    pub regularization: f64,
    /// Extra ridge used by the pseudo-inverse fallback solve.
    pub pinv_epsilon: f64,
}

impl Default for RegressorConfig {
    fn default() -> Self {
        Self {
            regularization: 0.01,
            pinv_epsilon: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveMethod {
    Direct,
    PseudoInverse,
}

impl SolveMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SolveMethod::Direct => "lu",
            SolveMethod::PseudoInverse => "pinv",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressorState {
    pub weights: DVector<f64>,
    pub bias: f64,
    pub cross_xx: DMatrix<f64>,
    pub cross_xy: DVector<f64>,
    pub n_samples: u64,
}

impl RegressorState {
    pub fn zeros(n_features: usize) -> Self {
        Self {
            weights: DVector::zeros(n_features),
            bias: 0.0,
            cross_xx: DMatrix::zeros(n_features, n_features),
            cross_xy: DVector::zeros(n_features),
            n_samples: 0,
        }
    }

    pub fn n_features(&self) -> usize {
        self.weights.len()
    }
}

/// Incremental ridge regression over accumulated normal equations.
///
/// Every `partial_fit` adds the batch to `XᵀX` / `Xᵀy` and re-solves
/// `(XᵀX + λI) w = Xᵀy` from scratch, so the weights depend only on the
/// samples seen, not on batch boundaries. The bias does depend on batch
/// boundaries: it is the mean residual of the latest batch only.
#[derive(Debug, Clone, Default)]
pub struct OnlineRegressor {
    cfg: RegressorConfig,
    state: Option<RegressorState>,
    last_solve: Option<SolveMethod>,
}

impl OnlineRegressor {
    pub fn new(cfg: RegressorConfig) -> Self {
        Self {
            cfg,
            state: None,
            last_solve: None,
        }
    }

    pub fn from_state(cfg: RegressorConfig, state: RegressorState) -> Self {
        Self {
            cfg,
            state: Some(state),
            last_solve: None,
        }
    }

    pub fn config(&self) -> RegressorConfig {
        self.cfg
    }

    pub fn state(&self) -> Option<&RegressorState> {
        self.state.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    pub fn n_features(&self) -> Option<usize> {
        self.state.as_ref().map(RegressorState::n_features)
    }

    pub fn n_samples(&self) -> u64 {
        self.state.as_ref().map(|s| s.n_samples).unwrap_or(0)
    }

    pub fn last_solve(&self) -> Option<SolveMethod> {
        self.last_solve
    }

    pub fn partial_fit(&mut self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<SolveMethod, ModelError> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(ModelError::EmptyBatch);
        }
        if x.nrows() != y.len() {
            return Err(ModelError::LengthMismatch {
                rows: x.nrows(),
                targets: y.len(),
            });
        }
        if !x.iter().chain(y.iter()).all(|v| v.is_finite()) {
            return Err(ModelError::NonFinite("regressor input"));
        }
        if let Some(st) = &self.state {
            if st.n_features() != x.ncols() {
                return Err(ModelError::DimensionMismatch {
                    expected: st.n_features(),
                    got: x.ncols(),
                });
            }
        }

        let cfg = self.cfg;
        let st = self
            .state
            .get_or_insert_with(|| RegressorState::zeros(x.ncols()));

        st.cross_xx += x.tr_mul(x);
        st.cross_xy += x.tr_mul(y);
        st.n_samples = st.n_samples.saturating_add(x.nrows() as u64);

        let (weights, method) = solve_ridge(&st.cross_xx, &st.cross_xy, cfg, &st.weights);
        st.weights = weights;

        let residuals = y - x * &st.weights;
        st.bias = residuals.mean();

        self.last_solve = Some(method);
        Ok(method)
    }

    /// `X·w + bias`, or zeros when nothing has been fitted.
    pub fn predict(&self, x: &DMatrix<f64>) -> Result<DVector<f64>, ModelError> {
        let Some(st) = &self.state else {
            return Ok(DVector::zeros(x.nrows()));
        };
        if x.ncols() != st.n_features() {
            return Err(ModelError::DimensionMismatch {
                expected: st.n_features(),
                got: x.ncols(),
            });
        }
        Ok((x * &st.weights).add_scalar(st.bias))
    }

    pub fn predict_one(&self, features: &[f64]) -> Result<f64, ModelError> {
        let x = DMatrix::from_row_slice(1, features.len(), features);
        Ok(self.predict(&x)?[0])
    }

    pub fn weights_norm(&self) -> f64 {
        self.state.as_ref().map(|s| s.weights.norm()).unwrap_or(0.0)
    }

    pub fn equation_summary(&self) -> String {
        let Some(st) = &self.state else {
            return "no model trained yet".to_string();
        };
        let mut parts: Vec<String> = Vec::new();
        for (i, w) in st.weights.iter().enumerate() {
            if *w == 0.0 {
                continue;
            }
            let sign = if *w >= 0.0 && !parts.is_empty() { "+" } else { "" };
            parts.push(format!("{sign}{w:.4}*x{i}"));
        }
        let sign = if st.bias >= 0.0 && !parts.is_empty() { "+" } else { "" };
        parts.push(format!("{sign}{:.4}", st.bias));
        format!("y = {}", parts.join(" "))
    }
}

fn solve_ridge(
    cross_xx: &DMatrix<f64>,
    cross_xy: &DVector<f64>,
    cfg: RegressorConfig,
    previous: &DVector<f64>,
) -> (DVector<f64>, SolveMethod) {
    let n = cross_xx.nrows();
    let a = cross_xx + DMatrix::identity(n, n) * cfg.regularization;
    // SVD does not converge on non-finite input.
    if !a.iter().chain(cross_xy.iter()).all(|v| v.is_finite()) {
        return (previous.clone(), SolveMethod::PseudoInverse);
    }
    if let Some(w) = direct_solve(a, cross_xy) {
        return (w, SolveMethod::Direct);
    }

    let a = cross_xx + DMatrix::identity(n, n) * (cfg.regularization + cfg.pinv_epsilon);
    let w = a
        .svd(true, true)
        .pseudo_inverse(PINV_TOLERANCE)
        .ok()
        .map(|pinv| pinv * cross_xy)
        .filter(all_finite)
        .unwrap_or_else(|| previous.clone());
    (w, SolveMethod::PseudoInverse)
}

fn direct_solve(a: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let lu = a.lu();
    let diag = lu.u().diagonal();
    let max_pivot = diag.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let min_pivot = diag.iter().fold(f64::INFINITY, |m, v| m.min(v.abs()));
    if !(max_pivot > 0.0) || !max_pivot.is_finite() || min_pivot / max_pivot < MIN_PIVOT_RATIO {
        return None;
    }
    lu.solve(b).filter(all_finite)
}

fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}
