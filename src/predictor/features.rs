use nalgebra::{DMatrix, DVector};

pub type FeatureVector = Vec<f64>;

/// Ratios appended after the normalized window: bias, change, mean, std, trend.
pub const DERIVED_FEATURES: usize = 5;

/// Training pairs built from one price series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    pub features: Vec<FeatureVector>,
    pub targets: Vec<f64>,
    /// Index in the source series of the price each target was taken from.
    pub target_indices: Vec<usize>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn design_matrix(&self) -> DMatrix<f64> {
        let cols = self.features.first().map(Vec::len).unwrap_or(0);
        DMatrix::from_row_iterator(
            self.features.len(),
            cols,
            self.features.iter().flat_map(|row| row.iter().copied()),
        )
    }

    pub fn target_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.targets)
    }
}

/// Turns a chronological price series into reference-normalized feature vectors.
///
/// Every vector is `[window / ref, 1.0, change / ref, mean / ref, std / ref,
/// trend / ref]` where `ref` is the last price of the window, so all values
/// sit near 1.0 (or near 0.0 for the differences) regardless of price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeaturePreparer {
    sequence_length: usize,
}

impl FeaturePreparer {
    pub fn new(sequence_length: usize) -> Self {
        assert!(sequence_length > 0, "sequence_length must be > 0");
        Self { sequence_length }
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn dimension(&self) -> usize {
        self.sequence_length + DERIVED_FEATURES
    }

    pub fn prepare_training(&self, prices: &[f64]) -> Option<TrainingSet> {
        self.prepare_training_from(prices, 0)
    }

    /// Like [`prepare_training`](Self::prepare_training) but only emits pairs
    /// whose target index is at least `first_target`.
    pub fn prepare_training_from(&self, prices: &[f64], first_target: usize) -> Option<TrainingSet> {
        let seq = self.sequence_length;
        if prices.len() < seq + 1 {
            return None;
        }
        let mut out = TrainingSet::default();
        for i in seq.max(first_target)..prices.len() {
            let window = &prices[i - seq..i];
            let prior = (i >= 2).then(|| prices[i - 2]);
            let reference = prices[i - 1];
            out.features.push(window_features(window, prior));
            out.targets.push(if reference > 0.0 {
                prices[i] / reference
            } else {
                1.0
            });
            out.target_indices.push(i);
        }
        (!out.is_empty()).then_some(out)
    }

    /// Feature vector for the most recent window. Short histories are padded on
    /// the old side with `current_price` so the observed prices stay newest.
    pub fn inference_vector(&self, recent: &[f64], current_price: f64) -> FeatureVector {
        let seq = self.sequence_length;
        let tail = &recent[recent.len().saturating_sub(seq)..];
        let mut window = vec![current_price; seq - tail.len()];
        window.extend_from_slice(tail);
        let prior = (recent.len() >= 2).then(|| recent[recent.len() - 2]);
        window_features(&window, prior)
    }
}

fn window_features(window: &[f64], prior: Option<f64>) -> FeatureVector {
    let reference = window.last().copied().unwrap_or(0.0);
    let mut out = Vec::with_capacity(window.len() + DERIVED_FEATURES);

    if reference <= 0.0 {
        out.extend_from_slice(window);
        out.extend_from_slice(&[1.0, 0.0, 1.0, 0.0, 0.0]);
        return out;
    }

    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let var = window.iter().map(|p| (p - mean) * (p - mean)).sum::<f64>() / n;
    let change = prior.map(|p| reference - p).unwrap_or(0.0);
    let trend = reference - window[0];

    out.extend(window.iter().map(|p| p / reference));
    out.push(1.0);
    out.push(change / reference);
    out.push(mean / reference);
    out.push(var.sqrt() / reference);
    out.push(trend / reference);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_features_normalizes_to_last_price() {
        let f = window_features(&[98.0, 99.0, 100.0], Some(99.0));
        assert_eq!(f.len(), 3 + DERIVED_FEATURES);
        assert!((f[2] - 1.0).abs() < 1e-12);
        assert!((f[0] - 0.98).abs() < 1e-12);
        assert_eq!(f[3], 1.0);
        assert!((f[4] - 0.01).abs() < 1e-12);
        assert!((f[5] - 0.99).abs() < 1e-12);
        assert!((f[7] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn non_positive_reference_keeps_raw_window() {
        let f = window_features(&[1.0, 0.0], Some(1.0));
        assert_eq!(f, vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn missing_prior_gives_zero_change() {
        let f = window_features(&[50.0], None);
        assert_eq!(f[2], 0.0);
    }
}
