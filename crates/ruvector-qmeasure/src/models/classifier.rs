//! Quantum measurement classifiers.
//!
//! The training pairs `(x, y)` are encoded as joint states
//! `ψ = ψ_x(x) ⊗ ψ_y(y)` and summarized by a density matrix over the joint
//! space. Measuring the input subsystem of that matrix with `ψ_x(x)` leaves an
//! output operator whose diagonal is the predicted class distribution.

use ndarray::{Array2, ArrayView2};
use num_complex::Complex64;
use serde_json::{Map, Value};

use super::joint::{EigenJoint, JointEstimator};
use crate::config::{JointConfig, ModelConfig, SgdJointConfig};
use crate::decode::dm_to_dist;
use crate::eigen::{EigenDensity, EigenGradient};
use crate::error::Result;
use crate::feature_map::FeatureMap;
use crate::train::{fit_accumulating, AccumulatingModel, FitReport, GradientModel};

/// Classifier trained by accumulating joint density matrices.
#[derive(Debug, Clone)]
pub struct QMClassifier<Fx, Fy> {
    inner: JointEstimator<Fx, Fy>,
}

impl<Fx: FeatureMap, Fy: FeatureMap> QMClassifier<Fx, Fy> {
    /// Create a classifier over `dim_x` input and `dim_y` output components.
    pub fn new(fm_x: Fx, fm_y: Fy, dim_x: usize, dim_y: usize) -> Result<Self> {
        Ok(Self {
            inner: JointEstimator::new(fm_x, fm_y, JointConfig { dim_x, dim_y })?,
        })
    }

    /// Class probabilities, shape `(n, dim_y)`.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        Ok(dm_to_dist(&self.inner.measure(x)?))
    }

    /// Reset, accumulate `(x, y)` in mini-batches and normalize once.
    pub fn fit(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        batch_size: usize,
    ) -> Result<FitReport> {
        fit_accumulating(self, x, y, batch_size)
    }

    /// The joint density matrix (unnormalized until the run is finalized).
    pub fn get_rho(&self) -> &Array2<Complex64> {
        self.inner.accumulator.weights()
    }

    /// Samples accumulated in the current run.
    pub fn n_samples(&self) -> usize {
        self.inner.accumulator.n_samples()
    }

    /// Model dimensions.
    pub fn config(&self) -> &JointConfig {
        &self.inner.config
    }

    /// Flat parameter map.
    pub fn get_config(&self) -> Result<Map<String, Value>> {
        self.inner.config.to_map()
    }
}

impl<Fx: FeatureMap, Fy: FeatureMap> AccumulatingModel for QMClassifier<Fx, Fy> {
    fn reset(&mut self) {
        self.inner.accumulator.reset();
    }

    fn accumulate_batch(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<usize> {
        self.inner.accumulate(x, y)
    }

    fn finalize(&mut self) -> Result<()> {
        self.inner.accumulator.finalize()
    }
}

/// Classifier with an eigen-form joint density matrix, trained by gradient
/// descent on categorical cross-entropy.
pub struct QMClassifierSgd {
    inner: EigenJoint,
}

impl QMClassifierSgd {
    /// Build an untrained classifier with its own random Fourier features.
    pub fn new(config: SgdJointConfig) -> Result<Self> {
        Ok(Self {
            inner: EigenJoint::new(config)?,
        })
    }

    /// Rebuild an untrained classifier from a flat parameter map.
    pub fn from_config(map: Map<String, Value>) -> Result<Self> {
        Self::new(SgdJointConfig::from_map(map)?)
    }

    /// Class probabilities, shape `(n, dim_y)`.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        Ok(dm_to_dist(&self.inner.measure(x)?))
    }

    /// Seed the eigen form from a joint density matrix, e.g. one produced by
    /// [`QMClassifier::get_rho`] with the same feature map.
    pub fn set_rho(&mut self, rho: &Array2<Complex64>) -> Result<()> {
        self.inner.set_rho(rho)
    }

    /// The eigen-form density matrix.
    pub fn eigen(&self) -> &EigenDensity {
        &self.inner.density
    }

    /// The input feature map.
    pub fn feature_map(&self) -> &dyn FeatureMap {
        self.inner.fm_x.as_ref()
    }

    /// Model parameters.
    pub fn config(&self) -> &SgdJointConfig {
        &self.inner.config
    }

    /// Flat parameter map.
    pub fn get_config(&self) -> Result<Map<String, Value>> {
        self.inner.config.to_map()
    }
}

impl GradientModel for QMClassifierSgd {
    /// `y` holds target distributions, shape `(n, dim_y)`.
    fn loss_and_gradients(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<(f64, Vec<EigenGradient>)> {
        let (loss, grad) = self.inner.cross_entropy(x, y)?;
        Ok((loss, vec![grad]))
    }

    fn eigen_components_mut(&mut self) -> Vec<&mut EigenDensity> {
        vec![&mut self.inner.density]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_map::{FeatureMapKind, OneHotFeatureMap};
    use crate::train::{one_hot_targets, SgdConfig, SgdTrainer};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, Axis};

    /// Two-state encoding: (1, 0) for negative inputs, (0, 1) otherwise.
    struct SignMap;

    impl FeatureMap for SignMap {
        fn dim(&self) -> usize {
            2
        }

        fn map(&self, x: ArrayView2<'_, f64>) -> Result<Array2<Complex64>> {
            Ok(Array2::from_shape_fn((x.nrows(), 2), |(i, j)| {
                let positive = x[[i, 0]] >= 0.0;
                let on = (j == 1) == positive;
                Complex64::new(if on { 1.0 } else { 0.0 }, 0.0)
            }))
        }
    }

    fn data() -> (Array2<f64>, Array2<f64>) {
        let x = array![[-1.0], [-2.0], [-0.5], [1.0], [2.0], [0.3]];
        let y = array![[0.0], [0.0], [0.0], [1.0], [1.0], [1.0]];
        (x, y)
    }

    #[test]
    fn test_predict_before_fit_is_zero() {
        let model = QMClassifier::new(SignMap, OneHotFeatureMap::new(2).unwrap(), 2, 2).unwrap();
        let probs = model.predict(array![[1.0]].view()).unwrap();
        assert!(probs.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_fit_and_predict() {
        let (x, y) = data();
        let fm_y = OneHotFeatureMap::new(2).unwrap();
        let mut model = QMClassifier::new(SignMap, fm_y, 2, 2).unwrap();
        let report = model.fit(x.view(), y.view(), 4).unwrap();
        assert_eq!(report.n_samples, 6);
        assert_eq!(report.n_batches, 2);

        let trace: Complex64 = model.get_rho().diag().sum();
        assert_abs_diff_eq!(trace.re, 1.0, epsilon = 1e-12);

        let probs = model.predict(array![[-3.0], [5.0]].view()).unwrap();
        assert_abs_diff_eq!(probs[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(probs[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_refit_does_not_double_normalize() {
        let (x, y) = data();
        let fm_y = OneHotFeatureMap::new(2).unwrap();
        let mut model = QMClassifier::new(SignMap, fm_y, 2, 2).unwrap();
        model.fit(x.view(), y.view(), 2).unwrap();
        let first = model.get_rho().clone();
        model.fit(x.view(), y.view(), 3).unwrap();
        assert_eq!(model.n_samples(), 6);
        for (a, b) in first.iter().zip(model.get_rho().iter()) {
            assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_feature_dim_validated() {
        assert!(QMClassifier::new(SignMap, OneHotFeatureMap::new(3).unwrap(), 2, 2).is_err());
    }

    #[test]
    fn test_sgd_seeded_from_accumulated_matches() {
        let (x, y) = data();
        let config = SgdJointConfig {
            input_dim: 1,
            dim_x: 8,
            dim_y: 2,
            num_eig: 0,
            gamma: 1.0,
            random_state: Some(17),
            feature_map: FeatureMapKind::Real,
        };
        let mut sgd = QMClassifierSgd::new(config.clone()).unwrap();

        // same random features for both models
        let fm_x = crate::feature_map::RffFeatureMap::new(config.rff()).unwrap();
        let mut batch = QMClassifier::new(fm_x, OneHotFeatureMap::new(2).unwrap(), 8, 2).unwrap();
        batch.fit(x.view(), y.view(), 6).unwrap();

        sgd.set_rho(batch.get_rho()).unwrap();
        let query = array![[-1.5], [0.1], [1.7]];
        let expected = batch.predict(query.view()).unwrap();
        let actual = sgd.predict(query.view()).unwrap();
        for (a, b) in expected.iter().zip(actual.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_sgd_training_reduces_loss() {
        let x = array![[-2.0], [-1.5], [-1.0], [1.0], [1.5], [2.0]];
        let labels: Array1<f64> = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let targets = one_hot_targets(labels.view(), 2).unwrap();

        let mut model = QMClassifierSgd::new(SgdJointConfig {
            input_dim: 1,
            dim_x: 8,
            dim_y: 2,
            num_eig: 4,
            gamma: 0.5,
            random_state: Some(3),
            feature_map: FeatureMapKind::Real,
        })
        .unwrap();
        let trainer = SgdTrainer::new(SgdConfig {
            learning_rate: 0.05,
            epochs: 60,
            batch_size: 6,
            shuffle: false,
            random_state: Some(1),
        })
        .unwrap();

        let report = trainer.fit(&mut model, x.view(), targets.view()).unwrap();
        assert!(report.final_loss().unwrap() < report.initial_loss().unwrap());
        assert!(model.eigen().is_valid(1e-9));

        let probs = model.predict(x.view()).unwrap();
        for row in probs.axis_iter(Axis(0)) {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_sgd_config_round_trip() {
        let model = QMClassifierSgd::new(SgdJointConfig {
            input_dim: 3,
            dim_x: 4,
            dim_y: 3,
            num_eig: 5,
            random_state: Some(2),
            ..Default::default()
        })
        .unwrap();
        let map = model.get_config().unwrap();
        let rebuilt = QMClassifierSgd::from_config(map).unwrap();
        assert_eq!(rebuilt.config(), model.config());
        assert_eq!(rebuilt.eigen().num_eig(), 5);
        assert_eq!(rebuilt.feature_map().dim(), 4);
    }
}
