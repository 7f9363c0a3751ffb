//! Regressors.
//!
//! Three flavours:
//!
//! - [`QMRegressor`] / [`QMRegressorSgd`]: a joint density matrix over input
//!   features and a discretized target; the measured output operator is
//!   decoded into a conditional mean and variance.
//! - [`DmkdRegressor`]: two kernel density estimates, the marginal
//!   `Σ ψψ* / N` and the label-weighted `Σ y ψψ* / N`, whose ratio
//!   approximates `E[y | x]`.
//! - [`DmkdRegressorSgd`]: a two-output eigen classifier over targets rescaled
//!   into `[0, 1]` and encoded as the soft distribution `[ŷ, 1 − ŷ]`.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use num_complex::Complex64;
use serde_json::{Map, Value};
use tracing::warn;

use super::classifier::QMClassifierSgd;
use super::joint::{EigenJoint, JointEstimator};
use crate::accumulator::DensityAccumulator;
use crate::config::{
    BoundedRegressorConfig, DensityConfig, JointConfig, ModelConfig, SgdJointConfig,
};
use crate::decode::DensityMatrixRegression;
use crate::eigen::{EigenDensity, EigenGradient};
use crate::error::{QMeasureError, Result};
use crate::feature_map::FeatureMap;
use crate::measure::PROB_EPS;
use crate::train::{
    fit_accumulating, is_degenerate, AccumulatingModel, FitReport, GradientModel,
};

/// Regressor trained by accumulating a joint density matrix over input
/// features and a discretized target.
///
/// `fm_y` encodes the target; with [`crate::feature_map::OneHotFeatureMap`]
/// the target values are the support indices `0..dim_y`.
#[derive(Debug, Clone)]
pub struct QMRegressor<Fx, Fy> {
    inner: JointEstimator<Fx, Fy>,
    decoder: DensityMatrixRegression,
}

impl<Fx: FeatureMap, Fy: FeatureMap> QMRegressor<Fx, Fy> {
    /// Create a regressor with support points `0..dim_y`.
    pub fn new(fm_x: Fx, fm_y: Fy, dim_x: usize, dim_y: usize) -> Result<Self> {
        let decoder = DensityMatrixRegression::new(dim_y)?;
        Self::with_decoder(fm_x, fm_y, dim_x, decoder)
    }

    /// Create a regressor with custom support points, one per output basis
    /// state.
    pub fn with_decoder(
        fm_x: Fx,
        fm_y: Fy,
        dim_x: usize,
        decoder: DensityMatrixRegression,
    ) -> Result<Self> {
        let dim_y = decoder.support().len();
        Ok(Self {
            inner: JointEstimator::new(fm_x, fm_y, JointConfig { dim_x, dim_y })?,
            decoder,
        })
    }

    /// Conditional mean (column 0) and variance (column 1) per sample.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.decoder.decode(&self.inner.measure(x)?)
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

    /// The joint density matrix.
    pub fn get_rho(&self) -> &Array2<Complex64> {
        self.inner.accumulator.weights()
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

impl<Fx: FeatureMap, Fy: FeatureMap> AccumulatingModel for QMRegressor<Fx, Fy> {
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

/// Eigen-form joint regressor trained by cross-entropy against targets
/// spread over the support points.
///
/// A target between two support points is split linearly between them (see
/// [`DensityMatrixRegression::encode`]), so the decoded mean of a perfectly
/// fitted output distribution reproduces the real-valued target.
pub struct QMRegressorSgd {
    inner: EigenJoint,
    decoder: DensityMatrixRegression,
}

impl QMRegressorSgd {
    /// Build an untrained regressor with support points `0..dim_y`.
    pub fn new(config: SgdJointConfig) -> Result<Self> {
        let decoder = DensityMatrixRegression::new(config.dim_y)?;
        Ok(Self {
            inner: EigenJoint::new(config)?,
            decoder,
        })
    }

    /// Rebuild an untrained regressor from a flat parameter map.
    pub fn from_config(map: Map<String, Value>) -> Result<Self> {
        Self::new(SgdJointConfig::from_map(map)?)
    }

    /// Conditional mean (column 0) and variance (column 1) per sample.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.decoder.decode(&self.inner.measure(x)?)
    }

    /// Target distributions over the support for the raw targets in column 0
    /// of `y`, shape `(n, dim_y)`. Out-of-range targets are clamped.
    pub fn preprocess_outputs(&self, y: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if y.ncols() == 0 {
            return Err(QMeasureError::dimension_mismatch(1, 0));
        }
        self.decoder.encode(y.column(0))
    }

    /// Seed the eigen form from an accumulated joint density matrix.
    pub fn set_rho(&mut self, rho: &Array2<Complex64>) -> Result<()> {
        self.inner.set_rho(rho)
    }

    /// Support points of the target.
    pub fn support(&self) -> &Array1<f64> {
        self.decoder.support()
    }

    /// The eigen-form density matrix.
    pub fn eigen(&self) -> &EigenDensity {
        &self.inner.density
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

impl GradientModel for QMRegressorSgd {
    /// `y` holds raw real-valued targets in column 0.
    fn loss_and_gradients(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<(f64, Vec<EigenGradient>)> {
        let targets = self.preprocess_outputs(y)?;
        let (loss, grad) = self.inner.cross_entropy(x, targets.view())?;
        Ok((loss, vec![grad]))
    }

    fn eigen_components_mut(&mut self) -> Vec<&mut EigenDensity> {
        vec![&mut self.inner.density]
    }
}

/// Kernel density regressor: `ŷ(x) = p_reg(x) / p_de(x)`.
#[derive(Debug, Clone)]
pub struct DmkdRegressor<F> {
    fm_x: F,
    config: DensityConfig,
    density: DensityAccumulator,
    weighted: DensityAccumulator,
}

impl<F: FeatureMap> DmkdRegressor<F> {
    /// Create a regressor over a `dim_x`-dimensional feature space.
    pub fn new(fm_x: F, dim_x: usize) -> Result<Self> {
        let config = DensityConfig { dim_x };
        config.validate()?;
        if fm_x.dim() != dim_x {
            return Err(QMeasureError::dimension_mismatch(dim_x, fm_x.dim()));
        }
        Ok(Self {
            fm_x,
            config,
            density: DensityAccumulator::new(dim_x)?,
            weighted: DensityAccumulator::new(dim_x)?,
        })
    }

    /// Ratio of the label-weighted density to the marginal density. Inputs
    /// where the marginal density vanishes predict zero.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let psi = self.fm_x.map(x)?;
        let p_de = self.density.probabilities(psi.view())?;
        let p_reg = self.weighted.probabilities(psi.view())?;
        Ok(p_reg
            .iter()
            .zip(p_de.iter())
            .map(|(&num, &den)| if den > PROB_EPS { num / den } else { 0.0 })
            .collect())
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

    /// The marginal and the label-weighted density matrices, in that order.
    pub fn get_rhos(&self) -> [&Array2<Complex64>; 2] {
        [self.density.weights(), self.weighted.weights()]
    }

    /// Model dimensions.
    pub fn config(&self) -> &DensityConfig {
        &self.config
    }

    /// Flat parameter map.
    pub fn get_config(&self) -> Result<Map<String, Value>> {
        self.config.to_map()
    }
}

impl<F: FeatureMap> AccumulatingModel for DmkdRegressor<F> {
    fn reset(&mut self) {
        self.density.reset();
        self.weighted.reset();
    }

    fn accumulate_batch(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<usize> {
        if is_degenerate(&x) {
            return Ok(0);
        }
        if y.ncols() == 0 {
            return Err(QMeasureError::dimension_mismatch(1, 0));
        }
        let psi = self.fm_x.map(x)?;
        self.weighted.accumulate_weighted(psi.view(), y.column(0))?;
        self.density.accumulate(psi.view())
    }

    fn finalize(&mut self) -> Result<()> {
        self.density.finalize()?;
        self.weighted.finalize()
    }
}

/// Regressor for targets in a known range `[y_min, y_max]`, trained by
/// gradient descent.
pub struct DmkdRegressorSgd {
    config: BoundedRegressorConfig,
    classifier: QMClassifierSgd,
}

impl DmkdRegressorSgd {
    /// Build an untrained regressor.
    pub fn new(config: BoundedRegressorConfig) -> Result<Self> {
        config.validate()?;
        let classifier = QMClassifierSgd::new(config.joint())?;
        Ok(Self { config, classifier })
    }

    /// Rebuild an untrained regressor from a flat parameter map.
    pub fn from_config(map: Map<String, Value>) -> Result<Self> {
        Self::new(BoundedRegressorConfig::from_map(map)?)
    }

    /// Soft targets `[ŷ, 1 − ŷ]` with `ŷ = (y − y_min) / (y_max − y_min)`
    /// clamped into `[0, 1]`. Reads column 0 of `y`.
    pub fn preprocess_outputs(&self, y: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if y.ncols() == 0 {
            return Err(QMeasureError::dimension_mismatch(1, 0));
        }
        let span = self.config.y_max - self.config.y_min;
        let mut clamped = 0usize;
        let mut targets = Array2::zeros((y.nrows(), 2));
        for (mut row, &value) in targets.axis_iter_mut(Axis(0)).zip(y.column(0).iter()) {
            let scaled = (value - self.config.y_min) / span;
            if !(0.0..=1.0).contains(&scaled) {
                clamped += 1;
            }
            let scaled = scaled.clamp(0.0, 1.0);
            row[0] = scaled;
            row[1] = 1.0 - scaled;
        }
        if clamped > 0 {
            warn!(clamped, "targets outside [y_min, y_max] were clamped");
        }
        Ok(targets)
    }

    /// Predictions mapped back into `[y_min, y_max]`.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let probs = self.classifier.predict(x)?;
        let span = self.config.y_max - self.config.y_min;
        Ok(probs.column(0).mapv(|p| span * p + self.config.y_min))
    }

    /// Seed the eigen form from an accumulated joint density matrix.
    pub fn set_rho(&mut self, rho: &Array2<Complex64>) -> Result<()> {
        self.classifier.set_rho(rho)
    }

    /// The eigen-form density matrix.
    pub fn eigen(&self) -> &EigenDensity {
        self.classifier.eigen()
    }

    /// Model parameters.
    pub fn config(&self) -> &BoundedRegressorConfig {
        &self.config
    }

    /// Flat parameter map.
    pub fn get_config(&self) -> Result<Map<String, Value>> {
        self.config.to_map()
    }
}

impl GradientModel for DmkdRegressorSgd {
    /// `y` holds raw targets in column 0.
    fn loss_and_gradients(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<(f64, Vec<EigenGradient>)> {
        let targets = self.preprocess_outputs(y)?;
        self.classifier.loss_and_gradients(x, targets.view())
    }

    fn eigen_components_mut(&mut self) -> Vec<&mut EigenDensity> {
        self.classifier.eigen_components_mut()
    }
}
