//! Density estimators.
//!
//! `p(x) = ψ(x)* ρ ψ(x)` with `ρ` either accumulated from the training states
//! ([`QMDensity`]) or held in eigen form and fitted by maximum likelihood
//! ([`QMDensitySgd`]). With random Fourier features for an RBF kernel this is a
//! kernel density estimate up to the kernel's normalization constant.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use num_complex::Complex64;
use serde_json::{Map, Value};
use tracing::warn;

use crate::accumulator::DensityAccumulator;
use crate::config::{DensityConfig, ModelConfig, SgdDensityConfig};
use crate::eigen::{EigenConfig, EigenDensity, EigenGradient};
use crate::error::{QMeasureError, Result};
use crate::feature_map::{build_rff, FeatureMap};
use crate::measure::PROB_EPS;
use crate::train::{fit_accumulating, is_degenerate, AccumulatingModel, FitReport, GradientModel};

/// Density estimator trained by accumulation.
#[derive(Debug, Clone)]
pub struct QMDensity<F> {
    fm_x: F,
    config: DensityConfig,
    accumulator: DensityAccumulator,
}

impl<F: FeatureMap> QMDensity<F> {
    /// Create an estimator over a `dim_x`-dimensional feature space.
    pub fn new(fm_x: F, dim_x: usize) -> Result<Self> {
        let config = DensityConfig { dim_x };
        config.validate()?;
        if fm_x.dim() != dim_x {
            return Err(QMeasureError::dimension_mismatch(dim_x, fm_x.dim()));
        }
        Ok(Self {
            fm_x,
            config,
            accumulator: DensityAccumulator::new(dim_x)?,
        })
    }

    /// Born-rule value per sample.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let psi = self.fm_x.map(x)?;
        self.accumulator.probabilities(psi.view())
    }

    /// Reset, accumulate `x` in mini-batches and normalize once.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>, batch_size: usize) -> Result<FitReport> {
        let no_targets = Array2::<f64>::zeros((x.nrows(), 0));
        fit_accumulating(self, x, no_targets.view(), batch_size)
    }

    /// The density matrix.
    pub fn get_rho(&self) -> &Array2<Complex64> {
        self.accumulator.weights()
    }

    /// The underlying accumulator.
    pub fn accumulator(&self) -> &DensityAccumulator {
        &self.accumulator
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

impl<F: FeatureMap> AccumulatingModel for QMDensity<F> {
    fn reset(&mut self) {
        self.accumulator.reset();
    }

    /// `y` is ignored.
    fn accumulate_batch(
        &mut self,
        x: ArrayView2<'_, f64>,
        _y: ArrayView2<'_, f64>,
    ) -> Result<usize> {
        if is_degenerate(&x) {
            return Ok(0);
        }
        let psi = self.fm_x.map(x)?;
        self.accumulator.accumulate(psi.view())
    }

    fn finalize(&mut self) -> Result<()> {
        self.accumulator.finalize()
    }
}

/// Eigen-form density estimator fitted by minimizing the mean negative
/// log-likelihood.
pub struct QMDensitySgd {
    fm_x: Box<dyn FeatureMap>,
    config: SgdDensityConfig,
    density: EigenDensity,
}

impl QMDensitySgd {
    /// Build an untrained estimator with its own random Fourier features.
    pub fn new(config: SgdDensityConfig) -> Result<Self> {
        config.validate()?;
        let fm_x = build_rff(config.feature_map, config.rff())?;
        let density = EigenDensity::new(EigenConfig {
            dim: config.dim_x,
            num_eig: config.num_eig,
            random_state: config.random_state,
        })?;
        Ok(Self {
            fm_x,
            config,
            density,
        })
    }

    /// Rebuild an untrained estimator from a flat parameter map.
    pub fn from_config(map: Map<String, Value>) -> Result<Self> {
        Self::new(SgdDensityConfig::from_map(map)?)
    }

    /// Born-rule value per sample.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let psi = self.fm_x.map(x)?;
        self.density.probabilities(psi.view())
    }

    /// Seed the eigen form from an accumulated density matrix.
    pub fn set_rho(&mut self, rho: &Array2<Complex64>) -> Result<()> {
        self.density.set_rho(rho)
    }

    /// The eigen-form density matrix.
    pub fn eigen(&self) -> &EigenDensity {
        &self.density
    }

    /// The input feature map.
    pub fn feature_map(&self) -> &dyn FeatureMap {
        self.fm_x.as_ref()
    }

    /// Model parameters.
    pub fn config(&self) -> &SgdDensityConfig {
        &self.config
    }

    /// Flat parameter map.
    pub fn get_config(&self) -> Result<Map<String, Value>> {
        self.config.to_map()
    }
}

impl GradientModel for QMDensitySgd {
    /// `y` is ignored.
    fn loss_and_gradients(
        &self,
        x: ArrayView2<'_, f64>,
        _y: ArrayView2<'_, f64>,
    ) -> Result<(f64, Vec<EigenGradient>)> {
        let n = x.nrows();
        if n == 0 {
            return Err(QMeasureError::NoSamples);
        }
        let psi = self.fm_x.map(x)?;
        let mut total = EigenGradient::zeros(self.density.dim(), self.density.num_eig());
        let mut loss = 0.0;
        let mut floored = 0usize;
        for state in psi.axis_iter(Axis(0)) {
            let (p, grad) = self.density.probability_with_gradient(state)?;
            if p < PROB_EPS {
                floored += 1;
            }
            let p = p.max(PROB_EPS);
            loss -= p.ln();
            total.scaled_add(-1.0 / p, &grad);
        }
        if floored > 0 {
            warn!(floored, "probabilities floored during likelihood evaluation");
        }
        total.scale(1.0 / n as f64);
        Ok((loss / n as f64, vec![total]))
    }

    fn eigen_components_mut(&mut self) -> Vec<&mut EigenDensity> {
        vec![&mut self.density]
    }
}
