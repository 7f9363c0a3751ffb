//! Multi-class kernel density classifiers.
//!
//! One density matrix per class estimates `p(x | c)`; the posterior follows
//! from Bayes' rule,
//!
//! ```text
//! P(c | x) = π_c p(x | c) / Σ_j π_j p(x | j)
//! ```
//!
//! with a uniform prior `π` unless [`DmkdClassifier::set_class_priors`] (or
//! the SGD variant's equivalent) installs another one.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use num_complex::Complex64;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::accumulator::DensityAccumulator;
use crate::config::{KdcConfig, ModelConfig, SgdKdcConfig};
use crate::cross::weighted_outer_sum;
use crate::eigen::{EigenConfig, EigenDensity, EigenGradient};
use crate::error::{QMeasureError, Result};
use crate::feature_map::{build_rff, FeatureMap, OneHotFeatureMap};
use crate::measure::PROB_EPS;
use crate::train::{
    fit_accumulating, is_degenerate, AccumulatingModel, FitReport, GradientModel,
};

fn normalized_priors(priors: Array1<f64>, num_classes: usize) -> Result<Array1<f64>> {
    if priors.len() != num_classes {
        return Err(QMeasureError::dimension_mismatch(num_classes, priors.len()));
    }
    if priors.iter().any(|&p| !p.is_finite() || p < 0.0) {
        return Err(QMeasureError::invalid_parameter("priors", "must be finite and non-negative"));
    }
    let total = priors.sum();
    if total <= 0.0 {
        return Err(QMeasureError::invalid_parameter("priors", "must not all be zero"));
    }
    Ok(priors / total)
}

fn prior_or_uniform(priors: Option<&Array1<f64>>, num_classes: usize) -> Array1<f64> {
    match priors {
        Some(p) => p.clone(),
        None => Array1::from_elem(num_classes, 1.0 / num_classes as f64),
    }
}

/// Bayes combination of per-class densities `(n, C)`. Rows whose weighted
/// densities all vanish get the uniform distribution.
fn posteriors(densities: &Array2<f64>, priors: &Array1<f64>) -> Array2<f64> {
    let num_classes = densities.ncols();
    let mut out = densities.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        row.zip_mut_with(priors, |p, &w| *p = p.max(0.0) * w);
        let total = row.sum();
        if total > 0.0 {
            row /= total;
        } else {
            row.fill(1.0 / num_classes as f64);
        }
    }
    out
}

/// Kernel density classifier trained by per-class accumulation.
#[derive(Debug, Clone)]
pub struct DmkdClassifier<F> {
    fm_x: F,
    config: KdcConfig,
    encoder: OneHotFeatureMap,
    accumulators: Vec<DensityAccumulator>,
    priors: Option<Array1<f64>>,
}

impl<F: FeatureMap> DmkdClassifier<F> {
    /// Create a classifier with one `dim_x`-dimensional estimator per class.
    pub fn new(fm_x: F, dim_x: usize, num_classes: usize) -> Result<Self> {
        let config = KdcConfig { dim_x, num_classes };
        config.validate()?;
        if fm_x.dim() != dim_x {
            return Err(QMeasureError::dimension_mismatch(dim_x, fm_x.dim()));
        }
        let accumulators = (0..num_classes)
            .map(|_| DensityAccumulator::new(dim_x))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            fm_x,
            config,
            encoder: OneHotFeatureMap::new(num_classes)?,
            accumulators,
            priors: None,
        })
    }

    /// Replace the uniform prior. The weights are normalized to sum one.
    pub fn set_class_priors(&mut self, priors: Array1<f64>) -> Result<()> {
        self.priors = Some(normalized_priors(priors, self.config.num_classes)?);
        Ok(())
    }

    /// Class prior in use.
    pub fn class_priors(&self) -> Array1<f64> {
        prior_or_uniform(self.priors.as_ref(), self.config.num_classes)
    }

    /// Per-class densities `p(x | c)`, shape `(n, C)`.
    pub fn class_densities(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let psi = self.fm_x.map(x)?;
        let mut out = Array2::zeros((psi.nrows(), self.config.num_classes));
        for (mut col, acc) in out.axis_iter_mut(Axis(1)).zip(self.accumulators.iter()) {
            col.assign(&acc.probabilities(psi.view())?);
        }
        Ok(out)
    }

    /// Posterior class probabilities, shape `(n, C)`.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        Ok(posteriors(&self.class_densities(x)?, &self.class_priors()))
    }

    /// Reset, route every labelled sample to its class estimator and
    /// normalize each estimator once. Labels are read from column 0 of `y`.
    pub fn fit(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        batch_size: usize,
    ) -> Result<FitReport> {
        fit_accumulating(self, x, y, batch_size)
    }

    /// Per-class density matrices in class order.
    pub fn get_rhos(&self) -> Vec<&Array2<Complex64>> {
        self.accumulators.iter().map(DensityAccumulator::weights).collect()
    }

    /// Samples seen per class in the current run.
    pub fn class_counts(&self) -> Vec<usize> {
        self.accumulators.iter().map(DensityAccumulator::n_samples).collect()
    }

    /// Model dimensions.
    pub fn config(&self) -> &KdcConfig {
        &self.config
    }

    /// Flat parameter map.
    pub fn get_config(&self) -> Result<Map<String, Value>> {
        self.config.to_map()
    }
}

impl<F: FeatureMap> AccumulatingModel for DmkdClassifier<F> {
    fn reset(&mut self) {
        for acc in &mut self.accumulators {
            acc.reset();
        }
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
        let classes = y
            .column(0)
            .iter()
            .map(|&label| self.encoder.class_index(label))
            .collect::<Result<Vec<_>>>()?;
        let psi = self.fm_x.map(x)?;

        for (c, acc) in self.accumulators.iter_mut().enumerate() {
            let mask: Array1<f64> = classes
                .iter()
                .map(|&k| if k == c { 1.0 } else { 0.0 })
                .collect();
            let count = classes.iter().filter(|&&k| k == c).count();
            if count == 0 {
                continue;
            }
            let contribution = weighted_outer_sum(psi.view(), mask.view())?;
            acc.add_contribution(&contribution, count)?;
        }
        Ok(classes.len())
    }

    /// Every class must have samples; otherwise no estimator is normalized
    /// and the run can still be completed by further accumulation.
    fn finalize(&mut self) -> Result<()> {
        let empty: Vec<usize> = self
            .accumulators
            .iter()
            .enumerate()
            .filter(|(_, acc)| acc.n_samples() == 0)
            .map(|(class, _)| class)
            .collect();
        if !empty.is_empty() {
            for &class in &empty {
                warn!(class, "no training samples for class");
            }
            return Err(QMeasureError::NoSamples);
        }
        for acc in &mut self.accumulators {
            acc.finalize()?;
        }
        info!(counts = ?self.class_counts(), "per-class density matrices finalized");
        Ok(())
    }
}

/// Kernel density classifier with eigen-form class densities, trained by
/// cross-entropy on the posteriors.
pub struct DmkdClassifierSgd {
    fm_x: Box<dyn FeatureMap>,
    config: SgdKdcConfig,
    components: Vec<EigenDensity>,
    priors: Option<Array1<f64>>,
}

impl DmkdClassifierSgd {
    /// Build an untrained classifier with its own random Fourier features.
    ///
    /// Class `c` draws its initial eigenvectors from seed `random_state + c + 1`,
    /// so streams overlap with other components seeded nearby.
    pub fn new(config: SgdKdcConfig) -> Result<Self> {
        config.validate()?;
        let fm_x = build_rff(config.feature_map, config.rff())?;
        let components = (0..config.num_classes)
            .map(|c| {
                EigenDensity::new(EigenConfig {
                    dim: config.dim_x,
                    num_eig: config.num_eig,
                    random_state: config.random_state.map(|seed| seed.wrapping_add(c as u64 + 1)),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            fm_x,
            config,
            components,
            priors: None,
        })
    }

    /// Rebuild an untrained classifier from a flat parameter map.
    pub fn from_config(map: Map<String, Value>) -> Result<Self> {
        Self::new(SgdKdcConfig::from_map(map)?)
    }

    /// Replace the uniform prior. The weights are normalized to sum one.
    pub fn set_class_priors(&mut self, priors: Array1<f64>) -> Result<()> {
        self.priors = Some(normalized_priors(priors, self.config.num_classes)?);
        Ok(())
    }

    /// Class prior in use.
    pub fn class_priors(&self) -> Array1<f64> {
        prior_or_uniform(self.priors.as_ref(), self.config.num_classes)
    }

    /// Per-class densities `p(x | c)`, shape `(n, C)`.
    pub fn class_densities(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let psi = self.fm_x.map(x)?;
        let mut out = Array2::zeros((psi.nrows(), self.config.num_classes));
        for (mut col, component) in out.axis_iter_mut(Axis(1)).zip(self.components.iter()) {
            col.assign(&component.probabilities(psi.view())?);
        }
        Ok(out)
    }

    /// Posterior class probabilities, shape `(n, C)`.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        Ok(posteriors(&self.class_densities(x)?, &self.class_priors()))
    }

    /// Seed every class component from accumulated per-class density
    /// matrices, e.g. [`DmkdClassifier::get_rhos`] with the same features.
    pub fn set_rhos(&mut self, rhos: &[&Array2<Complex64>]) -> Result<()> {
        if rhos.len() != self.components.len() {
            return Err(QMeasureError::dimension_mismatch(self.components.len(), rhos.len()));
        }
        for (component, rho) in self.components.iter_mut().zip(rhos.iter()) {
            component.set_rho(rho)?;
        }
        Ok(())
    }

    /// Eigen-form class densities in class order.
    pub fn components(&self) -> &[EigenDensity] {
        &self.components
    }

    /// The input feature map.
    pub fn feature_map(&self) -> &dyn FeatureMap {
        self.fm_x.as_ref()
    }

    /// Model parameters.
    pub fn config(&self) -> &SgdKdcConfig {
        &self.config
    }

    /// Flat parameter map.
    pub fn get_config(&self) -> Result<Map<String, Value>> {
        self.config.to_map()
    }
}

impl GradientModel for DmkdClassifierSgd {
    /// `y` holds target distributions, shape `(n, C)`.
    fn loss_and_gradients(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<(f64, Vec<EigenGradient>)> {
        let num_classes = self.config.num_classes;
        if y.dim() != (x.nrows(), num_classes) {
            return Err(QMeasureError::shape_mismatch(&[x.nrows(), num_classes], y.shape()));
        }
        let n = x.nrows();
        if n == 0 {
            return Err(QMeasureError::NoSamples);
        }
        let psi = self.fm_x.map(x)?;
        let priors = self.class_priors();
        let mut totals: Vec<EigenGradient> = self
            .components
            .iter()
            .map(|c| EigenGradient::zeros(c.dim(), c.num_eig()))
            .collect();
        let mut loss = 0.0;

        for (state, target) in psi.axis_iter(Axis(0)).zip(y.axis_iter(Axis(0))) {
            let evaluated = self
                .components
                .iter()
                .map(|c| c.probability_with_gradient(state))
                .collect::<Result<Vec<_>>>()?;
            let p: Vec<f64> = evaluated.iter().map(|(p, _)| p.max(PROB_EPS)).collect();
            let s: f64 = p.iter().zip(priors.iter()).map(|(p, w)| p * w).sum();
            let t_total = target.sum();

            for c in 0..num_classes {
                let weighted = priors[c] * p[c];
                if target[c] != 0.0 {
                    loss -= target[c] * (weighted.max(PROB_EPS) / s).ln();
                }
                // ∂L/∂p_c with P_c = π_c p_c / S
                let dp = -target[c] / p[c] + priors[c] * t_total / s;
                totals[c].scaled_add(dp, &evaluated[c].1);
            }
        }

        let scale = 1.0 / n as f64;
        for grad in &mut totals {
            grad.scale(scale);
        }
        Ok((loss * scale, totals))
    }

    fn eigen_components_mut(&mut self) -> Vec<&mut EigenDensity> {
        self.components.iter_mut().collect()
    }
}
