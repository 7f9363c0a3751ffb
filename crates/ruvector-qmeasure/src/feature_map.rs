//! Feature maps projecting raw inputs into a Hilbert space.
//!
//! A feature map encodes a batch of classical inputs `x` into a batch of
//! (possibly complex) state vectors `|ψ(x)>` of a fixed dimension. The density
//! matrix models only depend on the [`FeatureMap`] trait; the maps below are the
//! random-feature encodings the gradient-descent models build for themselves.
//!
//! # Random Fourier Features
//!
//! For the RBF kernel `k(x, y) = exp(-γ‖x − y‖²)`, Bochner's theorem gives
//!
//! ```text
//! k(x, y) ≈ <ψ(x), ψ(y)>,   ψ(x) = sqrt(2/D) · cos(xW + b)
//! ```
//!
//! with `W ~ N(0, 2γ)` and `b ~ U(0, 2π)`. The complex variant uses
//! `ψ(x) = exp(i·xW) / sqrt(D)` and needs no offset.
//!
//! # References
//!
//! - Rahimi, A., & Recht, B. (2007). "Random Features for Large-Scale Kernel Machines"

use ndarray::{Array2, ArrayView2, Axis};
use num_complex::Complex64;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{QMeasureError, Result};

/// A mapping from raw inputs to state vectors of fixed dimension.
pub trait FeatureMap: Send + Sync {
    /// Dimension of the produced state vectors.
    fn dim(&self) -> usize;

    /// Encode a batch of inputs `(n, input_dim)` into states `(n, dim)`.
    fn map(&self, x: ArrayView2<'_, f64>) -> Result<Array2<Complex64>>;
}

impl<F: FeatureMap + ?Sized> FeatureMap for Box<F> {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn map(&self, x: ArrayView2<'_, f64>) -> Result<Array2<Complex64>> {
        (**self).map(x)
    }
}

/// Which random-feature encoding a model builds internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureMapKind {
    /// Real random Fourier features.
    #[default]
    Real,
    /// Complex random Fourier features.
    Complex,
}

/// Configuration for random Fourier feature maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RffConfig {
    /// Dimension of the raw input.
    pub input_dim: usize,
    /// Number of random features (dimension of the state vectors).
    pub dim: usize,
    /// Gamma parameter of the approximated RBF kernel.
    pub gamma: f64,
    /// Random seed for reproducibility of the sampled frequencies.
    pub random_state: Option<u64>,
}

impl Default for RffConfig {
    fn default() -> Self {
        Self {
            input_dim: 2,
            dim: 64,
            gamma: 1.0,
            random_state: None,
        }
    }
}

impl RffConfig {
    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 {
            return Err(QMeasureError::invalid_parameter("input_dim", "must be at least 1"));
        }
        if self.dim == 0 {
            return Err(QMeasureError::invalid_parameter("dim", "must be at least 1"));
        }
        if self.gamma <= 0.0 || !self.gamma.is_finite() {
            return Err(QMeasureError::invalid_parameter("gamma", "must be positive and finite"));
        }
        Ok(())
    }

    fn rng(&self) -> rand::rngs::StdRng {
        match self.random_state {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_entropy(),
        }
    }

    fn sample_frequencies(&self, rng: &mut rand::rngs::StdRng) -> Result<Array2<f64>> {
        let normal = Normal::new(0.0, (2.0 * self.gamma).sqrt())
            .map_err(|e| QMeasureError::invalid_parameter("gamma", e.to_string()))?;
        Ok(Array2::from_shape_fn((self.input_dim, self.dim), |_| normal.sample(rng)))
    }
}

fn check_input(x: &ArrayView2<'_, f64>, input_dim: usize) -> Result<()> {
    if x.ncols() != input_dim {
        return Err(QMeasureError::dimension_mismatch(input_dim, x.ncols()));
    }
    Ok(())
}

/// Real random Fourier feature map.
#[derive(Debug, Clone)]
pub struct RffFeatureMap {
    config: RffConfig,
    weights: Array2<f64>,
    offsets: ndarray::Array1<f64>,
}

impl RffFeatureMap {
    /// Sample a new feature map.
    pub fn new(config: RffConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = config.rng();
        let weights = config.sample_frequencies(&mut rng)?;
        let uniform = Uniform::new(0.0, 2.0 * PI);
        let offsets = ndarray::Array1::from_shape_fn(config.dim, |_| uniform.sample(&mut rng));

        Ok(Self {
            config,
            weights,
            offsets,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &RffConfig {
        &self.config
    }
}

impl FeatureMap for RffFeatureMap {
    fn dim(&self) -> usize {
        self.config.dim
    }

    fn map(&self, x: ArrayView2<'_, f64>) -> Result<Array2<Complex64>> {
        check_input(&x, self.config.input_dim)?;
        let scale = (2.0 / self.config.dim as f64).sqrt();
        let mut features = x.dot(&self.weights) + &self.offsets;
        features.mapv_inplace(|v| scale * v.cos());

        // Unit norm per row; the kernel approximation only holds on average.
        for mut row in features.axis_iter_mut(Axis(0)) {
            let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 1e-12 {
                row /= norm;
            }
        }

        Ok(features.mapv(|v| Complex64::new(v, 0.0)))
    }
}

/// Complex random Fourier feature map.
#[derive(Debug, Clone)]
pub struct ComplexRffFeatureMap {
    config: RffConfig,
    weights: Array2<f64>,
}

impl ComplexRffFeatureMap {
    /// Sample a new feature map.
    pub fn new(config: RffConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = config.rng();
        let weights = config.sample_frequencies(&mut rng)?;
        Ok(Self { config, weights })
    }

    /// Get the configuration.
    pub fn config(&self) -> &RffConfig {
        &self.config
    }
}

impl FeatureMap for ComplexRffFeatureMap {
    fn dim(&self) -> usize {
        self.config.dim
    }

    fn map(&self, x: ArrayView2<'_, f64>) -> Result<Array2<Complex64>> {
        check_input(&x, self.config.input_dim)?;
        let scale = 1.0 / (self.config.dim as f64).sqrt();
        let phases = x.dot(&self.weights);
        Ok(phases.mapv(|theta| Complex64::from_polar(scale, theta)))
    }
}

/// Build the random-feature map selected by `kind`.
pub fn build_rff(kind: FeatureMapKind, config: RffConfig) -> Result<Box<dyn FeatureMap>> {
    Ok(match kind {
        FeatureMapKind::Real => Box::new(RffFeatureMap::new(config)?),
        FeatureMapKind::Complex => Box::new(ComplexRffFeatureMap::new(config)?),
    })
}

/// One-hot encoding of integer labels stored in the first input column.
#[derive(Debug, Clone, Copy)]
pub struct OneHotFeatureMap {
    num_classes: usize,
}

impl OneHotFeatureMap {
    /// Create a one-hot map over `num_classes` classes.
    pub fn new(num_classes: usize) -> Result<Self> {
        if num_classes == 0 {
            return Err(QMeasureError::invalid_parameter("num_classes", "must be at least 1"));
        }
        Ok(Self { num_classes })
    }

    /// Convert a label value into a class index.
    ///
    /// Labels must be integral values in `[0, num_classes)`.
    pub fn class_index(&self, label: f64) -> Result<usize> {
        if !label.is_finite()
            || label.fract() != 0.0
            || label < 0.0
            || label >= self.num_classes as f64
        {
            return Err(QMeasureError::InvalidLabel {
                label,
                num_classes: self.num_classes,
            });
        }
        Ok(label as usize)
    }
}

impl FeatureMap for OneHotFeatureMap {
    fn dim(&self) -> usize {
        self.num_classes
    }

    fn map(&self, x: ArrayView2<'_, f64>) -> Result<Array2<Complex64>> {
        if x.ncols() == 0 {
            return Err(QMeasureError::dimension_mismatch(1, 0));
        }
        let mut out = Array2::zeros((x.nrows(), self.num_classes));
        for (i, &label) in x.column(0).iter().enumerate() {
            out[[i, self.class_index(label)?]] = Complex64::new(1.0, 0.0);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn rff_config(dim: usize) -> RffConfig {
        RffConfig {
            input_dim: 2,
            dim,
            gamma: 0.5,
            random_state: Some(42),
        }
    }

    #[test]
    fn test_config_validation() {
        let mut config = RffConfig::default();
        assert!(config.validate().is_ok());

        config.gamma = 0.0;
        assert!(RffFeatureMap::new(config.clone()).is_err());

        config.gamma = 1.0;
        config.dim = 0;
        assert!(ComplexRffFeatureMap::new(config).is_err());
    }

    #[test]
    fn test_rff_unit_norm() {
        let fm = RffFeatureMap::new(rff_config(32)).unwrap();
        let x = array![[0.1, -0.3], [2.0, 1.5], [0.0, 0.0]];
        let psi = fm.map(x.view()).unwrap();

        assert_eq!(psi.dim(), (3, 32));
        for row in psi.rows() {
            let norm_sq: f64 = row.iter().map(|z| z.norm_sqr()).sum();
            assert_abs_diff_eq!(norm_sq, 1.0, epsilon = 1e-9);
            assert!(row.iter().all(|z| z.im == 0.0));
        }
    }

    #[test]
    fn test_rff_seed_reproducible() {
        let a = RffFeatureMap::new(rff_config(16)).unwrap();
        let b = RffFeatureMap::new(rff_config(16)).unwrap();
        let x = array![[0.7, -1.2]];
        assert_eq!(a.map(x.view()).unwrap(), b.map(x.view()).unwrap());
    }

    #[test]
    fn test_rff_approximates_rbf_kernel() {
        let fm = RffFeatureMap::new(rff_config(4000)).unwrap();
        let x = array![[0.0, 0.0], [0.5, 0.5]];
        let psi = fm.map(x.view()).unwrap();
        let inner: f64 = psi
            .row(0)
            .iter()
            .zip(psi.row(1).iter())
            .map(|(a, b)| (a.conj() * b).re)
            .sum();

        // exp(-0.5 * 0.5) for squared distance 0.5
        let expected = (-0.25f64).exp();
        assert!((inner - expected).abs() < 0.08, "inner={inner}, expected={expected}");
    }

    #[test]
    fn test_complex_rff_unit_norm() {
        let fm = ComplexRffFeatureMap::new(rff_config(20)).unwrap();
        let psi = fm.map(array![[1.0, 2.0]].view()).unwrap();
        let norm_sq: f64 = psi.iter().map(|z| z.norm_sqr()).sum();
        assert_abs_diff_eq!(norm_sq, 1.0, epsilon = 1e-12);
        assert!(psi.iter().any(|z| z.im.abs() > 1e-6));
    }

    #[test]
    fn test_input_dimension_checked() {
        let fm = RffFeatureMap::new(rff_config(8)).unwrap();
        assert!(matches!(
            fm.map(array![[1.0, 2.0, 3.0]].view()),
            Err(QMeasureError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_one_hot() {
        let fm = OneHotFeatureMap::new(3).unwrap();
        let psi = fm.map(array![[2.0], [0.0]].view()).unwrap();
        assert_eq!(psi[[0, 2]], Complex64::new(1.0, 0.0));
        assert_eq!(psi[[1, 0]], Complex64::new(1.0, 0.0));
        assert_eq!(psi.row(0).iter().filter(|z| z.norm() > 0.0).count(), 1);

        assert!(matches!(
            fm.map(array![[3.0]].view()),
            Err(QMeasureError::InvalidLabel { num_classes: 3, .. })
        ));
        assert!(fm.map(array![[-1.0]].view()).is_err());
    }

    #[test]
    fn test_one_hot_rejects_fractional_labels() {
        let fm = OneHotFeatureMap::new(2).unwrap();
        assert!(matches!(
            fm.map(array![[0.5]].view()),
            Err(QMeasureError::InvalidLabel { num_classes: 2, .. })
        ));
        assert!(fm.class_index(0.6).is_err());
        assert!(fm.class_index(0.4).is_err());
        assert_eq!(fm.class_index(1.0).unwrap(), 1);
    }

    #[test]
    fn test_build_rff_kind() {
        let fm = build_rff(FeatureMapKind::Complex, rff_config(8)).unwrap();
        assert_eq!(fm.dim(), 8);
        let psi = fm.map(array![[0.3, 0.4]].view()).unwrap();
        assert_eq!(psi.dim(), (1, 8));
    }
}
