//! Eigen-parametrized density matrix.
//!
//! A density matrix is held as `k` weighted eigenvectors,
//!
//! ```text
//! ρ = V diag(λ) V*,   V ∈ C^{d×k},  λ ∈ R^k
//! ```
//!
//! which bounds memory to `O(d·k)` and gives gradient descent a small set of
//! parameters. Unconstrained optimizer steps can push `λ` off the simplex or
//! change column norms, so [`EigenDensity::project`] must run after every
//! update to restore `λ_i ≥ 0`, `Σ λ_i = 1` and unit-norm columns.
//! Orthogonality of the columns holds at initialization only.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use num_complex::Complex64;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{QMeasureError, Result};

const NORM_EPS: f64 = 1e-12;

/// Configuration for an eigen-parametrized density matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EigenConfig {
    /// Dimension of the space the density matrix acts on.
    pub dim: usize,
    /// Number of eigenpairs; `0` means `dim`.
    pub num_eig: usize,
    /// Random seed for the initial eigenvectors.
    pub random_state: Option<u64>,
}

impl EigenConfig {
    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(QMeasureError::invalid_parameter("dim", "must be at least 1"));
        }
        if self.num_eig > self.dim {
            return Err(QMeasureError::invalid_parameter(
                "num_eig",
                format!("must not exceed dim ({})", self.dim),
            ));
        }
        Ok(())
    }

    /// Effective number of eigenpairs.
    pub fn effective_num_eig(&self) -> usize {
        if self.num_eig == 0 {
            self.dim
        } else {
            self.num_eig
        }
    }
}

/// Gradient of a scalar loss with respect to `(λ, V)`.
///
/// `eig_vec` holds `∂L/∂Re(V) + i·∂L/∂Im(V)`, so a descent step is
/// `V ← V − lr · eig_vec`.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenGradient {
    /// Gradient with respect to the eigenvalues.
    pub eig_val: Array1<f64>,
    /// Gradient with respect to the eigenvectors.
    pub eig_vec: Array2<Complex64>,
}

impl EigenGradient {
    /// Zero gradient for a `dim × num_eig` parametrization.
    pub fn zeros(dim: usize, num_eig: usize) -> Self {
        Self {
            eig_val: Array1::zeros(num_eig),
            eig_vec: Array2::zeros((dim, num_eig)),
        }
    }

    /// `self += alpha * other`.
    pub fn scaled_add(&mut self, alpha: f64, other: &EigenGradient) {
        self.eig_val.scaled_add(alpha, &other.eig_val);
        self.eig_vec
            .zip_mut_with(&other.eig_vec, |a, &b| *a += b * alpha);
    }

    /// Multiply every entry by `alpha`.
    pub fn scale(&mut self, alpha: f64) {
        self.eig_val *= alpha;
        self.eig_vec.mapv_inplace(|z| z * alpha);
    }
}

/// Density matrix stored as weighted eigenvectors.
#[derive(Debug, Clone)]
pub struct EigenDensity {
    eig_val: Array1<f64>,
    eig_vec: Array2<Complex64>,
}

impl EigenDensity {
    /// Random initialization: Gaussian eigenvectors with unit-norm columns and
    /// uniform eigenvalues.
    pub fn new(config: EigenConfig) -> Result<Self> {
        config.validate()?;
        let k = config.effective_num_eig();

        let mut rng = match config.random_state {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_entropy(),
        };
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| QMeasureError::numerical(e.to_string()))?;
        let eig_vec = Array2::from_shape_fn((config.dim, k), |_| {
            Complex64::new(normal.sample(&mut rng), 0.0)
        });

        let mut density = Self {
            eig_val: Array1::from_elem(k, 1.0 / k as f64),
            eig_vec,
        };
        density.project();
        Ok(density)
    }

    /// Build from explicit eigenpairs. Columns of `eig_vec` pair with entries
    /// of `eig_val`. No projection is applied.
    pub fn from_parts(eig_val: Array1<f64>, eig_vec: Array2<Complex64>) -> Result<Self> {
        if eig_vec.ncols() != eig_val.len() {
            return Err(QMeasureError::dimension_mismatch(eig_val.len(), eig_vec.ncols()));
        }
        if eig_vec.nrows() == 0 || eig_val.is_empty() {
            return Err(QMeasureError::invalid_parameter("eig_vec", "must be non-empty"));
        }
        Ok(Self { eig_val, eig_vec })
    }

    /// Dimension `d` of the space.
    pub fn dim(&self) -> usize {
        self.eig_vec.nrows()
    }

    /// Number of eigenpairs `k`.
    pub fn num_eig(&self) -> usize {
        self.eig_val.len()
    }

    /// Eigenvalues `λ`.
    pub fn eig_val(&self) -> &Array1<f64> {
        &self.eig_val
    }

    /// Eigenvectors `V`, one per column.
    pub fn eig_vec(&self) -> &Array2<Complex64> {
        &self.eig_vec
    }

    /// Materialize `ρ = V diag(λ) V*`.
    pub fn to_matrix(&self) -> Array2<Complex64> {
        let mut weighted = self.eig_vec.clone();
        for (mut col, &lambda) in weighted.axis_iter_mut(Axis(1)).zip(self.eig_val.iter()) {
            col.mapv_inplace(|z| z * lambda);
        }
        let adjoint = self.eig_vec.t().mapv(|z| z.conj());
        weighted.dot(&adjoint)
    }

    /// Born-rule value `Σ_i λ_i |v_i* ψ|²` for every state in a batch.
    pub fn probabilities(&self, psi: ArrayView2<'_, Complex64>) -> Result<Array1<f64>> {
        self.check_states(&psi)?;
        let projections = self.projections(psi);
        Ok(projections
            .map_axis(Axis(1), |row| {
                row.iter()
                    .zip(self.eig_val.iter())
                    .map(|(c, &lambda)| lambda * c.norm_sqr())
                    .sum::<f64>()
            }))
    }

    /// Born-rule value for one state together with its gradient.
    ///
    /// With `c_i = v_i* ψ`, `∂p/∂λ_i = |c_i|²` and the eigenvector gradient is
    /// `2 λ_i ψ conj(c_i)`.
    pub fn probability_with_gradient(
        &self,
        psi: ArrayView1<'_, Complex64>,
    ) -> Result<(f64, EigenGradient)> {
        if psi.len() != self.dim() {
            return Err(QMeasureError::dimension_mismatch(self.dim(), psi.len()));
        }
        let coeffs: Array1<Complex64> = self
            .eig_vec
            .axis_iter(Axis(1))
            .map(|v| v.iter().zip(psi.iter()).map(|(a, b)| a.conj() * b).sum::<Complex64>())
            .collect();

        let mut grad = EigenGradient::zeros(self.dim(), self.num_eig());
        let mut p = 0.0;
        for (i, c) in coeffs.iter().enumerate() {
            let lambda = self.eig_val[i];
            p += lambda * c.norm_sqr();
            grad.eig_val[i] = c.norm_sqr();
            let factor = c.conj() * (2.0 * lambda);
            for (k, z) in psi.iter().enumerate() {
                grad.eig_vec[[k, i]] = z * factor;
            }
        }
        Ok((p, grad))
    }

    /// Apply one plain gradient-descent update. Call [`Self::project`] afterwards.
    pub fn apply_gradient(&mut self, grad: &EigenGradient, learning_rate: f64) -> Result<()> {
        if grad.eig_val.len() != self.num_eig() {
            return Err(QMeasureError::dimension_mismatch(self.num_eig(), grad.eig_val.len()));
        }
        if grad.eig_vec.dim() != self.eig_vec.dim() {
            return Err(QMeasureError::shape_mismatch(self.eig_vec.shape(), grad.eig_vec.shape()));
        }
        self.eig_val.scaled_add(-learning_rate, &grad.eig_val);
        self.eig_vec
            .zip_mut_with(&grad.eig_vec, |v, &g| *v -= g * learning_rate);
        Ok(())
    }

    /// Restore validity: clip negative eigenvalues, renormalize them to sum one
    /// and rescale every eigenvector to unit norm.
    pub fn project(&mut self) {
        self.eig_val.mapv_inplace(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
        let total = self.eig_val.sum();
        if total > NORM_EPS {
            self.eig_val /= total;
        } else {
            warn!(num_eig = self.num_eig(), "eigenvalues collapsed to zero, resetting to uniform");
            self.eig_val.fill(1.0 / self.num_eig() as f64);
        }

        let dim = self.dim();
        for (i, mut col) in self.eig_vec.axis_iter_mut(Axis(1)).enumerate() {
            let norm = col.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt();
            if norm > NORM_EPS && norm.is_finite() {
                col.mapv_inplace(|z| z / norm);
            } else {
                col.fill(Complex64::new(0.0, 0.0));
                col[i % dim] = Complex64::new(1.0, 0.0);
            }
        }
    }

    /// Install the top-`k` eigenpairs of an externally supplied density matrix.
    ///
    /// `rho` is symmetrized to `(ρ + ρ*)/2` before decomposition. Eigenvalues
    /// are ordered by decreasing value (a stable sort, so ties keep the
    /// decomposition's order); negative ones are clipped to zero. The kept
    /// eigenvalues are not renormalized, so `V diag(λ) V*` is the best rank-`k`
    /// approximation of `ρ`; the next projection restores `Σ λ_i = 1`.
    pub fn set_rho(&mut self, rho: &Array2<Complex64>) -> Result<()> {
        let d = self.dim();
        if rho.dim() != (d, d) {
            return Err(QMeasureError::shape_mismatch(&[d, d], rho.shape()));
        }

        let hermitian = DMatrix::from_fn(d, d, |i, j| (rho[[i, j]] + rho[[j, i]].conj()) * 0.5);
        let eigen = SymmetricEigen::try_new(hermitian, f64::EPSILON, 10_000).ok_or_else(|| {
            QMeasureError::DecompositionFailed("symmetric eigen solver did not converge".into())
        })?;

        let mut order: Vec<usize> = (0..d).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let k = self.num_eig();
        for (slot, &idx) in order.iter().take(k).enumerate() {
            self.eig_val[slot] = eigen.eigenvalues[idx].max(0.0);
            for row in 0..d {
                self.eig_vec[[row, slot]] = eigen.eigenvectors[(row, idx)];
            }
        }

        debug!(
            dim = d,
            num_eig = k,
            kept_mass = self.eig_val.sum(),
            "installed truncated eigen-decomposition"
        );
        Ok(())
    }

    /// Check `λ_i ≥ -tol`, `|Σ λ_i − 1| ≤ tol` and unit-norm columns.
    pub fn is_valid(&self, tol: f64) -> bool {
        let positive = self.eig_val.iter().all(|&v| v >= -tol);
        let normalized = (self.eig_val.sum() - 1.0).abs() <= tol;
        let unit = self
            .eig_vec
            .axis_iter(Axis(1))
            .all(|col| (col.iter().map(|z| z.norm_sqr()).sum::<f64>() - 1.0).abs() <= tol);
        positive && normalized && unit
    }

    /// `C[n, i] = v_i* ψ_n`.
    fn projections(&self, psi: ArrayView2<'_, Complex64>) -> Array2<Complex64> {
        let conj_vec = self.eig_vec.mapv(|z| z.conj());
        psi.dot(&conj_vec)
    }

    fn check_states(&self, psi: &ArrayView2<'_, Complex64>) -> Result<()> {
        if psi.ncols() != self.dim() {
            return Err(QMeasureError::dimension_mismatch(self.dim(), psi.ncols()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn config(dim: usize, num_eig: usize) -> EigenConfig {
        EigenConfig {
            dim,
            num_eig,
            random_state: Some(7),
        }
    }

    fn frobenius(a: &Array2<Complex64>, b: &Array2<Complex64>) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).norm_sqr()).sum::<f64>().sqrt()
    }

    #[test]
    fn test_initialization_is_valid() {
        let density = EigenDensity::new(config(5, 0)).unwrap();
        assert_eq!(density.num_eig(), 5);
        assert!(density.is_valid(1e-9));

        let density = EigenDensity::new(config(5, 2)).unwrap();
        assert_eq!(density.num_eig(), 2);
        assert_eq!(density.eig_vec().dim(), (5, 2));
    }

    #[test]
    fn test_num_eig_bounds() {
        assert!(EigenDensity::new(config(3, 4)).is_err());
        assert!(EigenDensity::new(config(0, 0)).is_err());
    }

    #[test]
    fn test_projection_restores_simplex() {
        let mut density = EigenDensity::new(config(4, 3)).unwrap();
        let mut grad = EigenGradient::zeros(4, 3);
        grad.eig_val = array![2.0, -1.0, 0.5];
        grad.eig_vec.fill(c(0.3, -0.2));

        density.apply_gradient(&grad, 0.5).unwrap();
        assert!(density.eig_val().iter().any(|&v| v < 0.0));

        density.project();
        assert!(density.is_valid(1e-9));
        assert_abs_diff_eq!(density.eig_val()[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_handles_collapse() {
        let mut density = EigenDensity::from_parts(
            array![-1.0, -2.0],
            Array2::zeros((3, 2)),
        )
        .unwrap();
        density.project();
        assert!(density.is_valid(1e-9));
        assert_eq!(density.eig_val(), &array![0.5, 0.5]);
    }

    #[test]
    fn test_probability_matches_full_matrix() {
        let density = EigenDensity::new(config(3, 2)).unwrap();
        let rho = density.to_matrix();
        let psi = array![[c(0.6, 0.0), c(0.0, 0.8), c(0.0, 0.0)]];

        let p_eig = density.probabilities(psi.view()).unwrap()[0];
        let p_full = crate::measure::born_probabilities(&rho, psi.view()).unwrap()[0];
        assert_abs_diff_eq!(p_eig, p_full, epsilon = 1e-12);

        let (p_single, _) = density.probability_with_gradient(psi.row(0)).unwrap();
        assert_abs_diff_eq!(p_single, p_full, epsilon = 1e-12);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let density = EigenDensity::new(config(3, 2)).unwrap();
        let psi = array![c(0.5, 0.1), c(-0.3, 0.4), c(0.2, -0.6)];
        let (p0, grad) = density.probability_with_gradient(psi.view()).unwrap();
        let h = 1e-6;

        let mut shifted = density.clone();
        shifted.eig_val[1] += h;
        let (p1, _) = shifted.probability_with_gradient(psi.view()).unwrap();
        assert_abs_diff_eq!((p1 - p0) / h, grad.eig_val[1], epsilon = 1e-4);

        let mut shifted = density.clone();
        shifted.eig_vec[[2, 0]] += c(h, 0.0);
        let (p1, _) = shifted.probability_with_gradient(psi.view()).unwrap();
        assert_abs_diff_eq!((p1 - p0) / h, grad.eig_vec[[2, 0]].re, epsilon = 1e-4);

        let mut shifted = density.clone();
        shifted.eig_vec[[1, 1]] += c(0.0, h);
        let (p1, _) = shifted.probability_with_gradient(psi.view()).unwrap();
        assert_abs_diff_eq!((p1 - p0) / h, grad.eig_vec[[1, 1]].im, epsilon = 1e-4);
    }

    #[test]
    fn test_set_rho_full_rank_reconstructs() {
        let rho = Array2::from_diag(&array![c(0.5, 0.0), c(0.3, 0.0), c(0.2, 0.0)]);
        let mut density = EigenDensity::new(config(3, 0)).unwrap();
        density.set_rho(&rho).unwrap();

        assert_eq!(density.num_eig(), 3);
        assert_abs_diff_eq!(density.eig_val()[0], 0.5, epsilon = 1e-10);
        assert_abs_diff_eq!(density.eig_val()[2], 0.2, epsilon = 1e-10);
        assert!(frobenius(&density.to_matrix(), &rho) < 1e-9);
    }

    #[test]
    fn test_set_rho_truncates_top_k() {
        let rho = Array2::from_diag(&array![c(0.1, 0.0), c(0.6, 0.0), c(0.3, 0.0)]);
        let mut density = EigenDensity::new(config(3, 1)).unwrap();
        density.set_rho(&rho).unwrap();

        assert_abs_diff_eq!(density.eig_val()[0], 0.6, epsilon = 1e-10);
        assert_abs_diff_eq!(density.eig_vec()[[1, 0]].norm(), 1.0, epsilon = 1e-10);

        let mut larger = EigenDensity::new(config(3, 2)).unwrap();
        larger.set_rho(&rho).unwrap();
        let err_1 = frobenius(&density.to_matrix(), &rho);
        let err_2 = frobenius(&larger.to_matrix(), &rho);
        assert!(err_2 < err_1);
        assert_abs_diff_eq!(err_2, 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_set_rho_dimension_mismatch() {
        let mut density = EigenDensity::new(config(3, 0)).unwrap();
        let rho = Array2::<Complex64>::zeros((4, 4));
        assert!(matches!(
            density.set_rho(&rho),
            Err(QMeasureError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_set_rho_complex_hermitian() {
        let rho = array![[c(0.7, 0.0), c(0.1, -0.2)], [c(0.1, 0.2), c(0.3, 0.0)]];
        let mut density = EigenDensity::new(config(2, 0)).unwrap();
        density.set_rho(&rho).unwrap();
        assert!(frobenius(&density.to_matrix(), &rho) < 1e-9);
        assert!(density.eig_val()[0] >= density.eig_val()[1]);
    }
}
