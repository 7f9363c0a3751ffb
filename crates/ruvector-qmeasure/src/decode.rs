//! Decoding output density matrices into predictions.
//!
//! The measured output operator `ρ_y` (one `dim_y × dim_y` block per sample)
//! is complex throughout; only these decoders cast to real.

use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};
use num_complex::Complex64;
use tracing::warn;

use crate::error::{QMeasureError, Result};

/// Categorical distributions from the diagonals of `ρ_y`.
///
/// Negative diagonal entries (numerical noise) are clipped to zero and each
/// row is renormalized to sum one. An all-zero block decodes to a zero row.
pub fn dm_to_dist(rho_y: &Array3<Complex64>) -> Array2<f64> {
    let (n, dim_y, _) = rho_y.dim();
    let mut probs = Array2::zeros((n, dim_y));
    for (mut row, block) in probs.axis_iter_mut(Axis(0)).zip(rho_y.axis_iter(Axis(0))) {
        for (p, z) in row.iter_mut().zip(block.diag().iter()) {
            *p = z.re.max(0.0);
        }
        let total = row.sum();
        if total > 0.0 {
            row /= total;
        }
    }
    probs
}

/// Decoder for a scalar regression target discretized over `dim_y` support
/// points.
#[derive(Debug, Clone)]
pub struct DensityMatrixRegression {
    support: Array1<f64>,
}

impl DensityMatrixRegression {
    /// Support points `0, 1, …, dim_y − 1`.
    pub fn new(dim_y: usize) -> Result<Self> {
        if dim_y == 0 {
            return Err(QMeasureError::invalid_parameter("dim_y", "must be at least 1"));
        }
        Ok(Self {
            support: Array1::from_iter((0..dim_y).map(|v| v as f64)),
        })
    }

    /// Custom support points, one per output basis state, in increasing
    /// order.
    pub fn with_support(support: Array1<f64>) -> Result<Self> {
        if support.is_empty() {
            return Err(QMeasureError::invalid_parameter("support", "must be non-empty"));
        }
        if support.iter().any(|v| !v.is_finite()) {
            return Err(QMeasureError::invalid_parameter("support", "must be finite"));
        }
        if support.windows(2).into_iter().any(|w| w[1] <= w[0]) {
            return Err(QMeasureError::invalid_parameter("support", "must be strictly increasing"));
        }
        Ok(Self { support })
    }

    /// Support points.
    pub fn support(&self) -> &Array1<f64> {
        &self.support
    }

    /// Encode scalar targets as distributions over the support, shape
    /// `(n, dim_y)`.
    ///
    /// A value between neighbouring support points `s_j ≤ y ≤ s_{j+1}` splits
    /// its mass linearly between them, so the encoded mean is `y` itself.
    /// Values outside the support are clamped to its end points.
    pub fn encode(&self, values: ArrayView1<'_, f64>) -> Result<Array2<f64>> {
        let dim_y = self.support.len();
        let lo = self.support[0];
        let hi = self.support[dim_y - 1];
        let mut clamped = 0usize;
        let mut targets = Array2::zeros((values.len(), dim_y));
        for (mut row, &value) in targets.axis_iter_mut(Axis(0)).zip(values.iter()) {
            if !value.is_finite() {
                return Err(QMeasureError::invalid_parameter("y", "targets must be finite"));
            }
            if value < lo || value > hi {
                clamped += 1;
            }
            if dim_y == 1 {
                row[0] = 1.0;
                continue;
            }
            let value = value.clamp(lo, hi);
            // first support point strictly above the value, or the last one
            let upper = self
                .support
                .iter()
                .position(|&s| s > value)
                .unwrap_or(dim_y - 1)
                .max(1);
            let (s0, s1) = (self.support[upper - 1], self.support[upper]);
            let w = ((value - s0) / (s1 - s0)).clamp(0.0, 1.0);
            row[upper - 1] = 1.0 - w;
            row[upper] = w;
        }
        if clamped > 0 {
            warn!(clamped, "targets outside the support were clamped");
        }
        Ok(targets)
    }

    /// Conditional mean and variance per sample, shape `(n, 2)`.
    pub fn decode(&self, rho_y: &Array3<Complex64>) -> Result<Array2<f64>> {
        let dim_y = rho_y.len_of(Axis(1));
        if dim_y != self.support.len() {
            return Err(QMeasureError::dimension_mismatch(self.support.len(), dim_y));
        }
        let probs = dm_to_dist(rho_y);
        let mut out = Array2::zeros((probs.nrows(), 2));
        for (mut row, p) in out.axis_iter_mut(Axis(0)).zip(probs.axis_iter(Axis(0))) {
            let mean = p.dot(&self.support);
            let var = p
                .iter()
                .zip(self.support.iter())
                .map(|(&w, &v)| w * (v - mean).powi(2))
                .sum::<f64>();
            row[0] = mean;
            row[1] = var;
        }
        Ok(out)
    }
}
