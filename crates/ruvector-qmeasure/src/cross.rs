//! Batched outer products.
//!
//! The cross product of two batches `A (n, d1)` and `B (n, d2)` is the batch of
//! rank-1 operators `O[n] = A[n] ⊗ B[n]ᵗ`. No conjugation happens here; a
//! density matrix `ρ = ψψ*` is built by passing `conj(ψ)` as the second operand,
//! which [`outer_sum`] does while reducing over the batch axis.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis};
use num_complex::Complex64;

use crate::error::{QMeasureError, Result};

/// Batch of outer products `O[n, i, j] = a[n, i] * b[n, j]`.
pub fn cross_product(
    a: ArrayView2<'_, Complex64>,
    b: ArrayView2<'_, Complex64>,
) -> Result<Array3<Complex64>> {
    if a.nrows() != b.nrows() {
        return Err(QMeasureError::dimension_mismatch(a.nrows(), b.nrows()));
    }
    let (n, d1) = a.dim();
    let d2 = b.ncols();
    Ok(Array3::from_shape_fn((n, d1, d2), |(s, i, j)| a[[s, i]] * b[[s, j]]))
}

/// Joint states `ψ_x ⊗ ψ_y`, flattened row-major to shape `(n, d1 * d2)`.
///
/// Component `k * d2 + l` holds `ψ_x[k] * ψ_y[l]`.
pub fn joint_states(
    psi_x: ArrayView2<'_, Complex64>,
    psi_y: ArrayView2<'_, Complex64>,
) -> Result<Array2<Complex64>> {
    let cross = cross_product(psi_x, psi_y)?;
    let (n, d1, d2) = cross.dim();
    cross
        .into_shape_with_order((n, d1 * d2))
        .map_err(|e| QMeasureError::numerical(format!("joint state reshape failed: {e}")))
}

/// Sum over the batch of `ψ_n ψ_n*`.
///
/// Returns `W[i, j] = Σ_n ψ[n, i] * conj(ψ[n, j])`, the unnormalized density
/// matrix contribution of a batch.
pub fn outer_sum(psi: ArrayView2<'_, Complex64>) -> Array2<Complex64> {
    let conj = psi.mapv(|z| z.conj());
    psi.t().dot(&conj)
}

/// Weighted batch reduction `Σ_n w_n ψ_n ψ_n*`.
///
/// Used for per-class routing (one-hot masks as weights) and for the
/// label-weighted operator of the ratio regressor.
pub fn weighted_outer_sum(
    psi: ArrayView2<'_, Complex64>,
    weights: ArrayView1<'_, f64>,
) -> Result<Array2<Complex64>> {
    if weights.len() != psi.nrows() {
        return Err(QMeasureError::dimension_mismatch(psi.nrows(), weights.len()));
    }
    let mut scaled = psi.to_owned();
    for (mut row, &w) in scaled.axis_iter_mut(Axis(0)).zip(weights.iter()) {
        row.mapv_inplace(|z| z * w);
    }
    let conj = psi.mapv(|z| z.conj());
    Ok(scaled.t().dot(&conj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_cross_product_shape_and_values() {
        let a = array![[c(1.0, 0.0), c(2.0, 0.0)], [c(0.0, 1.0), c(1.0, 0.0)]];
        let b = array![
            [c(3.0, 0.0), c(4.0, 0.0), c(5.0, 0.0)],
            [c(1.0, 0.0), c(0.0, 1.0), c(0.0, 0.0)]
        ];
        let out = cross_product(a.view(), b.view()).unwrap();

        assert_eq!(out.dim(), (2, 2, 3));
        assert_eq!(out[[0, 1, 2]], c(10.0, 0.0));
        // i * i = -1, complex products are not truncated to the real part
        assert_eq!(out[[1, 0, 1]], c(-1.0, 0.0));
    }

    #[test]
    fn test_cross_product_batch_mismatch() {
        let a = Array2::<Complex64>::zeros((2, 2));
        let b = Array2::<Complex64>::zeros((3, 2));
        assert!(matches!(
            cross_product(a.view(), b.view()),
            Err(QMeasureError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_joint_states_layout() {
        let x = array![[c(1.0, 0.0), c(2.0, 0.0)]];
        let y = array![[c(0.0, 0.0), c(1.0, 0.0), c(3.0, 0.0)]];
        let joint = joint_states(x.view(), y.view()).unwrap();

        assert_eq!(joint.dim(), (1, 6));
        // index k * dim_y + l
        assert_eq!(joint[[0, 4]], c(2.0, 0.0));
        assert_eq!(joint[[0, 5]], c(6.0, 0.0));
    }

    #[test]
    fn test_outer_sum_is_hermitian() {
        let psi = array![[c(0.6, 0.0), c(0.0, 0.8)], [c(1.0, 0.0), c(0.0, 0.0)]];
        let w = outer_sum(psi.view());

        for i in 0..2 {
            for j in 0..2 {
                let diff = w[[i, j]] - w[[j, i]].conj();
                assert_abs_diff_eq!(diff.norm(), 0.0, epsilon = 1e-12);
            }
        }
        assert_abs_diff_eq!(w[[0, 0]].re, 0.36 + 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[[0, 1]].im, -0.48, epsilon = 1e-12);
    }

    #[test]
    fn test_weighted_outer_sum_masks_rows() {
        let psi = array![[c(1.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(1.0, 0.0)]];
        let mask: Array1<f64> = array![0.0, 1.0];
        let w = weighted_outer_sum(psi.view(), mask.view()).unwrap();

        assert_abs_diff_eq!(w[[0, 0]].re, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[[1, 1]].re, 1.0, epsilon = 1e-12);

        let bad = array![1.0];
        assert!(weighted_outer_sum(psi.view(), bad.view()).is_err());
    }
}
