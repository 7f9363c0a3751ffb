//! Measurement operators.
//!
//! Given a density matrix (full or eigen form) and a batch of query states,
//! these functions compute either the Born-rule probability `ψ* ρ ψ` or, for a
//! density matrix over a joint input/output space, the output-subsystem
//! operator left after measuring the input subsystem with `|ψ_x>`:
//!
//! ```text
//! ρ_y ∝ (<ψ_x| ⊗ I) ρ (|ψ_x> ⊗ I)
//! ```
//!
//! Joint indices are flattened row-major, `k * dim_y + l`.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use num_complex::Complex64;

use crate::eigen::{EigenDensity, EigenGradient};
use crate::error::{QMeasureError, Result};

/// Floor applied to probabilities inside logarithms.
pub const PROB_EPS: f64 = 1e-10;

/// Born-rule values `Re(ψ_n* ρ ψ_n)` for a batch of states.
pub fn born_probabilities(
    rho: &Array2<Complex64>,
    psi: ArrayView2<'_, Complex64>,
) -> Result<Array1<f64>> {
    let d = rho.nrows();
    if rho.ncols() != d {
        return Err(QMeasureError::shape_mismatch(&[d, d], rho.shape()));
    }
    if psi.ncols() != d {
        return Err(QMeasureError::dimension_mismatch(d, psi.ncols()));
    }
    // row n holds ρ ψ_n
    let applied = psi.dot(&rho.t());
    Ok(psi
        .axis_iter(Axis(0))
        .zip(applied.axis_iter(Axis(0)))
        .map(|(state, image)| {
            state
                .iter()
                .zip(image.iter())
                .map(|(a, b)| (a.conj() * b).re)
                .sum::<f64>()
        })
        .collect())
}

/// Output-subsystem operators for a full joint density matrix.
///
/// `rho` acts on the `dim_x * dim_y` joint space. Each result block is divided
/// by its trace; a zero-trace block (untrained model) is returned as is.
pub fn measure_joint(
    rho: &Array2<Complex64>,
    psi_x: ArrayView2<'_, Complex64>,
    dim_y: usize,
) -> Result<Array3<Complex64>> {
    let dim_x = psi_x.ncols();
    let d = dim_x * dim_y;
    if dim_y == 0 {
        return Err(QMeasureError::invalid_parameter("dim_y", "must be at least 1"));
    }
    if rho.dim() != (d, d) {
        return Err(QMeasureError::shape_mismatch(&[d, d], rho.shape()));
    }

    let n = psi_x.nrows();
    let mut out = Array3::zeros((n, dim_y, dim_y));
    for (s, phi) in psi_x.axis_iter(Axis(0)).enumerate() {
        // partial[k*dy + l, n] = Σ_m ρ[(k,l),(m,n)] φ_m
        let mut partial = Array2::<Complex64>::zeros((d, dim_y));
        for row in 0..d {
            for (m, &phi_m) in phi.iter().enumerate() {
                for col in 0..dim_y {
                    partial[[row, col]] += rho[[row, m * dim_y + col]] * phi_m;
                }
            }
        }
        let mut block = out.index_axis_mut(Axis(0), s);
        for (k, &phi_k) in phi.iter().enumerate() {
            let weight = phi_k.conj();
            for l in 0..dim_y {
                for col in 0..dim_y {
                    block[[l, col]] += weight * partial[[k * dim_y + l, col]];
                }
            }
        }
    }
    normalize_blocks(&mut out);
    Ok(out)
}

/// Output-subsystem operators for an eigen-form joint density matrix,
/// `ρ_y = Σ_i λ_i u_i u_i*` with `u_i[l] = Σ_k conj(ψ_k) V[(k,l), i]`.
pub fn measure_joint_eig(
    density: &EigenDensity,
    psi_x: ArrayView2<'_, Complex64>,
    dim_y: usize,
) -> Result<Array3<Complex64>> {
    check_joint_dims(density, psi_x.ncols(), dim_y)?;
    let n = psi_x.nrows();
    let mut out = Array3::zeros((n, dim_y, dim_y));
    for (s, phi) in psi_x.axis_iter(Axis(0)).enumerate() {
        let u = reduced_eigenvectors(density, phi, dim_y);
        let mut block = out.index_axis_mut(Axis(0), s);
        for (i, &lambda) in density.eig_val().iter().enumerate() {
            for l in 0..dim_y {
                for col in 0..dim_y {
                    block[[l, col]] += u[[l, i]] * u[[col, i]].conj() * lambda;
                }
            }
        }
    }
    normalize_blocks(&mut out);
    Ok(out)
}

/// Categorical cross-entropy between `target` and the diagonal of the
/// eigen-form output operator for one input state, with its gradient.
pub fn joint_eig_cross_entropy(
    density: &EigenDensity,
    phi: ArrayView1<'_, Complex64>,
    dim_y: usize,
    target: ArrayView1<'_, f64>,
) -> Result<(f64, EigenGradient)> {
    check_joint_dims(density, phi.len(), dim_y)?;
    if target.len() != dim_y {
        return Err(QMeasureError::dimension_mismatch(dim_y, target.len()));
    }
    let u = reduced_eigenvectors(density, phi, dim_y);
    let lambdas = density.eig_val();

    let q: Array1<f64> = (0..dim_y)
        .map(|l| {
            lambdas
                .iter()
                .enumerate()
                .map(|(i, &lambda)| lambda * u[[l, i]].norm_sqr())
                .sum::<f64>()
                .max(PROB_EPS)
        })
        .collect();
    let z = q.sum();
    let t_total = target.sum();

    let loss = target
        .iter()
        .zip(q.iter())
        .map(|(&t, &q_l)| -t * (q_l / z).ln())
        .sum::<f64>();

    // ∂L/∂q_l
    let g: Array1<f64> = target
        .iter()
        .zip(q.iter())
        .map(|(&t, &q_l)| -t / q_l + t_total / z)
        .collect();

    let mut grad = EigenGradient::zeros(density.dim(), density.num_eig());
    for (i, &lambda) in lambdas.iter().enumerate() {
        grad.eig_val[i] = (0..dim_y).map(|l| g[l] * u[[l, i]].norm_sqr()).sum();
        for (k, &phi_k) in phi.iter().enumerate() {
            for l in 0..dim_y {
                grad.eig_vec[[k * dim_y + l, i]] = u[[l, i]] * phi_k * (2.0 * g[l] * lambda);
            }
        }
    }
    Ok((loss, grad))
}

/// `U[l, i] = Σ_k conj(φ_k) V[(k,l), i]`.
fn reduced_eigenvectors(
    density: &EigenDensity,
    phi: ArrayView1<'_, Complex64>,
    dim_y: usize,
) -> Array2<Complex64> {
    let vecs = density.eig_vec();
    let mut u = Array2::zeros((dim_y, density.num_eig()));
    for (k, &phi_k) in phi.iter().enumerate() {
        let weight = phi_k.conj();
        for l in 0..dim_y {
            for i in 0..density.num_eig() {
                u[[l, i]] += weight * vecs[[k * dim_y + l, i]];
            }
        }
    }
    u
}

fn check_joint_dims(density: &EigenDensity, dim_x: usize, dim_y: usize) -> Result<()> {
    if dim_y == 0 {
        return Err(QMeasureError::invalid_parameter("dim_y", "must be at least 1"));
    }
    if density.dim() != dim_x * dim_y {
        return Err(QMeasureError::dimension_mismatch(density.dim(), dim_x * dim_y));
    }
    Ok(())
}

fn normalize_blocks(blocks: &mut Array3<Complex64>) {
    for mut block in blocks.axis_iter_mut(Axis(0)) {
        let trace: f64 = block.diag().iter().map(|z| z.re).sum();
        if trace > PROB_EPS {
            block.mapv_inplace(|z| z / trace);
        }
    }
}
