//! Batch-accumulation density-matrix estimator.
//!
//! The estimator keeps an unnormalized weight tensor `W = Σ_n ψ_n ψ_n*` and the
//! number of samples `N` that contributed to it. Accumulation is plain
//! addition, so the order in which batches arrive never changes the result.
//! Once every batch of a training run has been seen, [`DensityAccumulator::finalize`]
//! divides `W` by `N` exactly once, turning it into a trace-one density matrix.
//!
//! # Lifecycle
//!
//! ```text
//! new(dim) ──accumulate*──▶ Accumulating ──finalize──▶ Finalized
//!     ▲                                                    │
//!     └──────────────────────── reset ◀────────────────────┘
//! ```
//!
//! Finalizing twice, or accumulating into a finalized estimator, is an error:
//! each training run must start from a fresh or reset accumulator.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use num_complex::Complex64;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cross::{outer_sum, weighted_outer_sum};
use crate::error::{QMeasureError, Result};
use crate::measure::born_probabilities;

/// Lifecycle state of an accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccumulatorState {
    /// Collecting batch contributions; `W` is not trace-normalized.
    Accumulating,
    /// `W` has been divided by the sample count.
    Finalized,
}

/// Running, unnormalized density-matrix estimate.
#[derive(Debug, Clone)]
pub struct DensityAccumulator {
    dim: usize,
    weights: Array2<Complex64>,
    n_samples: usize,
    state: AccumulatorState,
}

impl DensityAccumulator {
    /// Create a zero-initialized accumulator over a `dim`-dimensional space.
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(QMeasureError::invalid_parameter("dim", "must be at least 1"));
        }
        Ok(Self {
            dim,
            weights: Array2::zeros((dim, dim)),
            n_samples: 0,
            state: AccumulatorState::Accumulating,
        })
    }

    /// Wrap an already normalized density matrix, e.g. one restored from a
    /// checkpoint.
    pub fn from_rho(rho: Array2<Complex64>) -> Result<Self> {
        let (rows, cols) = rho.dim();
        if rows != cols || rows == 0 {
            return Err(QMeasureError::shape_mismatch(&[rows, rows], &[rows, cols]));
        }
        Ok(Self {
            dim: rows,
            weights: rho,
            n_samples: 0,
            state: AccumulatorState::Finalized,
        })
    }

    /// Dimension of the underlying space.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of samples accumulated in the current run.
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// Whether `finalize` has run since the last reset.
    pub fn is_finalized(&self) -> bool {
        self.state == AccumulatorState::Finalized
    }

    /// The weight tensor: unnormalized while accumulating, `ρ` once finalized.
    pub fn weights(&self) -> &Array2<Complex64> {
        &self.weights
    }

    /// Add `Σ_n ψ_n ψ_n*` for a batch of states and count its rows.
    ///
    /// A batch without feature columns is skipped with a warning.
    pub fn accumulate(&mut self, psi: ArrayView2<'_, Complex64>) -> Result<usize> {
        if !self.check_batch(&psi)? {
            return Ok(0);
        }
        self.weights += &outer_sum(psi);
        self.n_samples += psi.nrows();
        debug!(batch = psi.nrows(), total = self.n_samples, "accumulated density batch");
        Ok(psi.nrows())
    }

    /// Add `Σ_n w_n ψ_n ψ_n*`, counting every row of the batch.
    pub fn accumulate_weighted(
        &mut self,
        psi: ArrayView2<'_, Complex64>,
        sample_weights: ArrayView1<'_, f64>,
    ) -> Result<usize> {
        if !self.check_batch(&psi)? {
            return Ok(0);
        }
        self.weights += &weighted_outer_sum(psi, sample_weights)?;
        self.n_samples += psi.nrows();
        Ok(psi.nrows())
    }

    /// Add a precomputed contribution that summarizes `count` samples.
    pub fn add_contribution(
        &mut self,
        contribution: &Array2<Complex64>,
        count: usize,
    ) -> Result<()> {
        self.ensure_accumulating()?;
        if contribution.dim() != (self.dim, self.dim) {
            return Err(QMeasureError::shape_mismatch(
                &[self.dim, self.dim],
                contribution.shape(),
            ));
        }
        self.weights += contribution;
        self.n_samples += count;
        Ok(())
    }

    /// Divide `W` by the sample count, once per training run.
    pub fn finalize(&mut self) -> Result<()> {
        self.ensure_accumulating()?;
        if self.n_samples == 0 {
            return Err(QMeasureError::NoSamples);
        }
        let n = self.n_samples as f64;
        self.weights.mapv_inplace(|z| z / n);
        self.state = AccumulatorState::Finalized;
        Ok(())
    }

    /// Zero the weights and the sample counter for a new training run.
    pub fn reset(&mut self) {
        self.weights.fill(Complex64::new(0.0, 0.0));
        self.n_samples = 0;
        self.state = AccumulatorState::Accumulating;
    }

    /// Born-rule values `ψ* W ψ` for a batch of states.
    ///
    /// Before `finalize` this measures the unnormalized weights; on a fresh
    /// accumulator every value is zero.
    pub fn probabilities(&self, psi: ArrayView2<'_, Complex64>) -> Result<Array1<f64>> {
        born_probabilities(&self.weights, psi)
    }

    fn ensure_accumulating(&self) -> Result<()> {
        match self.state {
            AccumulatorState::Accumulating => Ok(()),
            AccumulatorState::Finalized => Err(QMeasureError::AlreadyFinalized),
        }
    }

    /// Returns `false` when the batch must be skipped.
    fn check_batch(&self, psi: &ArrayView2<'_, Complex64>) -> Result<bool> {
        self.ensure_accumulating()?;
        if psi.ncols() == 0 {
            warn!(rows = psi.nrows(), "skipping batch with unknown feature dimension");
            return Ok(false);
        }
        if psi.ncols() != self.dim {
            return Err(QMeasureError::dimension_mismatch(self.dim, psi.ncols()));
        }
        Ok(psi.nrows() > 0)
    }
}

/// Thread-safe accumulator for concurrent data loaders.
///
/// The write lock covers the weight update and the sample-count increment
/// together, so concurrent batches never interleave between the two.
pub struct SharedAccumulator(Arc<RwLock<DensityAccumulator>>);

impl SharedAccumulator {
    /// Create a new shared accumulator.
    pub fn new(dim: usize) -> Result<Self> {
        Ok(Self(Arc::new(RwLock::new(DensityAccumulator::new(dim)?))))
    }

    /// Accumulate a batch.
    pub fn accumulate(&self, psi: ArrayView2<'_, Complex64>) -> Result<usize> {
        self.0.write().accumulate(psi)
    }

    /// Finalize the estimate.
    pub fn finalize(&self) -> Result<()> {
        self.0.write().finalize()
    }

    /// Reset for a new run.
    pub fn reset(&self) {
        self.0.write().reset()
    }

    /// Number of samples seen so far.
    pub fn n_samples(&self) -> usize {
        self.0.read().n_samples()
    }

    /// Copy of the current accumulator.
    pub fn snapshot(&self) -> DensityAccumulator {
        self.0.read().clone()
    }

    /// Clone the Arc for sharing.
    pub fn clone_arc(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl Clone for SharedAccumulator {
    fn clone(&self) -> Self {
        self.clone_arc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, s};

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn states() -> Array2<Complex64> {
        let h = std::f64::consts::FRAC_1_SQRT_2;
        array![
            [c(1.0, 0.0), c(0.0, 0.0)],
            [c(h, 0.0), c(0.0, h)],
            [c(0.0, 0.0), c(1.0, 0.0)],
        ]
    }

    #[test]
    fn test_finalize_produces_trace_one() {
        let mut acc = DensityAccumulator::new(2).unwrap();
        assert_eq!(acc.accumulate(states().view()).unwrap(), 3);
        assert_eq!(acc.n_samples(), 3);
        assert!(!acc.is_finalized());

        acc.finalize().unwrap();
        let trace: Complex64 = acc.weights().diag().sum();
        assert_abs_diff_eq!(trace.re, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(trace.im, 0.0, epsilon = 1e-12);
        assert_eq!(acc.state(), AccumulatorState::Finalized);
    }

    #[test]
    fn test_finalize_without_samples_fails() {
        let mut acc = DensityAccumulator::new(3).unwrap();
        assert!(matches!(acc.finalize(), Err(QMeasureError::NoSamples)));
    }

    #[test]
    fn test_double_finalize_guarded() {
        let mut acc = DensityAccumulator::new(2).unwrap();
        acc.accumulate(states().view()).unwrap();
        acc.finalize().unwrap();

        assert!(matches!(acc.finalize(), Err(QMeasureError::AlreadyFinalized)));
        assert!(matches!(
            acc.accumulate(states().view()),
            Err(QMeasureError::AlreadyFinalized)
        ));

        acc.reset();
        assert_eq!(acc.n_samples(), 0);
        acc.accumulate(states().slice(s![..1, ..])).unwrap();
        acc.finalize().unwrap();
        assert_abs_diff_eq!(acc.weights()[[0, 0]].re, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_batch_order_independent() {
        let all = states();
        let mut forward = DensityAccumulator::new(2).unwrap();
        forward.accumulate(all.slice(s![..2, ..])).unwrap();
        forward.accumulate(all.slice(s![2.., ..])).unwrap();

        let mut backward = DensityAccumulator::new(2).unwrap();
        backward.accumulate(all.slice(s![2.., ..])).unwrap();
        backward.accumulate(all.slice(s![..2, ..])).unwrap();

        for (a, b) in forward.weights().iter().zip(backward.weights().iter()) {
            assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_degenerate_batch_skipped() {
        let mut acc = DensityAccumulator::new(2).unwrap();
        let empty = Array2::<Complex64>::zeros((4, 0));
        assert_eq!(acc.accumulate(empty.view()).unwrap(), 0);
        assert_eq!(acc.n_samples(), 0);

        let wrong = Array2::<Complex64>::zeros((1, 3));
        assert!(matches!(
            acc.accumulate(wrong.view()),
            Err(QMeasureError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_probabilities_before_fit_are_zero() {
        let acc = DensityAccumulator::new(2).unwrap();
        let p = acc.probabilities(states().view()).unwrap();
        assert!(p.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_born_probability_after_fit() {
        let mut acc = DensityAccumulator::new(2).unwrap();
        acc.accumulate(array![[c(1.0, 0.0), c(0.0, 0.0)]].view()).unwrap();
        acc.finalize().unwrap();

        let p = acc.probabilities(states().view()).unwrap();
        assert_abs_diff_eq!(p[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p[1], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(p[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_weighted_and_contribution() {
        let mut acc = DensityAccumulator::new(2).unwrap();
        acc.accumulate_weighted(states().view(), array![2.0, 0.0, 0.0].view())
            .unwrap();
        assert_eq!(acc.n_samples(), 3);
        assert_abs_diff_eq!(acc.weights()[[0, 0]].re, 2.0, epsilon = 1e-12);

        let bad = Array2::<Complex64>::zeros((3, 3));
        assert!(acc.add_contribution(&bad, 1).is_err());
    }

    #[test]
    fn test_from_rho_is_finalized() {
        let rho = Array2::from_diag(&array![c(0.5, 0.0), c(0.5, 0.0)]);
        let acc = DensityAccumulator::from_rho(rho).unwrap();
        assert!(acc.is_finalized());
        assert!(DensityAccumulator::from_rho(Array2::zeros((2, 3))).is_err());
    }

    #[test]
    fn test_shared_accumulator_concurrent() {
        let shared = SharedAccumulator::new(2).unwrap();
        let batch = states();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let handle = shared.clone();
                let batch = batch.view();
                scope.spawn(move || {
                    for _ in 0..10 {
                        handle.accumulate(batch).unwrap();
                    }
                });
            }
        });

        assert_eq!(shared.n_samples(), 4 * 10 * 3);
        shared.finalize().unwrap();
        let snapshot = shared.snapshot();
        let trace: Complex64 = snapshot.weights().diag().sum();
        assert_abs_diff_eq!(trace.re, 1.0, epsilon = 1e-9);
    }
}
