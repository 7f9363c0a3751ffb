//! Explicit training-loop functions.
//!
//! Two ways to train a model:
//!
//! 1. **Accumulation** ([`AccumulatingModel`]): every mini-batch adds its
//!    density-matrix contribution, then the estimate is normalized exactly
//!    once. [`fit_accumulating`] scopes this to one run: reset, accumulate all
//!    batches, finalize.
//! 2. **Gradient descent** ([`GradientModel`]): [`SgdTrainer::step`] computes the
//!    loss gradient for a batch, applies a plain SGD update to every eigen
//!    component and projects each component back to a valid density matrix.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info, warn};

use crate::eigen::{EigenDensity, EigenGradient};
use crate::error::{QMeasureError, Result};
use crate::feature_map::OneHotFeatureMap;

/// A model trained by density-matrix accumulation.
pub trait AccumulatingModel {
    /// Clear all accumulated state for a new training run.
    fn reset(&mut self);

    /// Add the contribution of one mini-batch. Returns the number of samples
    /// accumulated (zero when the batch is skipped).
    fn accumulate_batch(&mut self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<usize>;

    /// Normalize every estimator, once per run.
    fn finalize(&mut self) -> Result<()>;
}

/// A model trained by gradient descent over eigen-form density matrices.
pub trait GradientModel {
    /// Mean loss over the batch and one gradient per eigen component, in the
    /// order of [`GradientModel::eigen_components_mut`].
    fn loss_and_gradients(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<(f64, Vec<EigenGradient>)>;

    /// Mutable access to every trainable eigen component.
    fn eigen_components_mut(&mut self) -> Vec<&mut EigenDensity>;
}

/// Summary of an accumulation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// Number of mini-batches processed.
    pub n_batches: usize,
    /// Number of samples accumulated.
    pub n_samples: usize,
}

/// Row ranges of consecutive mini-batches.
pub fn batch_ranges(n: usize, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
    let step = batch_size.max(1);
    (0..n).step_by(step).map(move |start| start..(start + step).min(n))
}

/// Whether a batch has no feature columns and must be skipped.
pub(crate) fn is_degenerate(x: &ArrayView2<'_, f64>) -> bool {
    if x.ncols() == 0 {
        warn!(rows = x.nrows(), "skipping batch with unknown feature dimension");
        return true;
    }
    false
}

fn check_targets(x: &ArrayView2<'_, f64>, y: &ArrayView2<'_, f64>) -> Result<()> {
    if y.nrows() != x.nrows() {
        return Err(QMeasureError::dimension_mismatch(x.nrows(), y.nrows()));
    }
    Ok(())
}

/// Run one complete accumulation pass: reset, accumulate every mini-batch,
/// finalize once.
pub fn fit_accumulating<M: AccumulatingModel + ?Sized>(
    model: &mut M,
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    batch_size: usize,
) -> Result<FitReport> {
    if batch_size == 0 {
        return Err(QMeasureError::invalid_parameter("batch_size", "must be at least 1"));
    }
    check_targets(&x, &y)?;

    model.reset();
    let mut report = FitReport::default();
    for range in batch_ranges(x.nrows(), batch_size) {
        let xb = x.slice(ndarray::s![range.clone(), ..]);
        let yb = y.slice(ndarray::s![range, ..]);
        report.n_samples += model.accumulate_batch(xb, yb)?;
        report.n_batches += 1;
    }
    model.finalize()?;

    info!(
        batches = report.n_batches,
        samples = report.n_samples,
        "density matrix fit finalized"
    );
    Ok(report)
}

/// One-hot target distributions for integer labels.
pub fn one_hot_targets(labels: ArrayView1<'_, f64>, num_classes: usize) -> Result<Array2<f64>> {
    let encoder = OneHotFeatureMap::new(num_classes)?;
    let mut out = Array2::zeros((labels.len(), num_classes));
    for (i, &label) in labels.iter().enumerate() {
        out[[i, encoder.class_index(label)?]] = 1.0;
    }
    Ok(out)
}

/// Gradient-descent hyper-parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SgdConfig {
    /// Step size.
    pub learning_rate: f64,
    /// Number of passes over the data.
    pub epochs: usize,
    /// Mini-batch size.
    pub batch_size: usize,
    /// Shuffle samples at the start of every epoch.
    pub shuffle: bool,
    /// Seed for shuffling.
    pub random_state: Option<u64>,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            epochs: 10,
            batch_size: 16,
            shuffle: true,
            random_state: None,
        }
    }
}

impl SgdConfig {
    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            return Err(QMeasureError::invalid_parameter(
                "learning_rate",
                "must be positive and finite",
            ));
        }
        if self.epochs == 0 {
            return Err(QMeasureError::invalid_parameter("epochs", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(QMeasureError::invalid_parameter("batch_size", "must be at least 1"));
        }
        Ok(())
    }
}

/// Per-epoch results of a gradient-descent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Sample-weighted mean loss of each epoch.
    pub epoch_losses: Vec<f64>,
    /// Number of optimizer steps taken.
    pub steps: usize,
}

impl TrainingReport {
    /// Loss of the first epoch.
    pub fn initial_loss(&self) -> Option<f64> {
        self.epoch_losses.first().copied()
    }

    /// Loss of the last epoch.
    pub fn final_loss(&self) -> Option<f64> {
        self.epoch_losses.last().copied()
    }
}

/// Projected stochastic gradient descent.
#[derive(Debug, Clone)]
pub struct SgdTrainer {
    config: SgdConfig,
}

impl SgdTrainer {
    /// Create a trainer.
    pub fn new(config: SgdConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Get the configuration.
    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    /// Gradient step followed by projection of every eigen component.
    /// Returns the batch loss measured before the update.
    pub fn step<M: GradientModel + ?Sized>(
        &self,
        model: &mut M,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<f64> {
        let (loss, grads) = model.loss_and_gradients(x, y)?;
        if !loss.is_finite() {
            return Err(QMeasureError::numerical(format!("non-finite loss {loss}")));
        }

        let components = model.eigen_components_mut();
        if components.len() != grads.len() {
            return Err(QMeasureError::dimension_mismatch(components.len(), grads.len()));
        }
        for (component, grad) in components.into_iter().zip(grads.iter()) {
            component.apply_gradient(grad, self.config.learning_rate)?;
            component.project();
        }
        Ok(loss)
    }

    /// Train for the configured number of epochs.
    pub fn fit<M: GradientModel + ?Sized>(
        &self,
        model: &mut M,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<TrainingReport> {
        check_targets(&x, &y)?;
        let n = x.nrows();
        if n == 0 {
            return Err(QMeasureError::NoSamples);
        }

        let mut rng = match self.config.random_state {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_entropy(),
        };
        let mut order: Vec<usize> = (0..n).collect();
        let mut report = TrainingReport::default();

        for epoch in 0..self.config.epochs {
            if self.config.shuffle {
                order.shuffle(&mut rng);
            }
            let mut total = 0.0;
            for range in batch_ranges(n, self.config.batch_size) {
                let rows = &order[range];
                let xb = x.select(Axis(0), rows);
                let yb = y.select(Axis(0), rows);
                total += self.step(model, xb.view(), yb.view())? * rows.len() as f64;
                report.steps += 1;
            }
            let epoch_loss = total / n as f64;
            debug!(epoch, loss = epoch_loss, "sgd epoch complete");
            report.epoch_losses.push(epoch_loss);
        }

        info!(
            epochs = self.config.epochs,
            steps = report.steps,
            final_loss = report.final_loss().unwrap_or(f64::NAN),
            "sgd training complete"
        );
        Ok(report)
    }
}
