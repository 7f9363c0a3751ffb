//! # Ruvector QMeasure
//!
//! Quantum-measurement density-matrix models for classification, density
//! estimation and regression.
//!
//! Inputs are encoded as state vectors `|ψ(x)>` by a [`FeatureMap`]. A density
//! matrix `ρ` summarizes the training states and predictions are quantum
//! measurements of `ρ`:
//!
//! - **Density estimation**: the Born rule `p(x) = ψ(x)* ρ ψ(x)`.
//! - **Classification / regression**: `ρ` lives on the joint input ⊗ output
//!   space. Measuring the input subsystem with `ψ(x)` leaves an output operator
//!   whose diagonal is a distribution over classes or over discretized target
//!   values.
//! - **Multi-class kernel density**: one `ρ` per class combined with Bayes' rule.
//!
//! ## Training
//!
//! - **Accumulation**: `ρ = Σ_n ψ_n ψ_n* / N`, collected batch by batch and
//!   normalized once per run ([`DensityAccumulator`], [`fit_accumulating`]).
//! - **Gradient descent**: `ρ = V diag(λ) V*` with `k` eigenpairs
//!   ([`EigenDensity`]), updated by [`SgdTrainer`] and projected back onto
//!   valid density matrices after every step. [`EigenDensity::set_rho`] seeds
//!   the eigen form from an accumulated estimate.
//!
//! ## Quick Start
//!
//! ```rust
//! use ndarray::array;
//! use ruvector_qmeasure::{DmkdClassifier, RffConfig, RffFeatureMap};
//!
//! # fn main() -> ruvector_qmeasure::Result<()> {
//! let fm = RffFeatureMap::new(RffConfig {
//!     input_dim: 1,
//!     dim: 32,
//!     gamma: 1.0,
//!     random_state: Some(7),
//! })?;
//! let mut model = DmkdClassifier::new(fm, 32, 2)?;
//!
//! let x = array![[-2.0], [-1.5], [1.5], [2.0]];
//! let y = array![[0.0], [0.0], [1.0], [1.0]];
//! model.fit(x.view(), y.view(), 2)?;
//!
//! let posteriors = model.predict(array![[-1.8], [1.8]].view())?;
//! assert!(posteriors[[0, 0]] > 0.5);
//! assert!(posteriors[[1, 1]] > 0.5);
//! # Ok(())
//! # }
//! ```
//!
//! ## References
//!
//! - González, F. A., et al. (2021). "Classification with Quantum Measurement Models"
//! - González, F. A., et al. (2022). "Learning with Density Matrices and Random Features"
//! - Rahimi, A., & Recht, B. (2007). "Random Features for Large-Scale Kernel Machines"

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod accumulator;
pub mod config;
pub mod cross;
pub mod decode;
pub mod eigen;
pub mod error;
pub mod feature_map;
pub mod measure;
pub mod models;
pub mod train;

// Re-exports for convenience
pub use accumulator::{AccumulatorState, DensityAccumulator, SharedAccumulator};
pub use config::{
    BoundedRegressorConfig, DensityConfig, JointConfig, KdcConfig, ModelConfig, SgdDensityConfig,
    SgdJointConfig, SgdKdcConfig,
};
pub use cross::{cross_product, joint_states, outer_sum, weighted_outer_sum};
pub use decode::{dm_to_dist, DensityMatrixRegression};
pub use eigen::{EigenConfig, EigenDensity, EigenGradient};
pub use error::{QMeasureError, Result};
pub use feature_map::{
    build_rff, ComplexRffFeatureMap, FeatureMap, FeatureMapKind, OneHotFeatureMap, RffConfig,
    RffFeatureMap,
};
pub use measure::{born_probabilities, measure_joint, measure_joint_eig, PROB_EPS};
pub use models::{
    DmkdClassifier, DmkdClassifierSgd, DmkdRegressor, DmkdRegressorSgd, QMClassifier,
    QMClassifierSgd, QMDensity, QMDensitySgd, QMRegressor, QMRegressorSgd,
};
pub use train::{
    fit_accumulating, one_hot_targets, AccumulatingModel, FitReport, GradientModel, SgdConfig,
    SgdTrainer, TrainingReport,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    //! Convenient imports for common use cases.
    pub use crate::accumulator::DensityAccumulator;
    pub use crate::config::ModelConfig;
    pub use crate::eigen::EigenDensity;
    pub use crate::error::{QMeasureError, Result};
    pub use crate::feature_map::{
        FeatureMap, FeatureMapKind, OneHotFeatureMap, RffConfig, RffFeatureMap,
    };
    pub use crate::models::*;
    pub use crate::train::{AccumulatingModel, GradientModel, SgdConfig, SgdTrainer};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
