//! Model composition: a feature map, one or more density-matrix estimators
//! and a decoder.
//!
//! | Model                 | Estimator              | Output                       |
//! |-----------------------|------------------------|------------------------------|
//! | [`QMClassifier`]      | joint, accumulated     | class distribution           |
//! | [`QMClassifierSgd`]   | joint, eigen form      | class distribution           |
//! | [`QMRegressor`]       | joint, accumulated     | mean and variance            |
//! | [`QMRegressorSgd`]    | joint, eigen form      | mean and variance            |
//! | [`QMDensity`]         | input, accumulated     | Born probability             |
//! | [`QMDensitySgd`]      | input, eigen form      | Born probability             |
//! | [`DmkdClassifier`]    | one per class          | Bayes posterior              |
//! | [`DmkdClassifierSgd`] | one per class, eigen   | Bayes posterior              |
//! | [`DmkdRegressor`]     | marginal and weighted  | kernel regression estimate   |
//! | [`DmkdRegressorSgd`]  | two-output joint eigen | value in `[y_min, y_max]`    |

mod joint;

pub mod classifier;
pub mod density;
pub mod kdc;
pub mod regressor;

pub use classifier::{QMClassifier, QMClassifierSgd};
pub use density::{QMDensity, QMDensitySgd};
pub use kdc::{DmkdClassifier, DmkdClassifierSgd};
pub use regressor::{DmkdRegressor, DmkdRegressorSgd, QMRegressor, QMRegressorSgd};
