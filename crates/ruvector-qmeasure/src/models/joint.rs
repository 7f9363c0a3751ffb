//! Joint input/output estimators shared by the classifiers and regressors.

use ndarray::{Array2, Array3, ArrayView2, Axis};
use num_complex::Complex64;

use crate::accumulator::DensityAccumulator;
use crate::config::{JointConfig, ModelConfig, SgdJointConfig};
use crate::cross::joint_states;
use crate::eigen::{EigenConfig, EigenDensity, EigenGradient};
use crate::error::{QMeasureError, Result};
use crate::feature_map::{build_rff, FeatureMap};
use crate::measure::{joint_eig_cross_entropy, measure_joint, measure_joint_eig};
use crate::train::is_degenerate;

fn check_feature_dim(name: &str, expected: usize, fm: &dyn FeatureMap) -> Result<()> {
    if fm.dim() != expected {
        return Err(QMeasureError::invalid_parameter(
            name,
            format!("feature map produces {} components, expected {}", fm.dim(), expected),
        ));
    }
    Ok(())
}

/// Accumulated density matrix over `dim_x * dim_y`.
#[derive(Debug, Clone)]
pub(crate) struct JointEstimator<Fx, Fy> {
    pub(crate) fm_x: Fx,
    pub(crate) fm_y: Fy,
    pub(crate) config: JointConfig,
    pub(crate) accumulator: DensityAccumulator,
}

impl<Fx: FeatureMap, Fy: FeatureMap> JointEstimator<Fx, Fy> {
    pub(crate) fn new(fm_x: Fx, fm_y: Fy, config: JointConfig) -> Result<Self> {
        config.validate()?;
        check_feature_dim("dim_x", config.dim_x, &fm_x)?;
        check_feature_dim("dim_y", config.dim_y, &fm_y)?;
        let accumulator = DensityAccumulator::new(config.dim_x * config.dim_y)?;
        Ok(Self {
            fm_x,
            fm_y,
            config,
            accumulator,
        })
    }

    pub(crate) fn measure(&self, x: ArrayView2<'_, f64>) -> Result<Array3<Complex64>> {
        let psi_x = self.fm_x.map(x)?;
        measure_joint(self.accumulator.weights(), psi_x.view(), self.config.dim_y)
    }

    pub(crate) fn accumulate(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<usize> {
        if is_degenerate(&x) {
            return Ok(0);
        }
        let psi_x = self.fm_x.map(x)?;
        let psi_y = self.fm_y.map(y)?;
        let psi = joint_states(psi_x.view(), psi_y.view())?;
        self.accumulator.accumulate(psi.view())
    }
}

/// Eigen-form density matrix over `dim_x * dim_y` with its own random features.
pub(crate) struct EigenJoint {
    pub(crate) fm_x: Box<dyn FeatureMap>,
    pub(crate) config: SgdJointConfig,
    pub(crate) density: EigenDensity,
}

impl EigenJoint {
    pub(crate) fn new(config: SgdJointConfig) -> Result<Self> {
        config.validate()?;
        let fm_x = build_rff(config.feature_map, config.rff())?;
        let density = EigenDensity::new(EigenConfig {
            dim: config.dim_x * config.dim_y,
            num_eig: config.num_eig,
            random_state: config.random_state,
        })?;
        Ok(Self {
            fm_x,
            config,
            density,
        })
    }

    pub(crate) fn measure(&self, x: ArrayView2<'_, f64>) -> Result<Array3<Complex64>> {
        let psi_x = self.fm_x.map(x)?;
        measure_joint_eig(&self.density, psi_x.view(), self.config.dim_y)
    }

    /// Mean cross-entropy against target distributions `(n, dim_y)`.
    pub(crate) fn cross_entropy(
        &self,
        x: ArrayView2<'_, f64>,
        targets: ArrayView2<'_, f64>,
    ) -> Result<(f64, EigenGradient)> {
        if targets.dim() != (x.nrows(), self.config.dim_y) {
            return Err(QMeasureError::shape_mismatch(
                &[x.nrows(), self.config.dim_y],
                targets.shape(),
            ));
        }
        let n = x.nrows();
        if n == 0 {
            return Err(QMeasureError::NoSamples);
        }
        let psi_x = self.fm_x.map(x)?;
        let mut total = EigenGradient::zeros(self.density.dim(), self.density.num_eig());
        let mut loss = 0.0;
        for (phi, target) in psi_x.axis_iter(Axis(0)).zip(targets.axis_iter(Axis(0))) {
            let (l, grad) = joint_eig_cross_entropy(&self.density, phi, self.config.dim_y, target)?;
            loss += l;
            total.scaled_add(1.0, &grad);
        }
        total.scale(1.0 / n as f64);
        Ok((loss / n as f64, total))
    }

    pub(crate) fn set_rho(&mut self, rho: &Array2<Complex64>) -> Result<()> {
        self.density.set_rho(rho)
    }
}
