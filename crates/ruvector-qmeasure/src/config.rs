//! Model configuration.
//!
//! A model configuration is the flat set of scalar parameters needed to
//! rebuild an untrained model. It is exchanged as a flat JSON object
//! (parameter name → scalar). Trained weights are not part of it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{QMeasureError, Result};
use crate::feature_map::{FeatureMapKind, RffConfig};

/// Common behaviour of model configurations.
pub trait ModelConfig: Serialize + DeserializeOwned + Clone {
    /// Validate the configuration parameters.
    fn validate(&self) -> Result<()>;

    /// Flat parameter map.
    fn to_map(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(QMeasureError::ConfigError(format!(
                "expected a flat object, got {other}"
            ))),
            Err(e) => Err(QMeasureError::ConfigError(e.to_string())),
        }
    }

    /// Rebuild from a flat parameter map, validating the result.
    fn from_map(map: Map<String, Value>) -> Result<Self> {
        let config: Self = serde_json::from_value(Value::Object(map))
            .map_err(|e| QMeasureError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

fn positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(QMeasureError::invalid_parameter(name, "must be at least 1"));
    }
    Ok(())
}

fn num_eig_within(num_eig: usize, dim: usize) -> Result<()> {
    if num_eig > dim {
        return Err(QMeasureError::invalid_parameter(
            "num_eig",
            format!("must not exceed {dim}"),
        ));
    }
    Ok(())
}

/// Joint input/output estimator dimensions (batch classifier and regressor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointConfig {
    /// Dimension of the input feature map.
    pub dim_x: usize,
    /// Dimension of the output representation.
    pub dim_y: usize,
}

impl ModelConfig for JointConfig {
    fn validate(&self) -> Result<()> {
        positive("dim_x", self.dim_x)?;
        positive("dim_y", self.dim_y)
    }
}

/// Density estimator dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityConfig {
    /// Dimension of the input feature map.
    pub dim_x: usize,
}

impl ModelConfig for DensityConfig {
    fn validate(&self) -> Result<()> {
        positive("dim_x", self.dim_x)
    }
}

/// Multi-class kernel density classifier dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KdcConfig {
    /// Dimension of the input feature map.
    pub dim_x: usize,
    /// Number of classes.
    pub num_classes: usize,
}

impl Default for KdcConfig {
    fn default() -> Self {
        Self {
            dim_x: 64,
            num_classes: 2,
        }
    }
}

impl ModelConfig for KdcConfig {
    fn validate(&self) -> Result<()> {
        positive("dim_x", self.dim_x)?;
        if self.num_classes < 2 {
            return Err(QMeasureError::invalid_parameter("num_classes", "must be at least 2"));
        }
        Ok(())
    }
}

/// Gradient-descent joint model (classifier or regressor) parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdJointConfig {
    /// Dimension of the raw input.
    pub input_dim: usize,
    /// Dimension of the input feature map.
    pub dim_x: usize,
    /// Dimension of the output representation.
    pub dim_y: usize,
    /// Number of eigenpairs; `0` means `dim_x * dim_y`.
    pub num_eig: usize,
    /// Gamma of the RBF kernel approximated by the feature map.
    pub gamma: f64,
    /// Random seed.
    pub random_state: Option<u64>,
    /// Real or complex random features.
    pub feature_map: FeatureMapKind,
}

impl Default for SgdJointConfig {
    fn default() -> Self {
        Self {
            input_dim: 2,
            dim_x: 32,
            dim_y: 2,
            num_eig: 0,
            gamma: 1.0,
            random_state: None,
            feature_map: FeatureMapKind::Real,
        }
    }
}

impl SgdJointConfig {
    /// Feature map configuration derived from these parameters.
    pub fn rff(&self) -> RffConfig {
        RffConfig {
            input_dim: self.input_dim,
            dim: self.dim_x,
            gamma: self.gamma,
            random_state: self.random_state,
        }
    }
}

impl ModelConfig for SgdJointConfig {
    fn validate(&self) -> Result<()> {
        positive("dim_y", self.dim_y)?;
        self.rff().validate()?;
        num_eig_within(self.num_eig, self.dim_x * self.dim_y)
    }
}

/// Gradient-descent density estimator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdDensityConfig {
    /// Dimension of the raw input.
    pub input_dim: usize,
    /// Dimension of the input feature map.
    pub dim_x: usize,
    /// Number of eigenpairs; `0` means `dim_x`.
    pub num_eig: usize,
    /// Gamma of the RBF kernel approximated by the feature map.
    pub gamma: f64,
    /// Random seed.
    pub random_state: Option<u64>,
    /// Real or complex random features.
    pub feature_map: FeatureMapKind,
}

impl Default for SgdDensityConfig {
    fn default() -> Self {
        Self {
            input_dim: 2,
            dim_x: 32,
            num_eig: 0,
            gamma: 1.0,
            random_state: None,
            feature_map: FeatureMapKind::Real,
        }
    }
}

impl SgdDensityConfig {
    /// Feature map configuration derived from these parameters.
    pub fn rff(&self) -> RffConfig {
        RffConfig {
            input_dim: self.input_dim,
            dim: self.dim_x,
            gamma: self.gamma,
            random_state: self.random_state,
        }
    }
}

impl ModelConfig for SgdDensityConfig {
    fn validate(&self) -> Result<()> {
        self.rff().validate()?;
        num_eig_within(self.num_eig, self.dim_x)
    }
}

/// Gradient-descent multi-class kernel density classifier parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdKdcConfig {
    /// Dimension of the raw input.
    pub input_dim: usize,
    /// Dimension of the input feature map.
    pub dim_x: usize,
    /// Number of classes.
    pub num_classes: usize,
    /// Number of eigenpairs per class; `0` means `dim_x`.
    pub num_eig: usize,
    /// Gamma of the RBF kernel approximated by the feature map.
    pub gamma: f64,
    /// Random seed.
    pub random_state: Option<u64>,
    /// Real or complex random features.
    pub feature_map: FeatureMapKind,
}

impl Default for SgdKdcConfig {
    fn default() -> Self {
        Self {
            input_dim: 2,
            dim_x: 32,
            num_classes: 2,
            num_eig: 0,
            gamma: 1.0,
            random_state: None,
            feature_map: FeatureMapKind::Real,
        }
    }
}

impl SgdKdcConfig {
    /// Feature map configuration derived from these parameters.
    pub fn rff(&self) -> RffConfig {
        RffConfig {
            input_dim: self.input_dim,
            dim: self.dim_x,
            gamma: self.gamma,
            random_state: self.random_state,
        }
    }
}

impl ModelConfig for SgdKdcConfig {
    fn validate(&self) -> Result<()> {
        self.rff().validate()?;
        if self.num_classes < 2 {
            return Err(QMeasureError::invalid_parameter("num_classes", "must be at least 2"));
        }
        num_eig_within(self.num_eig, self.dim_x)
    }
}

/// Bounded-range gradient-descent regressor parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedRegressorConfig {
    /// Dimension of the raw input.
    pub input_dim: usize,
    /// Number of random Fourier features.
    pub num_ffs: usize,
    /// Lower end of the target range.
    pub y_min: f64,
    /// Upper end of the target range.
    pub y_max: f64,
    /// Number of eigenpairs; `0` means `2 * num_ffs`.
    pub num_eig: usize,
    /// Gamma of the RBF kernel approximated by the feature map.
    pub gamma: f64,
    /// Random seed.
    pub random_state: Option<u64>,
    /// Real or complex random features.
    pub feature_map: FeatureMapKind,
}

impl Default for BoundedRegressorConfig {
    fn default() -> Self {
        Self {
            input_dim: 1,
            num_ffs: 32,
            y_min: 0.0,
            y_max: 1.0,
            num_eig: 0,
            gamma: 1.0,
            random_state: None,
            feature_map: FeatureMapKind::Complex,
        }
    }
}

impl BoundedRegressorConfig {
    /// Configuration of the wrapped two-output classifier.
    pub fn joint(&self) -> SgdJointConfig {
        SgdJointConfig {
            input_dim: self.input_dim,
            dim_x: self.num_ffs,
            dim_y: 2,
            num_eig: self.num_eig,
            gamma: self.gamma,
            random_state: self.random_state,
            feature_map: self.feature_map,
        }
    }
}

impl ModelConfig for BoundedRegressorConfig {
    fn validate(&self) -> Result<()> {
        if !(self.y_max > self.y_min) || !self.y_min.is_finite() || !self.y_max.is_finite() {
            return Err(QMeasureError::invalid_parameter("y_max", "must be finite and above y_min"));
        }
        self.joint().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_map_round_trip() {
        let config = SgdJointConfig {
            input_dim: 3,
            dim_x: 8,
            dim_y: 2,
            num_eig: 4,
            gamma: 0.5,
            random_state: Some(9),
            feature_map: FeatureMapKind::Complex,
        };
        let map = config.to_map().unwrap();

        assert_eq!(map.get("dim_x"), Some(&Value::from(8)));
        assert_eq!(map.get("feature_map"), Some(&Value::from("complex")));
        assert!(map.values().all(|v| !v.is_object() && !v.is_array()));

        let rebuilt = SgdJointConfig::from_map(map).unwrap();
        assert_eq!(rebuilt, config);
    }

    #[test]
    fn test_from_map_validates() {
        let mut map = KdcConfig::default().to_map().unwrap();
        map.insert("num_classes".into(), Value::from(1));
        assert!(KdcConfig::from_map(map).is_err());

        let mut map = SgdDensityConfig::default().to_map().unwrap();
        map.insert("num_eig".into(), Value::from(1000));
        assert!(SgdDensityConfig::from_map(map).is_err());

        let mut map = DensityConfig { dim_x: 4 }.to_map().unwrap();
        map.insert("dim_x".into(), Value::from("four"));
        assert!(matches!(
            DensityConfig::from_map(map),
            Err(QMeasureError::ConfigError(_))
        ));
    }

    #[test]
    fn test_random_state_null() {
        let map = SgdKdcConfig::default().to_map().unwrap();
        assert_eq!(map.get("random_state"), Some(&Value::Null));
        assert!(SgdKdcConfig::from_map(map).is_ok());
    }

    #[test]
    fn test_bounded_regressor_range() {
        let config = BoundedRegressorConfig {
            y_min: 2.0,
            y_max: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(BoundedRegressorConfig::default().joint().dim_y, 2);
        assert!(JointConfig { dim_x: 0, dim_y: 2 }.validate().is_err());
    }
}
