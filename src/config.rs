//! Configuration structures for gate construction
//!
//! A [`GateConfig`] replaces loosely typed setup arguments with one explicit
//! structure. It can be built in code or parsed from a JSON file with
//! [`load_gate_config`]. Either way it is validated before a gate is built from it.
//!
//! # Example
//!
//! ```json
//! {
//!   "weight_shape": [16, 8],
//!   "bias": 1.0,
//!   "activation": "sigmoid"
//! }
//! ```
//!
//! A `transfer` entry supplies the initial weight and bias verbatim, using
//! ndarray's serialized form:
//!
//! ```json
//! {
//!   "weight_shape": [2, 1],
//!   "activation": "tanh",
//!   "transfer": {
//!     "weight": { "v": 1, "dim": [2, 1], "data": [0.5, -0.5] },
//!     "bias": { "v": 1, "dim": [1], "data": [0.1] }
//!   }
//! }
//! ```

use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{ModuleError, Result};
use crate::utils::activations::ActivationKind;

/// Pre-computed initial values for a gate's weight and bias.
///
/// Used for parameter sharing: gates built from the same transfer start from
/// identical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    /// Initial weight, `[in_features, out_features]`.
    pub weight: Array2<f64>,
    /// Initial bias, `[out_features]`.
    pub bias: Array1<f64>,
}

/// Construction parameters for a [`Gate`](crate::layers::Gate).
///
/// Initialization rules:
///
/// - **transfer given**: weight and bias start from the transfer values verbatim
/// - **bias given**: weight is Xavier-initialized, bias is filled with the constant
/// - **neither**: weight is Xavier-initialized, bias is sampled from N(0, 0.1)
///
/// Giving both `bias` and `transfer` is rejected as ambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Affine weight shape `[in_features, out_features]`.
    pub weight_shape: [usize; 2],

    /// Constant initial value for every bias entry.
    #[serde(default)]
    pub bias: Option<f64>,

    /// Activation applied after the affine map (default: sigmoid).
    #[serde(default)]
    pub activation: ActivationKind,

    /// Initial values overriding the shape-derived defaults.
    #[serde(default)]
    pub transfer: Option<Transfer>,
}

impl GateConfig {
    /// Config for an `in_features -> out_features` sigmoid gate with Gaussian bias.
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            weight_shape: [in_features, out_features],
            bias: None,
            activation: ActivationKind::default(),
            transfer: None,
        }
    }

    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = Some(bias);
        self
    }

    pub fn with_activation(mut self, activation: ActivationKind) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_transfer(mut self, weight: Array2<f64>, bias: Array1<f64>) -> Self {
        self.transfer = Some(Transfer { weight, bias });
        self
    }

    pub fn in_features(&self) -> usize {
        self.weight_shape[0]
    }

    pub fn out_features(&self) -> usize {
        self.weight_shape[1]
    }

    /// Check that the combination of fields describes exactly one valid initialization.
    ///
    /// # Errors
    ///
    /// [`ModuleError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let [in_features, out_features] = self.weight_shape;
        if in_features == 0 || out_features == 0 {
            return Err(ModuleError::InvalidConfig(format!(
                "weight_shape must be non-zero, got [{}, {}]",
                in_features, out_features
            )));
        }

        if let Some(bias) = self.bias {
            if !bias.is_finite() {
                return Err(ModuleError::InvalidConfig(format!(
                    "bias must be finite, got {}",
                    bias
                )));
            }
        }

        if let Some(ref transfer) = self.transfer {
            if self.bias.is_some() {
                return Err(ModuleError::InvalidConfig(
                    "bias and transfer are mutually exclusive".to_string(),
                ));
            }
            if transfer.weight.dim() != (in_features, out_features) {
                return Err(ModuleError::InvalidConfig(format!(
                    "transfer weight has shape {:?}, expected [{}, {}]",
                    transfer.weight.shape(),
                    in_features,
                    out_features
                )));
            }
            if transfer.bias.len() != out_features {
                return Err(ModuleError::InvalidConfig(format!(
                    "transfer bias has length {}, expected {}",
                    transfer.bias.len(),
                    out_features
                )));
            }
            let finite = transfer.weight.iter().all(|v| v.is_finite())
                && transfer.bias.iter().all(|v| v.is_finite());
            if !finite {
                return Err(ModuleError::InvalidConfig(
                    "transfer values must be finite".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Loads a gate configuration from a JSON file.
///
/// Reads the file at `path`, deserializes it into a [`GateConfig`] and validates it.
///
/// # Examples
///
/// ```no_run
/// use recurring_nn::config::load_gate_config;
///
/// let cfg = load_gate_config("config/gate_sigmoid.json").unwrap();
/// assert_eq!(cfg.weight_shape, [16, 8]);
/// ```
pub fn load_gate_config<P: AsRef<Path>>(path: P) -> Result<GateConfig> {
    let contents = fs::read_to_string(path)?;
    let config: GateConfig = serde_json::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}
