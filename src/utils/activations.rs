//! Activation functions for recurring modules
//!
//! Each activation is an object with a forward/backward pair. An instance records
//! whatever its own derivative needs during `forward` (its output, or just the shape),
//! so a module creates one fresh instance per forward call and never shares it
//! between time steps.
//!
//! - Sigmoid: `1 / (1 + exp(-x))`, derivative `y * (1 - y)`
//! - Tanh: derivative `1 - y^2`
//! - ReLU: derivative `1` where the output is positive, `0` elsewhere
//! - Identity: derivative `1`

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{ModuleError, Result};

/// Sigmoid activation function (f64 version).
///
/// Returns the sigmoid of the input: 1 / (1 + exp(-x))
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Sigmoid derivative assuming y = sigmoid(x).
///
/// Returns the derivative: y * (1 - y)
pub fn sigmoid_derivative(y: f64) -> f64 {
    y * (1.0 - y)
}

/// Tanh derivative assuming y = tanh(x).
pub fn tanh_derivative(y: f64) -> f64 {
    1.0 - y * y
}

/// Two-method contract every activation implements.
///
/// `forward` applies the nonlinearity and may record internal state;
/// `backward` turns the gradient with respect to the output into the gradient
/// with respect to the input using that recorded state.
pub trait Activation {
    /// Apply the activation to a pre-activation tensor.
    fn forward(&mut self, z: Array2<f64>) -> Array2<f64>;

    /// Local gradient given the gradient of the loss with respect to this activation's output.
    ///
    /// # Errors
    ///
    /// - [`ModuleError::ActivationNotPrimed`] if `forward` was never called on this instance
    /// - [`ModuleError::ShapeMismatch`] if `grad_output` differs in shape from the recorded output
    fn backward(&mut self, grad_output: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Short lowercase name, used in error messages and logs.
    fn name(&self) -> &'static str;
}

/// Constructor for a fresh activation instance.
pub type ActivationFactory = fn() -> Box<dyn Activation>;

fn recorded_output<'a>(
    activation: &'static str,
    recorded: Option<&'a Array2<f64>>,
    grad_output: &ArrayView2<f64>,
) -> Result<&'a Array2<f64>> {
    let recorded = recorded.ok_or(ModuleError::ActivationNotPrimed { activation })?;
    if recorded.shape() != grad_output.shape() {
        return Err(ModuleError::shape(
            activation,
            recorded.shape(),
            grad_output.shape(),
        ));
    }
    Ok(recorded)
}

/// Logistic sigmoid. Records its output.
#[derive(Debug, Default)]
pub struct Sigmoid {
    output: Option<Array2<f64>>,
}

impl Activation for Sigmoid {
    fn forward(&mut self, z: Array2<f64>) -> Array2<f64> {
        let y = z.mapv_into(sigmoid);
        self.output = Some(y.clone());
        y
    }

    fn backward(&mut self, grad_output: ArrayView2<f64>) -> Result<Array2<f64>> {
        let y = recorded_output(self.name(), self.output.as_ref(), &grad_output)?;
        Ok(Zip::from(&grad_output)
            .and(y)
            .map_collect(|&g, &y| g * sigmoid_derivative(y)))
    }

    fn name(&self) -> &'static str {
        "sigmoid"
    }
}

/// Hyperbolic tangent. Records its output.
#[derive(Debug, Default)]
pub struct Tanh {
    output: Option<Array2<f64>>,
}

impl Activation for Tanh {
    fn forward(&mut self, z: Array2<f64>) -> Array2<f64> {
        let y = z.mapv_into(f64::tanh);
        self.output = Some(y.clone());
        y
    }

    fn backward(&mut self, grad_output: ArrayView2<f64>) -> Result<Array2<f64>> {
        let y = recorded_output(self.name(), self.output.as_ref(), &grad_output)?;
        Ok(Zip::from(&grad_output)
            .and(y)
            .map_collect(|&g, &y| g * tanh_derivative(y)))
    }

    fn name(&self) -> &'static str {
        "tanh"
    }
}

/// Rectified linear unit. Records its output.
#[derive(Debug, Default)]
pub struct Relu {
    output: Option<Array2<f64>>,
}

impl Activation for Relu {
    fn forward(&mut self, z: Array2<f64>) -> Array2<f64> {
        let y = z.mapv_into(|v| if v > 0.0 { v } else { 0.0 });
        self.output = Some(y.clone());
        y
    }

    fn backward(&mut self, grad_output: ArrayView2<f64>) -> Result<Array2<f64>> {
        let y = recorded_output(self.name(), self.output.as_ref(), &grad_output)?;
        Ok(Zip::from(&grad_output)
            .and(y)
            .map_collect(|&g, &y| if y > 0.0 { g } else { 0.0 }))
    }

    fn name(&self) -> &'static str {
        "relu"
    }
}

/// Pass-through activation. Records only the shape it saw.
#[derive(Debug, Default)]
pub struct Identity {
    shape: Option<(usize, usize)>,
}

impl Activation for Identity {
    fn forward(&mut self, z: Array2<f64>) -> Array2<f64> {
        self.shape = Some(z.dim());
        z
    }

    fn backward(&mut self, grad_output: ArrayView2<f64>) -> Result<Array2<f64>> {
        let (rows, cols) = self.shape.ok_or(ModuleError::ActivationNotPrimed {
            activation: "identity",
        })?;
        if grad_output.dim() != (rows, cols) {
            return Err(ModuleError::shape(
                "identity",
                &[rows, cols],
                grad_output.shape(),
            ));
        }
        Ok(grad_output.to_owned())
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// Selector for the built-in activations.
///
/// This is a capability, not an instance: modules hold the kind (or its
/// [`ActivationFactory`]) and build a new activation object per forward call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    #[default]
    Sigmoid,
    Tanh,
    Relu,
    Identity,
}

impl ActivationKind {
    /// All built-in kinds, in declaration order.
    pub const ALL: [ActivationKind; 4] = [
        ActivationKind::Sigmoid,
        ActivationKind::Tanh,
        ActivationKind::Relu,
        ActivationKind::Identity,
    ];

    /// Lowercase name matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::Tanh => "tanh",
            ActivationKind::Relu => "relu",
            ActivationKind::Identity => "identity",
        }
    }

    /// Constructor function for this kind.
    pub fn factory(self) -> ActivationFactory {
        fn sigmoid() -> Box<dyn Activation> {
            Box::new(Sigmoid::default())
        }
        fn tanh() -> Box<dyn Activation> {
            Box::new(Tanh::default())
        }
        fn relu() -> Box<dyn Activation> {
            Box::new(Relu::default())
        }
        fn identity() -> Box<dyn Activation> {
            Box::new(Identity::default())
        }

        match self {
            ActivationKind::Sigmoid => sigmoid,
            ActivationKind::Tanh => tanh,
            ActivationKind::Relu => relu,
            ActivationKind::Identity => identity,
        }
    }

    /// Build a fresh activation instance.
    pub fn build(self) -> Box<dyn Activation> {
        (self.factory())()
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivationKind {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self> {
        ActivationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = ActivationKind::ALL.iter().map(|k| k.as_str()).collect();
                ModuleError::InvalidConfig(format!(
                    "Invalid activation function '{}'. Must be one of: {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}
