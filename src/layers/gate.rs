//! Gate module: affine transform followed by an activation
//!
//! A gate computes `y = f(x · W + b)` where
//! x is the input (batch_size × in_features),
//! W is the weight matrix (in_features × out_features),
//! b is the bias vector (out_features),
//! and f is an activation built fresh for every forward call.
//!
//! Gates implement [`Recurring`], so the same instance can be applied at every
//! time step of an unrolled sequence and then back-propagated through time.

use ndarray::{Array1, Array2, ArrayView2, Axis, Ix1, Ix2};
use tracing::debug;

use crate::config::GateConfig;
use crate::error::{ModuleError, Result};
use crate::layers::recurring::{FrameStack, Recurring};
use crate::server::{Var, VarServer};
use crate::utils::activations::{Activation, ActivationFactory};
use crate::utils::init::{gauss, xavier};
use crate::utils::rng::SimpleRng;

const MODULE_NAME: &str = "gate";

/// Standard deviation of the Gaussian bias initialization.
const BIAS_INIT_STD: f64 = 0.1;

/// Context saved by one [`Gate::forward`] call.
pub struct GateFrame {
    /// Input passed to forward, needed for the weight gradient.
    pub input: Array2<f64>,
    /// Activation instance that produced this step's output.
    pub activation: Box<dyn Activation>,
}

/// Trainable affine transform plus nonlinearity, reusable across time steps.
///
/// # Fields
///
/// * `weight` - Handle to the `[in_features, out_features]` weight slot
/// * `bias` - Handle to the `[out_features]` bias slot
/// * `activation` - Factory building one activation per forward call
/// * `stack` - Pending frames, one per forward call not yet back-propagated
///
/// # Example
///
/// ```
/// use ndarray::array;
/// use recurring_nn::config::GateConfig;
/// use recurring_nn::layers::{Gate, Recurring};
/// use recurring_nn::server::VarServer;
/// use recurring_nn::utils::activations::ActivationKind;
///
/// let mut server = VarServer::new(42);
/// let config = GateConfig::new(2, 3).with_activation(ActivationKind::Tanh);
/// let mut gate = Gate::new(&mut server, &config).unwrap();
///
/// let h = gate.forward(array![[0.5, -0.5]].view()).unwrap();
/// assert_eq!(h.dim(), (1, 3));
/// assert_eq!(gate.depth(), 1);
///
/// let dx = gate.backward(array![[1.0, 1.0, 1.0]].view()).unwrap();
/// assert_eq!(dx.dim(), (1, 2));
/// assert_eq!(gate.depth(), 0);
/// ```
pub struct Gate {
    in_features: usize,
    out_features: usize,
    weight: Var<Ix2>,
    bias: Var<Ix1>,
    activation: ActivationFactory,
    activation_name: &'static str,
    stack: FrameStack<GateFrame>,
}

impl Gate {
    /// Build a gate from `config`, registering its weight and bias with `server`.
    ///
    /// # Errors
    ///
    /// [`ModuleError::InvalidConfig`] if the configuration does not validate.
    pub fn new(server: &mut VarServer, config: &GateConfig) -> Result<Self> {
        Self::with_activation_factory(server, config, config.activation.factory())
    }

    /// Like [`Gate::new`] but with a caller-supplied activation factory.
    ///
    /// `config.activation` is ignored; every forward call builds its activation
    /// with `activation` instead.
    pub fn with_activation_factory(
        server: &mut VarServer,
        config: &GateConfig,
        activation: ActivationFactory,
    ) -> Result<Self> {
        config.validate()?;

        let (weight_init, bias_init) = initial_values(config, server.rng_mut());
        let weight = server.issue_var_slot(weight_init, true);
        let bias = server.issue_var_slot(bias_init, true);
        let activation_name = activation().name();

        debug!(
            in_features = config.in_features(),
            out_features = config.out_features(),
            activation = activation_name,
            transfer = config.transfer.is_some(),
            "gate constructed"
        );

        Ok(Self {
            in_features: config.in_features(),
            out_features: config.out_features(),
            weight,
            bias,
            activation,
            activation_name,
            stack: FrameStack::new(MODULE_NAME),
        })
    }

    /// New gate reading and writing the same weight and bias slots as `other`.
    ///
    /// The tied gate has its own empty frame stack. Gradients from both gates
    /// accumulate into the shared slots.
    pub fn tied_to(other: &Gate) -> Self {
        debug!(
            weight_slot = other.weight.id(),
            bias_slot = other.bias.id(),
            "gate tied to existing slots"
        );

        Self {
            in_features: other.in_features,
            out_features: other.out_features,
            weight: other.weight.clone(),
            bias: other.bias.clone(),
            activation: other.activation,
            activation_name: other.activation_name,
            stack: FrameStack::new(MODULE_NAME),
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weight(&self) -> &Var<Ix2> {
        &self.weight
    }

    pub fn bias(&self) -> &Var<Ix1> {
        &self.bias
    }

    pub fn activation_name(&self) -> &'static str {
        self.activation_name
    }

    /// Returns in_features × out_features (weights) + out_features (biases).
    pub fn parameter_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

fn initial_values(config: &GateConfig, rng: &mut SimpleRng) -> (Array2<f64>, Array1<f64>) {
    if let Some(ref transfer) = config.transfer {
        return (transfer.weight.clone(), transfer.bias.clone());
    }

    let weight = xavier(config.weight_shape, rng);
    let bias = match config.bias {
        Some(value) => Array1::from_elem(config.out_features(), value),
        None => gauss(0.0, BIAS_INIT_STD, config.out_features(), rng),
    };
    (weight, bias)
}

impl Recurring for Gate {
    type Frame = GateFrame;

    fn stack(&self) -> &FrameStack<GateFrame> {
        &self.stack
    }

    fn stack_mut(&mut self) -> &mut FrameStack<GateFrame> {
        &mut self.stack
    }

    /// Computes `f(x · W + b)` and pushes `(x, f)` as this step's frame.
    ///
    /// Weight and bias are only read here.
    ///
    /// # Errors
    ///
    /// [`ModuleError::ShapeMismatch`] if `x` does not have `in_features` columns or the
    /// activation changes the shape of its input. No frame is pushed on error.
    fn forward(&mut self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.in_features {
            return Err(ModuleError::shape(
                "gate.forward",
                &[x.nrows(), self.in_features],
                x.shape(),
            ));
        }

        let linear: Array2<f64> = x.dot(&*self.weight.value()) + &*self.bias.value();

        let mut activation = (self.activation)();
        let output = activation.forward(linear);
        if output.dim() != (x.nrows(), self.out_features) {
            return Err(ModuleError::shape(
                "gate.activation",
                &[x.nrows(), self.out_features],
                output.shape(),
            ));
        }

        self.push_frame(GateFrame {
            input: x.to_owned(),
            activation,
        });
        Ok(output)
    }

    /// Consumes the latest frame, accumulates bias and weight gradients, and returns
    /// `dL/dx = (dL/dz) · Wᵗ` for that step.
    ///
    /// The frame is popped only once the gradients are accumulated, so a failed
    /// call leaves the stack as it was and can be retried with a corrected `grad`.
    ///
    /// Panics if a [`Var::value`] or [`Var::grad`] guard on this gate's weight or
    /// bias (or a tied gate's) is alive during the call.
    ///
    /// # Errors
    ///
    /// - [`ModuleError::EmptyStack`] if no forward call is pending
    /// - [`ModuleError::ShapeMismatch`] if `grad` does not match that step's output shape,
    ///   or the activation returns a gradient of another shape
    fn backward(&mut self, grad: ArrayView2<f64>) -> Result<Array2<f64>> {
        let out_features = self.out_features;
        let frame = self.stack.peek_mut()?;

        let batch = frame.input.nrows();
        if grad.dim() != (batch, out_features) {
            return Err(ModuleError::shape(
                "gate.backward",
                &[batch, out_features],
                grad.shape(),
            ));
        }

        let linear_grad = frame.activation.backward(grad)?;
        if linear_grad.dim() != (batch, out_features) {
            return Err(ModuleError::shape(
                "gate.activation",
                &[batch, out_features],
                linear_grad.shape(),
            ));
        }

        let weight_grad = frame.input.t().dot(&linear_grad);
        self.bias.set_grad(linear_grad.sum_axis(Axis(0)))?;
        self.weight.set_grad(weight_grad)?;
        self.pop_frame()?;

        let grad_input = linear_grad.dot(&self.weight.value().t());
        Ok(grad_input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::activations::ActivationKind;
    use ndarray::array;

    #[test]
    fn test_gate_creation() {
        let mut server = VarServer::new(42);
        let gate = Gate::new(&mut server, &GateConfig::new(10, 5)).unwrap();

        assert_eq!(gate.in_features(), 10);
        assert_eq!(gate.out_features(), 5);
        assert_eq!(gate.weight().value().dim(), (10, 5));
        assert_eq!(gate.bias().value().len(), 5);
        assert_eq!(gate.parameter_count(), 10 * 5 + 5);
        assert_eq!(gate.activation_name(), "sigmoid");
        assert_eq!(server.slot_count(), 2);
    }

    #[test]
    fn test_constant_bias_fill() {
        let mut server = VarServer::new(42);
        let gate = Gate::new(&mut server, &GateConfig::new(3, 4).with_bias(1.5)).unwrap();

        assert!(gate.bias().value().iter().all(|&b| b == 1.5));
    }

    #[test]
    fn test_gaussian_bias_is_small_and_varied() {
        let mut server = VarServer::new(7);
        let gate = Gate::new(&mut server, &GateConfig::new(3, 64)).unwrap();
        let bias = gate.bias().value();

        assert!(bias.iter().all(|b| b.abs() < 1.0));
        assert!(bias.iter().any(|&b| b != bias[0]));
    }

    #[test]
    fn test_xavier_weight_range() {
        let mut server = VarServer::new(42);
        let gate = Gate::new(&mut server, &GateConfig::new(100, 50)).unwrap();

        let limit = (6.0f64 / 150.0).sqrt();
        assert!(gate.weight().value().iter().all(|w| w.abs() <= limit));
    }

    #[test]
    fn test_transfer_used_verbatim() {
        let mut server = VarServer::new(42);
        let w = array![[0.1, 0.2], [0.3, 0.4]];
        let b = array![-1.0, 1.0];
        let config = GateConfig::new(2, 2).with_transfer(w.clone(), b.clone());
        let gate = Gate::new(&mut server, &config).unwrap();

        assert_eq!(*gate.weight().value(), w);
        assert_eq!(*gate.bias().value(), b);
    }

    #[test]
    fn test_same_seed_same_parameters() {
        let g1 = Gate::new(&mut VarServer::new(5), &GateConfig::new(4, 3)).unwrap();
        let g2 = Gate::new(&mut VarServer::new(5), &GateConfig::new(4, 3)).unwrap();

        assert_eq!(*g1.weight().value(), *g2.weight().value());
        assert_eq!(*g1.bias().value(), *g2.bias().value());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut server = VarServer::new(42);
        let result = Gate::new(&mut server, &GateConfig::new(0, 3));

        assert!(matches!(result, Err(ModuleError::InvalidConfig(_))));
        assert_eq!(server.slot_count(), 0);
    }

    #[test]
    fn test_forward_rejects_wrong_width_without_pushing() {
        let mut server = VarServer::new(42);
        let mut gate = Gate::new(&mut server, &GateConfig::new(3, 2)).unwrap();

        let err = gate.forward(array![[1.0, 2.0]].view()).unwrap_err();
        assert!(matches!(err, ModuleError::ShapeMismatch { .. }));
        assert_eq!(gate.depth(), 0);
    }

    #[test]
    fn test_backward_rejects_wrong_grad_shape() {
        let mut server = VarServer::new(42);
        let config = GateConfig::new(2, 2).with_activation(ActivationKind::Identity);
        let mut gate = Gate::new(&mut server, &config).unwrap();

        gate.forward(array![[1.0, 2.0]].view()).unwrap();
        let err = gate.backward(array![[1.0, 2.0, 3.0]].view()).unwrap_err();
        assert!(matches!(err, ModuleError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_failed_backward_keeps_frame_for_retry() {
        let mut server = VarServer::new(42);
        let config = GateConfig::new(2, 1)
            .with_activation(ActivationKind::Identity)
            .with_transfer(array![[1.0], [1.0]], array![0.0]);
        let mut gate = Gate::new(&mut server, &config).unwrap();

        gate.forward(array![[1.0, 0.0]].view()).unwrap();
        gate.forward(array![[0.0, 5.0]].view()).unwrap();

        let err = gate.backward(array![[1.0, 1.0]].view()).unwrap_err();
        assert!(matches!(
            err,
            ModuleError::ShapeMismatch {
                context: "gate.backward",
                ..
            }
        ));
        assert_eq!(gate.depth(), 2);
        assert!(gate.weight().grad().iter().all(|&g| g == 0.0));

        // The retry pairs with the second step's input
        gate.backward(array![[1.0]].view()).unwrap();
        assert_eq!(gate.depth(), 1);
        assert_eq!(*gate.weight().grad(), array![[0.0], [5.0]]);
        assert_eq!(*gate.bias().grad(), array![1.0]);
    }

    /// Activation that appends a column to its output.
    #[derive(Default)]
    struct Widen;

    impl Activation for Widen {
        fn forward(&mut self, z: Array2<f64>) -> Array2<f64> {
            Array2::zeros((z.nrows(), z.ncols() + 1))
        }

        fn backward(&mut self, grad_output: ArrayView2<f64>) -> Result<Array2<f64>> {
            Ok(grad_output.to_owned())
        }

        fn name(&self) -> &'static str {
            "widen"
        }
    }

    /// Activation whose gradient drops a column.
    #[derive(Default)]
    struct NarrowGrad;

    impl Activation for NarrowGrad {
        fn forward(&mut self, z: Array2<f64>) -> Array2<f64> {
            z
        }

        fn backward(&mut self, grad_output: ArrayView2<f64>) -> Result<Array2<f64>> {
            Ok(Array2::zeros((grad_output.nrows(), grad_output.ncols() - 1)))
        }

        fn name(&self) -> &'static str {
            "narrow_grad"
        }
    }

    fn widen() -> Box<dyn Activation> {
        Box::new(Widen)
    }

    fn narrow_grad() -> Box<dyn Activation> {
        Box::new(NarrowGrad)
    }

    #[test]
    fn test_custom_activation_factory() {
        let mut server = VarServer::new(42);
        let gate =
            Gate::with_activation_factory(&mut server, &GateConfig::new(2, 2), narrow_grad)
                .unwrap();

        assert_eq!(gate.activation_name(), "narrow_grad");
        assert_eq!(server.slot_count(), 2);
    }

    #[test]
    fn test_activation_changing_output_shape_rejected() {
        let mut server = VarServer::new(42);
        let mut gate =
            Gate::with_activation_factory(&mut server, &GateConfig::new(2, 1), widen).unwrap();

        let err = gate.forward(array![[1.0, 2.0]].view()).unwrap_err();
        match err {
            ModuleError::ShapeMismatch {
                context,
                expected,
                actual,
            } => {
                assert_eq!(context, "gate.activation");
                assert_eq!(expected, vec![1, 1]);
                assert_eq!(actual, vec![1, 2]);
            }
            other => panic!("expected ShapeMismatch, got {other}"),
        }
        assert_eq!(gate.depth(), 0);
    }

    #[test]
    fn test_activation_changing_grad_shape_rejected() {
        let mut server = VarServer::new(42);
        let mut gate =
            Gate::with_activation_factory(&mut server, &GateConfig::new(2, 2), narrow_grad)
                .unwrap();

        gate.forward(array![[1.0, 2.0]].view()).unwrap();
        let err = gate.backward(array![[1.0, 1.0]].view()).unwrap_err();
        assert!(matches!(
            err,
            ModuleError::ShapeMismatch {
                context: "gate.activation",
                ..
            }
        ));
        assert_eq!(gate.depth(), 1);
        assert!(gate.weight().grad().iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_backward_without_forward() {
        let mut server = VarServer::new(42);
        let mut gate = Gate::new(&mut server, &GateConfig::new(2, 2)).unwrap();

        let err = gate.backward(array![[1.0, 1.0]].view()).unwrap_err();
        assert!(matches!(err, ModuleError::EmptyStack { module: "gate" }));
    }

    #[test]
    fn test_tied_gate_has_own_stack() {
        let mut server = VarServer::new(42);
        let mut gate = Gate::new(&mut server, &GateConfig::new(2, 2)).unwrap();
        let tied = Gate::tied_to(&gate);

        gate.forward(array![[1.0, 2.0]].view()).unwrap();
        assert_eq!(gate.depth(), 1);
        assert_eq!(tied.depth(), 0);
        assert!(tied.weight().shares_storage_with(gate.weight()));
        assert_eq!(server.slot_count(), 2);
    }
}
