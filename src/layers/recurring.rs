//! Recurring module contract
//!
//! A recurring module is invoked repeatedly across time steps while a sequence is
//! unrolled, then driven backward the same number of times during back-propagation
//! through time (full or truncated). Each `forward` call pushes one frame of context
//! onto the module's [`FrameStack`]. Each `backward` call pops the most recent frame,
//! so backward calls consume frames in reverse chronological order.
//!
//! Depth transitions:
//!
//! - `forward`: D -> D + 1
//! - `backward`: D -> D - 1, an error at D = 0
//! - `flush`: any D -> 0
//!
//! There is no terminal state; a module is reused across any number of sequences.

use ndarray::{Array2, ArrayView2};
use tracing::{debug, trace};

use crate::error::{ModuleError, Result};

/// Last-in-first-out store of per-call frames, owned by one module.
///
/// # Example
///
/// ```
/// use recurring_nn::layers::FrameStack;
///
/// let mut stack = FrameStack::new("example");
/// stack.push(1);
/// stack.push(2);
/// assert_eq!(stack.pop().unwrap(), 2);
/// assert_eq!(stack.pop().unwrap(), 1);
/// assert!(stack.pop().is_err());
/// ```
#[derive(Debug)]
pub struct FrameStack<F> {
    module: &'static str,
    frames: Vec<F>,
}

impl<F> FrameStack<F> {
    /// Empty stack for the module named `module` (used in errors and logs).
    pub fn new(module: &'static str) -> Self {
        Self {
            module,
            frames: Vec::new(),
        }
    }

    pub fn push(&mut self, frame: F) {
        self.frames.push(frame);
        trace!(module = self.module, depth = self.frames.len(), "frame pushed");
    }

    /// Remove and return the most recently pushed frame.
    ///
    /// # Errors
    ///
    /// [`ModuleError::EmptyStack`] when no frame is pending.
    pub fn pop(&mut self) -> Result<F> {
        let frame = self.frames.pop().ok_or(ModuleError::EmptyStack {
            module: self.module,
        })?;
        trace!(module = self.module, depth = self.frames.len(), "frame popped");
        Ok(frame)
    }

    /// Most recently pushed frame, left on the stack.
    ///
    /// # Errors
    ///
    /// [`ModuleError::EmptyStack`] when no frame is pending.
    pub fn peek_mut(&mut self) -> Result<&mut F> {
        self.frames.last_mut().ok_or(ModuleError::EmptyStack {
            module: self.module,
        })
    }

    /// Drop every pending frame.
    pub fn clear(&mut self) {
        if !self.frames.is_empty() {
            debug!(
                module = self.module,
                discarded = self.frames.len(),
                "flushing pending frames"
            );
        }
        self.frames.clear();
    }

    /// Number of frames waiting for a backward call.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Core trait for modules that replay forward-time state during backward.
///
/// Implementors provide storage for their [`FrameStack`] and the forward/backward
/// math; the stack bookkeeping (`push_frame`, `pop_frame`, `flush`, `depth`) is
/// provided. Module-specific setup happens in the implementor's constructor.
///
/// # Contract
///
/// - every `forward` pushes exactly one frame
/// - every `backward` pops exactly one frame, the most recent one, and fails with
///   [`ModuleError::EmptyStack`] if there is none
/// - `flush` is always safe to call, whether or not the stack was drained
///
/// # Example
///
/// ```ignore
/// // Unroll over T steps, then back-propagate through time.
/// let mut hs = Vec::new();
/// for x in inputs.iter() {
///     hs.push(gate.forward(x.view())?);
/// }
/// for g in output_grads.iter().rev() {
///     let dx = gate.backward(g.view())?;
/// }
/// gate.flush();
/// ```
pub trait Recurring {
    /// Context captured by one forward call and consumed by its matching backward call.
    type Frame;

    fn stack(&self) -> &FrameStack<Self::Frame>;

    fn stack_mut(&mut self) -> &mut FrameStack<Self::Frame>;

    /// Forward propagation for one time step.
    ///
    /// # Arguments
    ///
    /// * `x` - Input of shape `[batch, in_features]`
    ///
    /// # Returns
    ///
    /// The module output for this step. One frame is pushed on success.
    fn forward(&mut self, x: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Backward propagation for the most recent pending time step.
    ///
    /// # Arguments
    ///
    /// * `grad` - Gradient of the loss with respect to that step's output
    ///
    /// # Returns
    ///
    /// Gradient of the loss with respect to that step's input. One frame is popped.
    fn backward(&mut self, grad: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Hook for state kept outside the frame stack; called by [`Recurring::flush`].
    fn on_flush(&mut self) {}

    fn push_frame(&mut self, frame: Self::Frame) {
        self.stack_mut().push(frame);
    }

    fn pop_frame(&mut self) -> Result<Self::Frame> {
        self.stack_mut().pop()
    }

    /// Reset the module between independent sequences.
    ///
    /// Empties the frame stack, then runs [`Recurring::on_flush`].
    fn flush(&mut self) {
        self.stack_mut().clear();
        self.on_flush();
    }

    /// Number of forward calls not yet matched by a backward call.
    fn depth(&self) -> usize {
        self.stack().depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_is_lifo() {
        let mut stack = FrameStack::new("test");
        for i in 0..5 {
            stack.push(i);
        }
        for i in (0..5).rev() {
            assert_eq!(stack.pop().unwrap(), i);
        }
        assert!(stack.is_empty());
    }

    #[test]
    fn test_pop_empty_names_module() {
        let mut stack: FrameStack<u8> = FrameStack::new("toy");
        match stack.pop() {
            Err(ModuleError::EmptyStack { module }) => assert_eq!(module, "toy"),
            other => panic!("expected EmptyStack, got {:?}", other),
        }
    }

    #[test]
    fn test_peek_mut_keeps_frame() {
        let mut stack = FrameStack::new("test");
        assert!(matches!(
            stack.peek_mut(),
            Err(ModuleError::EmptyStack { module: "test" })
        ));

        stack.push(1);
        stack.push(2);
        *stack.peek_mut().unwrap() += 10;
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.pop().unwrap(), 12);
    }

    #[test]
    fn test_clear_resets_depth() {
        let mut stack = FrameStack::new("test");
        stack.push("a");
        stack.push("b");
        assert_eq!(stack.depth(), 2);

        stack.clear();
        assert_eq!(stack.depth(), 0);
        assert!(stack.pop().is_err());
    }
}
