//! In-memory variable server
//!
//! The server allocates parameter slots and hands out [`Var`] handles. A handle
//! reads the slot's current value and accumulates gradients into it. Cloning a
//! handle shares the slot, which is how tied modules end up reading and writing
//! the same storage.
//!
//! Gradient contract: [`Var::set_grad`] **adds** into the slot's accumulator.
//! A module calls it once per backward call, so after a BPTT replay the
//! accumulator holds the sum over every time step (and over every module that
//! shares the slot). [`VarServer::zero_grad`] resets the accumulators, typically
//! after an optimizer step.
//!
//! Handles use `Rc<RefCell<_>>`: one server and the modules built from it are
//! meant to be driven from a single thread.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use ndarray::{Array, Dimension};
use tracing::warn;

use crate::error::{ModuleError, Result};
use crate::utils::rng::SimpleRng;

struct Slot<D: Dimension> {
    id: usize,
    value: Array<f64, D>,
    grad: Array<f64, D>,
    trainable: bool,
}

/// Type-erased view of a slot, used by the server's registry.
trait ParamSlot {
    fn zero_grad(&mut self);
    fn len(&self) -> usize;
    fn is_trainable(&self) -> bool;
}

impl<D: Dimension> ParamSlot for Slot<D> {
    fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    fn len(&self) -> usize {
        self.value.len()
    }

    fn is_trainable(&self) -> bool {
        self.trainable
    }
}

/// Handle to a parameter slot issued by a [`VarServer`].
pub struct Var<D: Dimension> {
    slot: Rc<RefCell<Slot<D>>>,
}

impl<D: Dimension> Clone for Var<D> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<D: Dimension> std::fmt::Debug for Var<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot.borrow();
        f.debug_struct("Var")
            .field("id", &slot.id)
            .field("shape", &slot.value.shape())
            .field("trainable", &slot.trainable)
            .finish()
    }
}

impl<D: Dimension> Var<D> {
    /// Server-assigned slot identifier.
    pub fn id(&self) -> usize {
        self.slot.borrow().id
    }

    /// Current value of the slot.
    ///
    /// The returned guard borrows the slot; drop it before calling
    /// [`Var::set_value`] or [`Var::set_grad`] on any handle to the same slot,
    /// including a module's backward pass.
    pub fn value(&self) -> Ref<'_, Array<f64, D>> {
        Ref::map(self.slot.borrow(), |slot| &slot.value)
    }

    /// Gradient accumulated since the last [`VarServer::zero_grad`].
    pub fn grad(&self) -> Ref<'_, Array<f64, D>> {
        Ref::map(self.slot.borrow(), |slot| &slot.grad)
    }

    /// Add `grad` into the slot's gradient accumulator.
    ///
    /// Frozen (non-trainable) slots ignore the call. Like [`Var::set_value`], this
    /// borrows the slot mutably and panics if a [`Var::value`] or [`Var::grad`]
    /// guard on the same slot is still alive.
    ///
    /// # Errors
    ///
    /// [`ModuleError::ShapeMismatch`] if `grad` does not have the slot's shape.
    pub fn set_grad(&self, grad: Array<f64, D>) -> Result<()> {
        let mut slot = self.slot.borrow_mut();
        if grad.shape() != slot.value.shape() {
            return Err(ModuleError::shape(
                "var.set_grad",
                slot.value.shape(),
                grad.shape(),
            ));
        }
        if !slot.trainable {
            warn!(slot = slot.id, "gradient sent to a frozen slot was dropped");
            return Ok(());
        }
        slot.grad += &grad;
        Ok(())
    }

    /// Overwrite the slot's value, e.g. from an optimizer step.
    ///
    /// # Errors
    ///
    /// [`ModuleError::ShapeMismatch`] if `value` does not have the slot's shape.
    pub fn set_value(&self, value: Array<f64, D>) -> Result<()> {
        let mut slot = self.slot.borrow_mut();
        if value.shape() != slot.value.shape() {
            return Err(ModuleError::shape(
                "var.set_value",
                slot.value.shape(),
                value.shape(),
            ));
        }
        slot.value = value;
        Ok(())
    }

    pub fn is_trainable(&self) -> bool {
        self.slot.borrow().trainable
    }

    /// Number of scalar entries in the slot.
    pub fn len(&self) -> usize {
        self.slot.borrow().value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when both handles point at the same slot.
    pub fn shares_storage_with(&self, other: &Var<D>) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

/// Allocates and tracks parameter slots.
///
/// The server also owns the [`SimpleRng`] used by initializers, so a given seed
/// reproduces every module built from it.
///
/// # Example
///
/// ```
/// use ndarray::array;
/// use recurring_nn::server::VarServer;
///
/// let mut server = VarServer::new(42);
/// let w = server.issue_var_slot(array![[1.0, 2.0]], true);
///
/// w.set_grad(array![[0.5, 0.5]]).unwrap();
/// w.set_grad(array![[0.5, 0.5]]).unwrap();
/// assert_eq!(*w.grad(), array![[1.0, 1.0]]);
///
/// server.zero_grad();
/// assert_eq!(*w.grad(), array![[0.0, 0.0]]);
/// ```
pub struct VarServer {
    rng: SimpleRng,
    slots: Vec<Rc<RefCell<dyn ParamSlot>>>,
}

impl VarServer {
    /// Create an empty server whose initializers draw from `SimpleRng::new(seed)`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SimpleRng::new(seed),
            slots: Vec::new(),
        }
    }

    /// Allocate a slot holding `initial` and return a handle to it.
    pub fn issue_var_slot<D>(&mut self, initial: Array<f64, D>, trainable: bool) -> Var<D>
    where
        D: Dimension + 'static,
    {
        let grad = Array::zeros(initial.raw_dim());
        let slot = Rc::new(RefCell::new(Slot {
            id: self.slots.len(),
            value: initial,
            grad,
            trainable,
        }));
        let erased: Rc<RefCell<dyn ParamSlot>> = slot.clone();
        self.slots.push(erased);
        Var { slot }
    }

    /// Reset every slot's gradient accumulator to zero.
    pub fn zero_grad(&mut self) {
        for slot in &self.slots {
            slot.borrow_mut().zero_grad();
        }
    }

    /// Number of slots issued so far.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Total number of scalar entries across trainable slots.
    pub fn trainable_parameter_count(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| slot.borrow())
            .filter(|slot| slot.is_trainable())
            .map(|slot| slot.len())
            .sum()
    }

    /// Random source for parameter initialization.
    pub fn rng_mut(&mut self) -> &mut SimpleRng {
        &mut self.rng
    }
}
