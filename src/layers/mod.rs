//! Recurring layer abstractions
//!
//! This module provides the Recurring trait with its frame stack, and the Gate
//! module built on top of it.

pub mod gate;
pub mod recurring;

pub use gate::{Gate, GateFrame};
pub use recurring::{FrameStack, Recurring};
