//! Shared utilities for recurring modules
//!
//! This module provides random number generation, weight initializers and
//! activation functions.

pub mod activations;
pub mod init;
pub mod rng;

pub use rng::SimpleRng;
