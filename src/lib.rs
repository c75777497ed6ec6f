//! Recurring neural-network modules
//!
//! This library provides modules whose backward pass replays state captured during
//! an earlier forward pass, so one layer can be applied at every step of an unrolled
//! sequence and then back-propagated through time (full or truncated).
//!
//! # Modules
//!
//! - `layers`: the Recurring contract (frame stack, flush) and the Gate module
//! - `server`: variable server issuing shared parameter handles and accumulating gradients
//! - `config`: gate configuration structures and JSON loading
//! - `utils`: RNG, weight initializers, activation functions
//! - `error`: error type shared by all of the above

pub mod config;
pub mod error;
pub mod layers;
pub mod server;
pub mod utils;

pub use error::{ModuleError, Result};
