//! Error types for recurring modules.

use thiserror::Error;

/// Result type alias for module operations.
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Errors raised by recurring modules, their activations and the variable server.
///
/// None of these are recovered from internally. A numerically wrong gradient is worse
/// than a failed call, so every error surfaces at the point of detection. After an
/// aborted sequence the caller resets the module with `flush()`.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// `backward` was called with no pending frame from a matching `forward`.
    #[error("{module}: backward called with an empty frame stack (no matching forward)")]
    EmptyStack {
        /// Name of the module whose stack underflowed.
        module: &'static str,
    },

    /// A tensor does not have the shape the operation requires.
    #[error("{context}: shape mismatch, expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Where the mismatch was detected.
        context: &'static str,
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// Invalid combination of construction arguments.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An activation instance was asked for a gradient before it saw a forward pass.
    #[error("{activation}: backward called before forward")]
    ActivationNotPrimed {
        /// Name of the activation.
        activation: &'static str,
    },

    /// Reading a configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file is not valid JSON for the expected structure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModuleError {
    pub(crate) fn shape(context: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        ModuleError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
