use thiserror::Error;

/// Errors surfaced by graph construction and traversal.
///
/// Numeric-domain conditions (division by zero, overflow in `exp`, zero raised
/// to a negative power) are not errors; they flow through as infinity or NaN.
#[derive(Error, Debug)]
pub enum GradError {
    #[error("Exponent must be a constant number, but got node `{name}`")]
    InvalidExponent { name: String },

    #[error("Cannot set value to non-leaf node `{name}`")]
    NotLeaf { name: String },

    #[error("Cycle detected in the operand graph at node `{name}`")]
    Cycle { name: String },

    #[error("Input size mismatch: expected {expected}, got {actual}")]
    InputSize { expected: usize, actual: usize },

    #[error("Failed to write graph: {0}")]
    Io(#[from] std::io::Error),
}
