//! Error types for the limb engine.

use thiserror::Error;

/// Errors that can occur during limb-decomposed matrix operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The precision planner could not find a positive limb width that keeps
    /// accumulator mantissas within the double format.
    #[error("limb width underflow: no positive limb width fits precision {prec_bits} bits with inner dimension {k}")]
    PrecisionUnderflow { prec_bits: u32, k: usize },

    /// The workspace allocator was refused by the underlying allocator.
    #[error("workspace allocation of {elements} doubles failed")]
    Allocation { elements: usize },

    /// A public API precondition was violated.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A BLAS or device fault. Partial backend state cannot be unwound;
    /// callers should treat this as fatal.
    #[error("backend fault: {0}")]
    Backend(String),
}

/// Result type for limb engine operations.
pub type Result<T> = std::result::Result<T, Error>;
