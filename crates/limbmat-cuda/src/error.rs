//! Error types for CUDA operations.

use thiserror::Error;

/// Errors that can occur during GPU-orchestrated limb operations.
///
/// Driver and cuBLAS faults leave unknown device state behind; treat them
/// as fatal for the process, per the engine's error model.
#[derive(Debug, Error)]
pub enum CudaError {
    /// CUDA driver error.
    #[error("CUDA driver error: {0}")]
    Driver(#[from] cudarc::driver::DriverError),

    /// cuBLAS error from a safe wrapper.
    #[error("cuBLAS error: {0}")]
    Blas(#[from] cudarc::cublas::result::CublasError),

    /// cuBLAS error from a raw call.
    #[error("cuBLAS {call} failed with status {status}")]
    BlasStatus { call: &'static str, status: u32 },

    /// Error from the host engine (planning, allocation, preconditions).
    #[error(transparent)]
    Core(#[from] limbmat::Error),
}

/// Result type for CUDA operations.
pub type Result<T> = std::result::Result<T, CudaError>;
