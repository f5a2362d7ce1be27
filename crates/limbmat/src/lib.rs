//! Arbitrary-precision dense GEMM and SYRK at near-double-precision BLAS
//! speed.
//!
//! Every scalar of a `rug::Float` matrix is decomposed into a short sequence
//! of *limbs*, integer-valued doubles each carrying `L` bits of mantissa,
//! sharing one matrix exponent. The product of two matrices then becomes a
//! convolution over the limb index where every term is an ordinary
//! double-precision GEMM over full limb planes, so the heavy lifting runs at
//! hardware BLAS speed. Because the planner bounds `L` so that every
//! accumulator entry stays an exactly representable integer, recombining the
//! limb products with carry propagation reproduces the exact
//! high-precision result.
//!
//! # Quick start
//!
//! ```
//! use limbmat::{Engine, Layout, Transpose};
//! use rug::Float;
//!
//! let prec = 256;
//! let a: Vec<Float> = (1..=4).map(|v| Float::with_val(prec, v)).collect();
//! let b: Vec<Float> = (5..=8).map(|v| Float::with_val(prec, v)).collect();
//! let mut c = vec![Float::new(prec); 4];
//!
//! let mut engine = Engine::new();
//! engine.gemm_reduced(
//!     Layout::RowMajor,
//!     Transpose::NoTrans,
//!     Transpose::NoTrans,
//!     2, 2, 2,
//!     &a, &b, &mut c,
//! )?;
//! assert_eq!(c[0], 19);
//! # Ok::<(), limbmat::Error>(())
//! ```
//!
//! # Modules
//!
//! - [`plan`]: limb width and limb count selection under the mantissa bound
//! - [`codec`]: scalar / limb-plane conversion with a shared exponent
//! - [`workspace`]: the grow-only host buffers owned by one engine
//! - [`conv`]: schoolbook and Karatsuba convolution over limb planes
//! - [`blas`]: the double-precision CBLAS provider
//! - [`timers`]: process-wide additive phase timing
//!
//! # Choosing a schedule
//!
//! [`Convolution::Karatsuba`] is the default and wins once the limb count is
//! more than a handful; [`Convolution::Schoolbook`] is the reference
//! schedule. Both produce bit-identical results.
//!
//! # Parallelism
//!
//! With the default `parallel` feature the codec and convolution loops run
//! on a rayon pool. Setting `LIMBMAT_NUM_THREADS` gives the engine a private
//! pool of that size; otherwise the global pool is used. One engine instance
//! serves one call at a time; concurrent calls need separate instances.

pub mod blas;
pub mod codec;
pub mod conv;
mod engine;
mod error;
pub mod plan;
pub mod timers;
pub mod workspace;

pub use blas::{Layout, Transpose, Uplo};
pub use conv::Convolution;
pub use engine::{base_case_mul, random_float_vector, Engine, THREADS_ENV};
pub use error::{Error, Result};
pub use plan::Plan;
pub use workspace::Workspace;

// The scalar type of every public matrix argument.
pub use rug;
pub use rug::Float;
