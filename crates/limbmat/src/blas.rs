//! Double-precision BLAS provider.
//!
//! The convolution engine issues all of its floating-point work through the
//! two level-3 routines declared here. The provider is selected at build
//! time (`openblas` by default, `accelerate` on macOS); there is no software
//! fallback, so disabling every provider feature is a compile error.
//!
//! The wrappers keep the CBLAS calling convention, including the layout
//! parameter, although the engine itself always resolves its plane calls to
//! column-major before reaching this module.

use std::os::raw::c_int;

/// Memory layout of a matrix argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    RowMajor,
    ColMajor,
}

/// Per-operand transpose flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    NoTrans,
    Trans,
}

impl Transpose {
    /// The opposite flag.
    pub fn flip(self) -> Self {
        match self {
            Transpose::NoTrans => Transpose::Trans,
            Transpose::Trans => Transpose::NoTrans,
        }
    }
}

/// Triangle selector for symmetric updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uplo {
    Upper,
    Lower,
}

// CBLAS enum values from the C headers.
const CBLAS_ROW_MAJOR: c_int = 101;
const CBLAS_COL_MAJOR: c_int = 102;
const CBLAS_NO_TRANS: c_int = 111;
const CBLAS_TRANS: c_int = 112;
const CBLAS_UPPER: c_int = 121;
const CBLAS_LOWER: c_int = 122;

fn to_cblas_layout(layout: Layout) -> c_int {
    match layout {
        Layout::RowMajor => CBLAS_ROW_MAJOR,
        Layout::ColMajor => CBLAS_COL_MAJOR,
    }
}

fn to_cblas_trans(trans: Transpose) -> c_int {
    match trans {
        Transpose::NoTrans => CBLAS_NO_TRANS,
        Transpose::Trans => CBLAS_TRANS,
    }
}

fn to_cblas_uplo(uplo: Uplo) -> c_int {
    match uplo {
        Uplo::Upper => CBLAS_UPPER,
        Uplo::Lower => CBLAS_LOWER,
    }
}

#[cfg(not(any(feature = "openblas", feature = "accelerate")))]
compile_error!(
    "a BLAS provider is required: enable the `openblas` or `accelerate` feature"
);

#[cfg_attr(feature = "openblas", link(name = "openblas"))]
#[cfg_attr(
    all(feature = "accelerate", not(feature = "openblas")),
    link(name = "Accelerate", kind = "framework")
)]
extern "C" {
    fn cblas_dgemm(
        layout: c_int,
        transa: c_int,
        transb: c_int,
        m: c_int,
        n: c_int,
        k: c_int,
        alpha: f64,
        a: *const f64,
        lda: c_int,
        b: *const f64,
        ldb: c_int,
        beta: f64,
        c: *mut f64,
        ldc: c_int,
    );

    fn cblas_dsyrk(
        layout: c_int,
        uplo: c_int,
        trans: c_int,
        n: c_int,
        k: c_int,
        alpha: f64,
        a: *const f64,
        lda: c_int,
        beta: f64,
        c: *mut f64,
        ldc: c_int,
    );
}

/// `C := alpha * op(A) * op(B) + beta * C` in double precision.
#[allow(clippy::too_many_arguments)]
pub fn dgemm(
    layout: Layout,
    trans_a: Transpose,
    trans_b: Transpose,
    m: i32,
    n: i32,
    k: i32,
    alpha: f64,
    a: &[f64],
    lda: i32,
    b: &[f64],
    ldb: i32,
    beta: f64,
    c: &mut [f64],
    ldc: i32,
) {
    debug_assert!(m >= 0 && n >= 0 && k >= 0);
    unsafe {
        cblas_dgemm(
            to_cblas_layout(layout),
            to_cblas_trans(trans_a),
            to_cblas_trans(trans_b),
            m,
            n,
            k,
            alpha,
            a.as_ptr(),
            lda,
            b.as_ptr(),
            ldb,
            beta,
            c.as_mut_ptr(),
            ldc,
        );
    }
}

/// `C := alpha * op(A) * op(A)^T + beta * C`, touching one triangle of C.
#[allow(clippy::too_many_arguments)]
pub fn dsyrk(
    layout: Layout,
    uplo: Uplo,
    trans: Transpose,
    n: i32,
    k: i32,
    alpha: f64,
    a: &[f64],
    lda: i32,
    beta: f64,
    c: &mut [f64],
    ldc: i32,
) {
    debug_assert!(n >= 0 && k >= 0);
    unsafe {
        cblas_dsyrk(
            to_cblas_layout(layout),
            to_cblas_uplo(uplo),
            to_cblas_trans(trans),
            n,
            k,
            alpha,
            a.as_ptr(),
            lda,
            beta,
            c.as_mut_ptr(),
            ldc,
        );
    }
}
