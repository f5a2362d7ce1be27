//! Limb-plane convolution.
//!
//! The product of two limb-decomposed matrices is a polynomial product over
//! the limb index: output plane `i` accumulates `A[j] * B[i - j]` for every
//! `j <= i`, where each `*` is one double-precision GEMM over the matching
//! planes. Two schedules are provided:
//!
//! - [`Convolution::Schoolbook`]: the direct O(S^2) double loop. One GEMM
//!   per `(i, j)` pair, output planes computed independently.
//! - [`Convolution::Karatsuba`]: divide and conquer on the limb axis,
//!   reducing the GEMM count to O(S^log2(3)) at the cost of plane additions
//!   and scratch space carved from the tail of the C buffer. The limb count
//!   is rounded up to a power of two for recursion symmetry and the excess
//!   planes are trimmed before decoding.
//!
//! Both schedules accumulate exact integers, so they produce identical limb
//! planes and the runtime selector is purely a performance choice.
//!
//! Layout and transpose flags are resolved once per call into column-major
//! BLAS arguments: each operand's effective transpose is the XOR of
//! "layout is row-major" with its user flag, and a row-major output is
//! produced through the operand-swap identity `C^T = op(B)^T * op(A)^T`.

mod karatsuba;
mod schoolbook;

use crate::blas::{self, Layout, Transpose, Uplo};
use crate::plan::Plan;
use crate::workspace::Workspace;

/// Convolution schedule over the limb index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Convolution {
    /// Direct O(S^2) accumulation. Reference schedule, preferable for small
    /// limb counts.
    Schoolbook,
    /// Karatsuba recursion on the limb axis.
    #[default]
    Karatsuba,
}

/// Element counts of one plane of each operand.
#[derive(Debug, Clone, Copy)]
pub struct PlaneDims {
    /// Elements per A plane (`m * k`).
    pub a: usize,
    /// Elements per B plane (`k * n`).
    pub b: usize,
    /// Elements per C plane (`m * n`, or `m * m` for SYRK).
    pub c: usize,
}

/// A GEMM plane call resolved to column-major BLAS arguments.
#[derive(Debug, Clone, Copy)]
pub struct GemmShape {
    /// Operands are swapped (row-major output via the transpose identity).
    pub swap: bool,
    pub trans_first: Transpose,
    pub trans_second: Transpose,
    pub m: i32,
    pub n: i32,
    pub k: i32,
    pub ld_first: i32,
    pub ld_second: i32,
    pub ldc: i32,
}

impl GemmShape {
    /// Resolve user layout and transpose flags into the native column-major
    /// orientation of the BLAS.
    pub fn resolve(
        layout: Layout,
        trans_a: Transpose,
        trans_b: Transpose,
        m: usize,
        n: usize,
        k: usize,
    ) -> Self {
        let (mi, ni, ki) = (m as i32, n as i32, k as i32);
        match layout {
            Layout::ColMajor => GemmShape {
                swap: false,
                trans_first: trans_a,
                trans_second: trans_b,
                m: mi,
                n: ni,
                k: ki,
                ld_first: if trans_a == Transpose::NoTrans { mi } else { ki },
                ld_second: if trans_b == Transpose::NoTrans { ki } else { ni },
                ldc: mi,
            },
            // A row-major buffer read column-major is the transpose, so the
            // call computes C^T = op(B)^T * op(A)^T; the output buffer then
            // reads back row-major as C.
            Layout::RowMajor => GemmShape {
                swap: true,
                trans_first: trans_b,
                trans_second: trans_a,
                m: ni,
                n: mi,
                k: ki,
                ld_first: if trans_b == Transpose::NoTrans { ni } else { ki },
                ld_second: if trans_a == Transpose::NoTrans { ki } else { mi },
                ldc: ni,
            },
        }
    }

    /// One accumulating plane GEMM: `c += op(a) * op(b)`.
    pub fn run(&self, a_plane: &[f64], b_plane: &[f64], c_plane: &mut [f64]) {
        let (first, second) = if self.swap {
            (b_plane, a_plane)
        } else {
            (a_plane, b_plane)
        };
        blas::dgemm(
            Layout::ColMajor,
            self.trans_first,
            self.trans_second,
            self.m,
            self.n,
            self.k,
            1.0,
            first,
            self.ld_first,
            second,
            self.ld_second,
            1.0,
            c_plane,
            self.ldc,
        );
    }
}

/// A SYRK plane call resolved to column-major BLAS arguments. The output
/// convention is fixed: valid data lives in the column-major upper triangle.
#[derive(Debug, Clone, Copy)]
pub struct SyrkShape {
    pub trans: Transpose,
    pub m: i32,
    pub k: i32,
    pub lda: i32,
}

impl SyrkShape {
    pub fn resolve(layout: Layout, trans_a: Transpose, m: usize, k: usize) -> Self {
        let row = layout == Layout::RowMajor;
        let flipped = trans_a == Transpose::Trans;
        let trans = if row != flipped {
            Transpose::Trans
        } else {
            Transpose::NoTrans
        };
        let stored_ld = if row {
            if trans_a == Transpose::NoTrans { k } else { m }
        } else if trans_a == Transpose::NoTrans {
            m
        } else {
            k
        };
        SyrkShape {
            trans,
            m: m as i32,
            k: k as i32,
            lda: stored_ld as i32,
        }
    }

    /// Accumulate the self product `c += op(a) * op(a)^T` into the upper
    /// triangle of the plane.
    pub fn run_self(&self, a_plane: &[f64], c_plane: &mut [f64]) {
        blas::dsyrk(
            Layout::ColMajor,
            Uplo::Upper,
            self.trans,
            self.m,
            self.k,
            1.0,
            a_plane,
            self.lda,
            1.0,
            c_plane,
            self.m,
        );
    }

    /// Accumulate the cross product `c += op(a_j) * op(a_l)^T` over the full
    /// plane.
    pub fn run_pair(&self, a_j: &[f64], a_l: &[f64], c_plane: &mut [f64]) {
        blas::dgemm(
            Layout::ColMajor,
            self.trans,
            self.trans.flip(),
            self.m,
            self.m,
            self.k,
            1.0,
            a_j,
            self.lda,
            a_l,
            self.lda,
            1.0,
            c_plane,
            self.m,
        );
    }
}

/// Limb span of the Karatsuba recursion for `size_c` output planes.
pub fn karatsuba_span(size_c: usize) -> usize {
    size_c.next_power_of_two()
}

/// Scratch elements the GEMM Karatsuba recursion consumes beyond its
/// `2 * padded` output planes.
pub fn gemm_scratch(padded: usize, dims: &PlaneDims) -> usize {
    if padded <= 1 {
        0
    } else {
        (padded - 1) * (dims.a + dims.b) + (2 * padded - 2) * dims.c
    }
}

/// Scratch elements of the SYRK Karatsuba recursion.
pub fn syrk_scratch(padded: usize, dims: &PlaneDims) -> usize {
    if padded <= 1 {
        0
    } else {
        (padded - 1) * dims.a + (2 * padded - 2) * dims.c
    }
}

/// Run the limb convolution for a GEMM. The output planes of `ws.c` must be
/// zeroed by the caller; for the Karatsuba schedule the A and B planes
/// beyond the encoded limb counts must be zeroed up to the padded span.
pub fn gemm_limbs(
    ws: &mut Workspace,
    plan: &Plan,
    algorithm: Convolution,
    shape: &GemmShape,
    dims: &PlaneDims,
) {
    match algorithm {
        Convolution::Schoolbook => schoolbook::gemm(&ws.a, &ws.b, &mut ws.c, plan, shape, dims),
        Convolution::Karatsuba => {
            let padded = karatsuba_span(plan.size_c);
            let (out, scratch) = ws.c.split_at_mut(2 * padded * dims.c);
            karatsuba::gemm(
                &ws.a[..padded * dims.a],
                &ws.b[..padded * dims.b],
                out,
                scratch,
                padded,
                dims,
                shape,
            );
        }
    }
}

/// Run the limb convolution for a SYRK. Output planes carry valid data in
/// the column-major upper triangle only; the lower triangle stays zero.
pub fn syrk_limbs(
    ws: &mut Workspace,
    plan: &Plan,
    algorithm: Convolution,
    shape: &SyrkShape,
    dims: &PlaneDims,
) {
    match algorithm {
        Convolution::Schoolbook => {
            schoolbook::syrk(&ws.a, &mut ws.c, &mut ws.t, plan, shape, dims)
        }
        Convolution::Karatsuba => {
            let padded = karatsuba_span(plan.size_c);
            let (out, scratch) = ws.c.split_at_mut(2 * padded * dims.c);
            karatsuba::syrk(&ws.a[..padded * dims.a], out, scratch, padded, dims, shape);
        }
    }
}
