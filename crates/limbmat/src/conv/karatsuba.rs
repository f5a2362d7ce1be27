//! Karatsuba recursion on the limb axis.
//!
//! For a span `s` (a power of two) the operands split into low and high
//! halves of `h = s / 2` planes each and the full product is assembled from
//! three half-size products:
//!
//! ```text
//! P_lo  = A_lo * B_lo                    -> out[0 .. s)
//! P_hi  = A_hi * B_hi                    -> out[s .. 2s)
//! P_mid = (A_lo + A_hi) * (B_lo + B_hi)  -> scratch, then
//! out[h .. h + s) += P_mid - P_lo - P_hi
//! ```
//!
//! The plane sums and the middle product live in the scratch region carved
//! from the tail of the C buffer; each level consumes its slice and hands
//! the rest to the recursion. The caller must zero the output region, and
//! pad the operands with zero planes up to the span.
//!
//! The SYRK variant is the same recursion with `B = A`: all three
//! sub-products are themselves self products, so every base case is a SYRK
//! touching only the column-major upper triangle, and the saving of the
//! symmetric schedule survives all the way down.

use super::{GemmShape, PlaneDims, SyrkShape};

pub(super) fn gemm(
    a: &[f64],
    b: &[f64],
    out: &mut [f64],
    scratch: &mut [f64],
    planes: usize,
    dims: &PlaneDims,
    shape: &GemmShape,
) {
    debug_assert!(planes.is_power_of_two());
    if planes == 1 {
        shape.run(&a[..dims.a], &b[..dims.b], &mut out[..dims.c]);
        return;
    }
    let s = planes;
    let h = s / 2;
    let (asum, rest) = scratch.split_at_mut(h * dims.a);
    let (bsum, rest) = rest.split_at_mut(h * dims.b);
    let (mid, rest) = rest.split_at_mut(s * dims.c);

    for p in 0..h * dims.a {
        asum[p] = a[p] + a[h * dims.a + p];
    }
    for p in 0..h * dims.b {
        bsum[p] = b[p] + b[h * dims.b + p];
    }

    mid.fill(0.0);
    gemm(asum, bsum, mid, rest, h, dims, shape);
    gemm(&a[..h * dims.a], &b[..h * dims.b], &mut out[..s * dims.c], rest, h, dims, shape);
    gemm(
        &a[h * dims.a..],
        &b[h * dims.b..],
        &mut out[s * dims.c..],
        rest,
        h,
        dims,
        shape,
    );

    // Middle term, then the overlapped add into out[h .. h + s).
    for p in 0..s * dims.c {
        mid[p] -= out[p] + out[s * dims.c + p];
    }
    let off = h * dims.c;
    for p in 0..s * dims.c {
        out[off + p] += mid[p];
    }
}

pub(super) fn syrk(
    a: &[f64],
    out: &mut [f64],
    scratch: &mut [f64],
    planes: usize,
    dims: &PlaneDims,
    shape: &SyrkShape,
) {
    debug_assert!(planes.is_power_of_two());
    if planes == 1 {
        shape.run_self(&a[..dims.a], &mut out[..dims.c]);
        return;
    }
    let s = planes;
    let h = s / 2;
    let (asum, rest) = scratch.split_at_mut(h * dims.a);
    let (mid, rest) = rest.split_at_mut(s * dims.c);

    for p in 0..h * dims.a {
        asum[p] = a[p] + a[h * dims.a + p];
    }

    mid.fill(0.0);
    syrk(asum, mid, rest, h, dims, shape);
    syrk(&a[..h * dims.a], &mut out[..s * dims.c], rest, h, dims, shape);
    syrk(&a[h * dims.a..], &mut out[s * dims.c..], rest, h, dims, shape);

    for p in 0..s * dims.c {
        mid[p] -= out[p] + out[s * dims.c + p];
    }
    let off = h * dims.c;
    for p in 0..s * dims.c {
        out[off + p] += mid[p];
    }
}

#[cfg(test)]
mod tests {
    use super::super::{gemm_scratch, karatsuba_span, syrk_scratch, Convolution, PlaneDims};
    use super::*;
    use crate::blas::{Layout, Transpose};

    fn dims_1x1() -> PlaneDims {
        PlaneDims { a: 1, b: 1, c: 1 }
    }

    /// With 1x1 planes the limb convolution degenerates to polynomial
    /// multiplication, which makes the schedule easy to check exactly.
    fn poly_mul_karatsuba(a: &[f64], b: &[f64]) -> Vec<f64> {
        let dims = dims_1x1();
        let span = karatsuba_span(a.len().max(b.len()));
        let shape = GemmShape::resolve(Layout::ColMajor, Transpose::NoTrans, Transpose::NoTrans, 1, 1, 1);
        let mut ap = a.to_vec();
        ap.resize(span, 0.0);
        let mut bp = b.to_vec();
        bp.resize(span, 0.0);
        let mut out = vec![0.0; 2 * span];
        let mut scratch = vec![0.0; gemm_scratch(span, &dims)];
        gemm(&ap, &bp, &mut out, &mut scratch, span, &dims, &shape);
        out
    }

    fn poly_mul_reference(a: &[f64], b: &[f64], len: usize) -> Vec<f64> {
        let mut out = vec![0.0; len];
        for (j, &x) in a.iter().enumerate() {
            for (l, &y) in b.iter().enumerate() {
                out[j + l] += x * y;
            }
        }
        out
    }

    #[test]
    fn matches_schoolbook_polynomials() {
        for len in [1usize, 2, 3, 4, 5, 8, 11, 16] {
            let a: Vec<f64> = (0..len).map(|i| (i as f64) - 2.0).collect();
            let b: Vec<f64> = (0..len).map(|i| (3 * i + 1) as f64).collect();
            let got = poly_mul_karatsuba(&a, &b);
            let span = karatsuba_span(len);
            let want = poly_mul_reference(&a, &b, 2 * span);
            assert_eq!(got, want, "len = {len}");
        }
    }

    #[test]
    fn syrk_matches_self_convolution() {
        let dims = dims_1x1();
        let a = [2.0, -1.0, 4.0, 3.0, 0.0, 5.0, -2.0, 1.0];
        let span = karatsuba_span(a.len());
        let shape = super::super::SyrkShape::resolve(Layout::ColMajor, Transpose::NoTrans, 1, 1);
        let mut out = vec![0.0; 2 * span];
        let mut scratch = vec![0.0; syrk_scratch(span, &dims)];
        syrk(&a, &mut out, &mut scratch, span, &dims, &shape);
        let want = poly_mul_reference(&a, &a, 2 * span);
        assert_eq!(out, want);
    }

    #[test]
    fn span_rounding_trims_cleanly() {
        // A 5-limb input padded to span 8 must put zeros in every plane
        // beyond the true product degree.
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let got = poly_mul_karatsuba(&a, &a);
        let want = poly_mul_reference(&a, &a, got.len());
        assert_eq!(got, want);
        assert!(got[9..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn selector_default_is_karatsuba() {
        assert_eq!(Convolution::default(), Convolution::Karatsuba);
    }
}
