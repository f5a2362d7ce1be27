//! Direct O(S^2) limb convolution.
//!
//! Output planes are independent, so the outer loop over the output limb
//! index parallelizes with no shared writes. Within one plane the inner
//! accumulation runs in ascending `j`, which makes the schedule fully
//! deterministic.

use super::{GemmShape, PlaneDims, SyrkShape};
use crate::plan::Plan;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub(super) fn gemm(
    a: &[f64],
    b: &[f64],
    c: &mut [f64],
    plan: &Plan,
    shape: &GemmShape,
    dims: &PlaneDims,
) {
    let (sa, sb, sc) = (plan.size_a, plan.size_b, plan.size_c);

    let plane = |i: usize, ci: &mut [f64]| {
        for j in 0..=i {
            let l = i - j;
            if j < sa && l < sb {
                shape.run(
                    &a[j * dims.a..(j + 1) * dims.a],
                    &b[l * dims.b..(l + 1) * dims.b],
                    ci,
                );
            }
        }
    };

    #[cfg(feature = "parallel")]
    c[..sc * dims.c]
        .par_chunks_mut(dims.c)
        .enumerate()
        .for_each(|(i, ci)| plane(i, ci));

    #[cfg(not(feature = "parallel"))]
    for (i, ci) in c[..sc * dims.c].chunks_mut(dims.c).enumerate() {
        plane(i, ci);
    }
}

/// SYRK convolution with the parity trick: for output plane `i` only the
/// pairs `j < i - j` are multiplied, the accumulated block is added to its
/// own transpose, and even planes get the self product through one SYRK.
/// This halves the GEMM count of a symmetric GEMM schedule.
pub(super) fn syrk(
    a: &[f64],
    c: &mut [f64],
    t: &mut [f64],
    plan: &Plan,
    shape: &SyrkShape,
    dims: &PlaneDims,
) {
    let sa = plan.size_a;
    let sc = plan.size_c;
    let m = shape.m as usize;
    t[..sc * dims.c].fill(0.0);

    let plane = |i: usize, ci: &mut [f64], gi: &mut [f64]| {
        // Off-diagonal pairs accumulate into the scratch plane.
        for j in 0..(i / 2 + i % 2) {
            let l = i - j;
            if j < sa && l < sa {
                shape.run_pair(&a[j * dims.a..(j + 1) * dims.a], &a[l * dims.a..(l + 1) * dims.a], gi);
            }
        }
        // Upper triangle of G + G^T; the lower triangle stays zero.
        for v in 0..m {
            for u in 0..=v {
                ci[u + v * m] = gi[u + v * m] + gi[v + u * m];
            }
        }
        if i % 2 == 0 {
            let h = i / 2;
            if h < sa {
                shape.run_self(&a[h * dims.a..(h + 1) * dims.a], ci);
            }
        }
    };

    #[cfg(feature = "parallel")]
    c[..sc * dims.c]
        .par_chunks_mut(dims.c)
        .zip(t[..sc * dims.c].par_chunks_mut(dims.c))
        .enumerate()
        .for_each(|(i, (ci, gi))| plane(i, ci, gi));

    #[cfg(not(feature = "parallel"))]
    for (i, (ci, gi)) in c[..sc * dims.c]
        .chunks_mut(dims.c)
        .zip(t[..sc * dims.c].chunks_mut(dims.c))
        .enumerate()
    {
        plane(i, ci, gi);
    }
}
