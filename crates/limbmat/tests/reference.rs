//! End-to-end checks against a straightforward high-precision reference.

use limbmat::{random_float_vector, Convolution, Engine, Layout, Transpose};
use rug::ops::CompleteRound;
use rug::Float;

/// Exact reference product of logical row-major matrices, evaluated at a
/// working precision wide enough to be exact, then rounded to `prec_out`.
fn reference_gemm(
    a: &[Float],
    b: &[Float],
    m: usize,
    n: usize,
    k: usize,
    prec_out: u32,
) -> Vec<Float> {
    let pa = a.iter().map(Float::prec).max().unwrap_or(64);
    let pb = b.iter().map(Float::prec).max().unwrap_or(64);
    let work = 2 * pa.max(pb) + 64;
    let mut out = Vec::with_capacity(m * n);
    for i in 0..m {
        for j in 0..n {
            let mut acc = Float::with_val(work, 0);
            for l in 0..k {
                acc += (&a[i * k + l] * &b[l * n + j]).complete(work);
            }
            out.push(Float::with_val(prec_out, &acc));
        }
    }
    out
}

/// Store a logical row-major matrix as the engine expects for the given
/// layout and transpose flag.
fn pack(logical: &[Float], rows: usize, cols: usize, layout: Layout, trans: Transpose) -> Vec<Float> {
    let (sr, sc) = match trans {
        Transpose::NoTrans => (rows, cols),
        Transpose::Trans => (cols, rows),
    };
    let get = |i: usize, j: usize| match trans {
        Transpose::NoTrans => logical[i * cols + j].clone(),
        Transpose::Trans => logical[j * cols + i].clone(),
    };
    let mut out = Vec::with_capacity(sr * sc);
    match layout {
        Layout::RowMajor => {
            for i in 0..sr {
                for j in 0..sc {
                    out.push(get(i, j));
                }
            }
        }
        Layout::ColMajor => {
            for j in 0..sc {
                for i in 0..sr {
                    out.push(get(i, j));
                }
            }
        }
    }
    out
}

/// Read an engine output back into logical row-major order.
fn unpack(stored: &[Float], rows: usize, cols: usize, layout: Layout) -> Vec<Float> {
    let mut out = Vec::with_capacity(rows * cols);
    for i in 0..rows {
        for j in 0..cols {
            let idx = match layout {
                Layout::RowMajor => i * cols + j,
                Layout::ColMajor => j * rows + i,
            };
            out.push(stored[idx].clone());
        }
    }
    out
}

fn assert_close(got: &Float, want: &Float, prec: u32, guard_bits: u32) {
    let work = prec + 64;
    let diff = (got - want).complete(work).abs();
    let mut scale = want.clone().abs();
    if scale < 1 {
        scale = Float::with_val(work, 1);
    }
    let mut tol = scale;
    tol >>= (prec - guard_bits) as i32;
    assert!(
        diff <= tol,
        "got {got}, want {want}, diff {diff} exceeds tolerance {tol}"
    );
}

#[test]
fn random_gemm_matches_reference_within_guard() {
    let (m, n, k) = (5, 4, 6);
    let prec = 192;
    let a = random_float_vector(m * k, prec, 42);
    let b = random_float_vector(k * n, prec, 43);
    let want = reference_gemm(&a, &b, m, n, k, prec);

    let mut engine = Engine::new();
    let mut c = vec![Float::new(prec); m * n];
    engine
        .gemm_reduced(
            Layout::RowMajor,
            Transpose::NoTrans,
            Transpose::NoTrans,
            m,
            n,
            k,
            &a,
            &b,
            &mut c,
        )
        .unwrap();

    // Guard of 2L bits, per the mantissa budget of the decomposition.
    let plan = limbmat::plan::plan_gemm(prec, prec, k, 0).unwrap();
    for (got, want) in c.iter().zip(&want) {
        assert_close(got, want, prec, 2 * plan.limb_bits);
    }
}

#[test]
fn every_layout_and_transpose_combination_is_correct() {
    let (m, n, k) = (2, 3, 4);
    let prec = 192;
    let a_logical = random_float_vector(m * k, prec, 7);
    let b_logical = random_float_vector(k * n, prec, 8);
    let want = reference_gemm(&a_logical, &b_logical, m, n, k, prec);
    let plan = limbmat::plan::plan_gemm(prec, prec, k, 0).unwrap();

    for layout in [Layout::RowMajor, Layout::ColMajor] {
        for trans_a in [Transpose::NoTrans, Transpose::Trans] {
            for trans_b in [Transpose::NoTrans, Transpose::Trans] {
                let a = pack(&a_logical, m, k, layout, trans_a);
                let b = pack(&b_logical, k, n, layout, trans_b);
                let mut c = vec![Float::new(prec); m * n];
                let mut engine = Engine::new();
                engine
                    .gemm_reduced(layout, trans_a, trans_b, m, n, k, &a, &b, &mut c)
                    .unwrap();
                let got = unpack(&c, m, n, layout);
                for (g, w) in got.iter().zip(&want) {
                    assert_close(g, w, prec, 2 * plan.limb_bits);
                }
            }
        }
    }
}

#[test]
fn schoolbook_and_karatsuba_agree_bitwise() {
    // Precisions chosen so the limb counts include non-powers of two.
    for &(dim, prec) in &[(3usize, 128u32), (4, 192), (5, 256), (8, 512)] {
        let a = random_float_vector(dim * dim, prec, 100 + dim as u64);
        let b = random_float_vector(dim * dim, prec, 200 + dim as u64);
        let mut c_school = vec![Float::new(prec); dim * dim];
        let mut c_kara = vec![Float::new(prec); dim * dim];

        Engine::with_convolution(Convolution::Schoolbook)
            .gemm_reduced(
                Layout::RowMajor,
                Transpose::NoTrans,
                Transpose::NoTrans,
                dim,
                dim,
                dim,
                &a,
                &b,
                &mut c_school,
            )
            .unwrap();
        Engine::with_convolution(Convolution::Karatsuba)
            .gemm_reduced(
                Layout::RowMajor,
                Transpose::NoTrans,
                Transpose::NoTrans,
                dim,
                dim,
                dim,
                &a,
                &b,
                &mut c_kara,
            )
            .unwrap();

        assert_eq!(c_school, c_kara, "paths diverge at dim {dim} prec {prec}");
    }
}

#[test]
fn syrk_agrees_with_gemm_against_own_transpose() {
    let (m, k) = (4, 5);
    let prec = 256;
    let a = random_float_vector(m * k, prec, 77);

    let mut c_syrk = vec![Float::new(prec); m * m];
    let mut engine = Engine::new();
    engine
        .syrk_reduced(Layout::RowMajor, Transpose::NoTrans, m, k, &a, &mut c_syrk)
        .unwrap();

    // B = A^T expressed through the transpose flag on the same storage.
    let mut c_gemm = vec![Float::new(prec); m * m];
    engine
        .gemm_reduced(
            Layout::RowMajor,
            Transpose::NoTrans,
            Transpose::Trans,
            m,
            m,
            k,
            &a,
            &a,
            &mut c_gemm,
        )
        .unwrap();

    assert_eq!(c_syrk, c_gemm);
    for u in 0..m {
        for v in 0..m {
            assert_eq!(c_syrk[u * m + v], c_syrk[v * m + u]);
        }
    }
}

#[test]
fn syrk_paths_agree_bitwise() {
    for &(m, k, prec) in &[(3usize, 7usize, 192u32), (6, 4, 256), (5, 5, 512)] {
        let a = random_float_vector(m * k, prec, 500 + m as u64);
        let mut c_school = vec![Float::new(prec); m * m];
        let mut c_kara = vec![Float::new(prec); m * m];
        Engine::with_convolution(Convolution::Schoolbook)
            .syrk_reduced(Layout::ColMajor, Transpose::NoTrans, m, k, &a, &mut c_school)
            .unwrap();
        Engine::with_convolution(Convolution::Karatsuba)
            .syrk_reduced(Layout::ColMajor, Transpose::NoTrans, m, k, &a, &mut c_kara)
            .unwrap();
        assert_eq!(c_school, c_kara, "m={m} k={k} prec={prec}");
    }
}

#[test]
fn syrk_transpose_flag_matches_reference() {
    let (m, k) = (3, 4);
    let prec = 192;
    let a_logical = random_float_vector(m * k, prec, 31);
    let want = {
        let at: Vec<Float> = pack(&a_logical, m, k, Layout::RowMajor, Transpose::Trans);
        reference_gemm(&a_logical, &at, m, m, k, prec)
    };
    let plan = limbmat::plan::plan_syrk(prec, k, 0).unwrap();

    for layout in [Layout::RowMajor, Layout::ColMajor] {
        for trans_a in [Transpose::NoTrans, Transpose::Trans] {
            let a = pack(&a_logical, m, k, layout, trans_a);
            let mut c = vec![Float::new(prec); m * m];
            let mut engine = Engine::new();
            engine
                .syrk_reduced(layout, trans_a, m, k, &a, &mut c)
                .unwrap();
            let got = unpack(&c, m, m, layout);
            for (g, w) in got.iter().zip(&want) {
                assert_close(g, w, prec, 2 * plan.limb_bits);
            }
        }
    }
}

#[test]
fn unequal_operand_precisions_round_to_shorter_window() {
    let (m, n, k) = (3, 3, 3);
    let (pa, pb) = (192u32, 512u32);
    let a = random_float_vector(m * k, pa, 3);
    let b = random_float_vector(k * n, pb, 4);
    let want = reference_gemm(&a, &b, m, n, k, pa);
    let plan = limbmat::plan::plan_gemm(pa, pb, k, 0).unwrap();

    let mut c = vec![Float::new(pa); m * n];
    Engine::new()
        .gemm_reduced(
            Layout::RowMajor,
            Transpose::NoTrans,
            Transpose::NoTrans,
            m,
            n,
            k,
            &a,
            &b,
            &mut c,
        )
        .unwrap();
    for (g, w) in c.iter().zip(&want) {
        assert_close(g, w, pa, 2 * plan.limb_bits);
    }
}
