//! The engine: planning, encoding, convolution and decoding behind the
//! public `gemm_reduced` / `syrk_reduced` entry points.

use crate::blas::{Layout, Transpose};
use crate::codec;
use crate::conv::{self, Convolution, GemmShape, PlaneDims, SyrkShape};
use crate::error::{Error, Result};
use crate::plan;
use crate::timers;
use crate::workspace::Workspace;
use rug::Float;
use std::time::Instant;

/// Environment variable overriding the worker-pool size of one engine.
pub const THREADS_ENV: &str = "LIMBMAT_NUM_THREADS";

/// An arbitrary-precision matrix multiplication engine.
///
/// One engine owns one grow-only [`Workspace`]; calls borrow the engine
/// mutably, so an instance serves one call at a time. Concurrent calls need
/// separate instances.
///
/// # Example
///
/// ```
/// use limbmat::{Engine, Layout, Transpose};
/// use rug::Float;
///
/// let prec = 128;
/// let a: Vec<Float> = [1, 2, 3, 4].iter().map(|&v| Float::with_val(prec, v)).collect();
/// let b: Vec<Float> = [5, 6, 7, 8].iter().map(|&v| Float::with_val(prec, v)).collect();
/// let mut c = vec![Float::new(prec); 4];
///
/// let mut engine = Engine::new();
/// engine
///     .gemm_reduced(
///         Layout::RowMajor,
///         Transpose::NoTrans,
///         Transpose::NoTrans,
///         2,
///         2,
///         2,
///         &a,
///         &b,
///         &mut c,
///     )
///     .unwrap();
/// assert_eq!(c[0], 19);
/// assert_eq!(c[3], 50);
/// ```
pub struct Engine {
    workspace: Workspace,
    algorithm: Convolution,
    extra_limbs: usize,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

#[cfg(feature = "parallel")]
fn build_pool() -> Option<rayon::ThreadPool> {
    let threads = std::env::var(THREADS_ENV).ok()?.parse::<usize>().ok()?;
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .ok()
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine with the default Karatsuba convolution schedule.
    pub fn new() -> Self {
        Self::with_convolution(Convolution::default())
    }

    /// Engine with an explicit convolution schedule.
    pub fn with_convolution(algorithm: Convolution) -> Self {
        Engine {
            workspace: Workspace::new(),
            algorithm,
            extra_limbs: 0,
            #[cfg(feature = "parallel")]
            pool: build_pool(),
        }
    }

    pub fn convolution(&self) -> Convolution {
        self.algorithm
    }

    pub fn set_convolution(&mut self, algorithm: Convolution) {
        self.algorithm = algorithm;
    }

    /// Guard limbs appended to every matrix output beyond the planned count.
    ///
    /// Each guard limb extends the decoded result by one more `L`-bit window
    /// below the nominally justified precision, which pushes decode
    /// round-off further down at the cost of extra planes. The default is
    /// zero, matching the plain matrix pipeline; the single-scalar
    /// [`base_case_mul`] always carries its own guard.
    pub fn set_extra_output_limbs(&mut self, limbs: usize) {
        self.extra_limbs = limbs;
    }

    pub fn extra_output_limbs(&self) -> usize {
        self.extra_limbs
    }

    /// The host workspace (capacities are useful in tests and backends).
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Mutable workspace access for backend crates that drive the codec and
    /// planner themselves.
    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    /// `C := op(A) * op(B)` over arbitrary-precision matrices.
    ///
    /// `A` has `m * k` entries, `B` has `k * n`, `C` has `m * n`, all in the
    /// given layout. Entries of each operand must share one precision;
    /// the output keeps the precision of its own entries.
    #[allow(clippy::too_many_arguments)]
    pub fn gemm_reduced(
        &mut self,
        layout: Layout,
        trans_a: Transpose,
        trans_b: Transpose,
        m: usize,
        n: usize,
        k: usize,
        a: &[Float],
        b: &[Float],
        c: &mut [Float],
    ) -> Result<()> {
        if m == 0 || n == 0 {
            return Err(Error::DimensionMismatch(
                "output dimensions must be positive".into(),
            ));
        }
        let prec_a = validate_matrix("A", a, m * k)?;
        let prec_b = validate_matrix("B", b, k * n)?;
        if c.len() != m * n {
            return Err(Error::DimensionMismatch(format!(
                "C: expected {} entries, got {}",
                m * n,
                c.len()
            )));
        }
        if k == 0 {
            write_zeros(c);
            return Ok(());
        }

        let total = Instant::now();
        let algorithm = self.algorithm;
        let extra = self.extra_limbs;
        let ws = &mut self.workspace;
        let body = move || {
            gemm_body(
                ws, algorithm, extra, layout, trans_a, trans_b, m, n, k, prec_a, prec_b, a, b, c,
            )
        };

        #[cfg(feature = "parallel")]
        let result = match &self.pool {
            Some(pool) => pool.install(body),
            None => body(),
        };
        #[cfg(not(feature = "parallel"))]
        let result = body();

        timers::record("gemm_reduced.complete", total.elapsed());
        result
    }

    /// `C := op(A) * op(A)^T` over an arbitrary-precision matrix, `C`
    /// symmetric `m x m`. The upper triangle is computed and mirrored.
    pub fn syrk_reduced(
        &mut self,
        layout: Layout,
        trans_a: Transpose,
        m: usize,
        k: usize,
        a: &[Float],
        c: &mut [Float],
    ) -> Result<()> {
        if m == 0 {
            return Err(Error::DimensionMismatch(
                "output dimension must be positive".into(),
            ));
        }
        let prec_a = validate_matrix("A", a, m * k)?;
        if c.len() != m * m {
            return Err(Error::DimensionMismatch(format!(
                "C: expected {} entries, got {}",
                m * m,
                c.len()
            )));
        }
        if k == 0 {
            write_zeros(c);
            return Ok(());
        }

        let total = Instant::now();
        let algorithm = self.algorithm;
        let extra = self.extra_limbs;
        let ws = &mut self.workspace;
        let body = move || syrk_body(ws, algorithm, extra, layout, trans_a, m, k, prec_a, a, c);

        #[cfg(feature = "parallel")]
        let result = match &self.pool {
            Some(pool) => pool.install(body),
            None => body(),
        };
        #[cfg(not(feature = "parallel"))]
        let result = body();

        timers::record("syrk_reduced.complete", total.elapsed());
        result
    }
}

fn validate_matrix(name: &str, mat: &[Float], expect: usize) -> Result<u32> {
    if mat.len() != expect {
        return Err(Error::DimensionMismatch(format!(
            "{name}: expected {expect} entries, got {}",
            mat.len()
        )));
    }
    let prec = mat.first().map(Float::prec).unwrap_or(64);
    for x in mat {
        if x.prec() != prec {
            return Err(Error::DimensionMismatch(format!(
                "{name}: entries must share one precision"
            )));
        }
        if !x.is_finite() {
            return Err(Error::DimensionMismatch(format!("{name}: non-finite entry")));
        }
    }
    Ok(prec)
}

fn write_zeros(c: &mut [Float]) {
    for x in c {
        let prec = x.prec();
        *x = Float::new(prec);
    }
}

#[allow(clippy::too_many_arguments)]
fn gemm_body(
    ws: &mut Workspace,
    algorithm: Convolution,
    extra: usize,
    layout: Layout,
    trans_a: Transpose,
    trans_b: Transpose,
    m: usize,
    n: usize,
    k: usize,
    prec_a: u32,
    prec_b: u32,
    a: &[Float],
    b: &[Float],
    c: &mut [Float],
) -> Result<()> {
    let start = Instant::now();
    let plan = plan::plan_gemm(prec_a, prec_b, k, extra)?;
    let limb = plan.limb_bits;
    let dims = PlaneDims {
        a: m * k,
        b: k * n,
        c: m * n,
    };
    let shape = GemmShape::resolve(layout, trans_a, trans_b, m, n, k);

    let span = match algorithm {
        Convolution::Schoolbook => plan.size_c,
        Convolution::Karatsuba => conv::karatsuba_span(plan.size_c),
    };
    let (mem_a, mem_b, mem_c, out_len) = match algorithm {
        Convolution::Schoolbook => (
            plan.size_a * dims.a,
            plan.size_b * dims.b,
            (plan.size_c + 2) * dims.c,
            plan.size_c * dims.c,
        ),
        Convolution::Karatsuba => (
            plan.size_a.max(span) * dims.a,
            plan.size_b.max(span) * dims.b,
            2 * span * dims.c + conv::gemm_scratch(span, &dims) + 2 * dims.c,
            2 * span * dims.c,
        ),
    };
    ws.ensure(mem_a, mem_b, mem_c)?;
    ws.c[..out_len].fill(0.0);
    if algorithm == Convolution::Karatsuba {
        if span > plan.size_a {
            ws.a[plan.size_a * dims.a..span * dims.a].fill(0.0);
        }
        if span > plan.size_b {
            ws.b[plan.size_b * dims.b..span * dims.b].fill(0.0);
        }
    }
    timers::record("gemm_reduced.precalculations", start.elapsed());

    let t = Instant::now();
    let exp_a = codec::encode_matrix(a, &mut ws.a, plan.size_a, limb);
    let exp_b = codec::encode_matrix(b, &mut ws.b, plan.size_b, limb);
    timers::record("gemm_reduced.GMPtoDouble", t.elapsed());

    let t = Instant::now();
    conv::gemm_limbs(ws, &plan, algorithm, &shape, &dims);
    timers::record("gemm_reduced.multiplication", t.elapsed());

    let t = Instant::now();
    codec::decode_matrix(c, &ws.c, plan.size_c, limb, exp_a + exp_b - limb as i64);
    timers::record("gemm_reduced.DoubletoGMP", t.elapsed());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn syrk_body(
    ws: &mut Workspace,
    algorithm: Convolution,
    extra: usize,
    layout: Layout,
    trans_a: Transpose,
    m: usize,
    k: usize,
    prec_a: u32,
    a: &[Float],
    c: &mut [Float],
) -> Result<()> {
    let start = Instant::now();
    let plan = plan::plan_syrk(prec_a, k, extra)?;
    let limb = plan.limb_bits;
    let dims = PlaneDims {
        a: m * k,
        b: 0,
        c: m * m,
    };
    let shape = SyrkShape::resolve(layout, trans_a, m, k);

    let span = match algorithm {
        Convolution::Schoolbook => plan.size_c,
        Convolution::Karatsuba => conv::karatsuba_span(plan.size_c),
    };
    let (mem_a, mem_c, out_len) = match algorithm {
        Convolution::Schoolbook => (
            plan.size_a * dims.a,
            (plan.size_c + 2) * dims.c,
            plan.size_c * dims.c,
        ),
        Convolution::Karatsuba => (
            plan.size_a.max(span) * dims.a,
            2 * span * dims.c + conv::syrk_scratch(span, &dims) + 2 * dims.c,
            2 * span * dims.c,
        ),
    };
    ws.ensure(mem_a, 0, mem_c)?;
    ws.c[..out_len].fill(0.0);
    if algorithm == Convolution::Karatsuba && span > plan.size_a {
        ws.a[plan.size_a * dims.a..span * dims.a].fill(0.0);
    }
    timers::record("syrk_reduced.precalculations", start.elapsed());

    let t = Instant::now();
    let exp_a = codec::encode_matrix(a, &mut ws.a, plan.size_a, limb);
    timers::record("syrk_reduced.GMPtoDouble", t.elapsed());

    let t = Instant::now();
    conv::syrk_limbs(ws, &plan, algorithm, &shape, &dims);
    timers::record("syrk_reduced.multiplication", t.elapsed());

    let t = Instant::now();
    codec::decode_matrix_symmetric(c, m, &ws.c, plan.size_c, limb, 2 * exp_a - limb as i64);
    timers::record("syrk_reduced.DoubletoGMP", t.elapsed());
    Ok(())
}

/// Single-scalar product through the limb pipeline.
///
/// The decomposition, convolution and recombination are exactly the matrix
/// pipeline at `m = n = k = 1`; the output carries `ceil(53 / L)` guard
/// limbs. Mostly useful to validate the codec against the scalar library.
pub fn base_case_mul(dest: &mut Float, a: &Float, b: &Float) -> Result<()> {
    if !a.is_finite() || !b.is_finite() {
        return Err(Error::DimensionMismatch(
            "base_case_mul: non-finite operand".into(),
        ));
    }
    let plan = plan::plan_scalar(a.prec(), b.prec())?;
    let limb = plan.limb_bits;
    let mut a_buf = vec![0.0; plan.size_a];
    let mut b_buf = vec![0.0; plan.size_b];
    let mut c_buf = vec![0.0; plan.size_c];
    let exp_a = codec::encode_matrix(std::slice::from_ref(a), &mut a_buf, plan.size_a, limb);
    let exp_b = codec::encode_matrix(std::slice::from_ref(b), &mut b_buf, plan.size_b, limb);

    for i in 0..plan.size_c {
        for j in 0..=i {
            let l = i - j;
            if j < plan.size_a && l < plan.size_b {
                c_buf[i] += a_buf[j] * b_buf[l];
            }
        }
    }

    codec::decode_matrix(
        std::slice::from_mut(dest),
        &c_buf,
        plan.size_c,
        limb,
        exp_a + exp_b - limb as i64,
    );
    Ok(())
}

/// Uniform random scalars in `[-5, 5)` at the given precision, seeded for
/// reproducibility.
pub fn random_float_vector(len: usize, prec: u32, seed: u64) -> Vec<Float> {
    let mut state = rug::rand::RandState::new();
    state.seed(&rug::Integer::from(seed));
    (0..len)
        .map(|_| {
            let mut x = Float::with_val(prec, Float::random_bits(&mut state));
            x *= 10;
            x -= 5;
            x
        })
        .collect()
}
