//! Multi-GPU orchestration for the limbmat engine.
//!
//! The limb pipeline stays on the host: planning, encoding and decoding run
//! through the `limbmat` crate unchanged. This crate replaces the
//! convolution step: the A and B limb buffers are broadcast to every device
//! (any device may need any limb plane), the output limb index is
//! partitioned into contiguous ranges with the dynamic rule
//! `device = i * gpu_count / size_c`, and each device runs the schoolbook
//! accumulation for its planes through cuBLAS, copying each finished plane
//! back while the remaining planes are still in flight.
//!
//! The SYRK schedule keeps the symmetry saving on the device: per plane,
//! GEMMs for the pairs `j < i - j`, a `geam` transpose-add staged through
//! the device B mirror, and a `dsyrk` for even planes. No host round-trip
//! happens between those steps.
//!
//! Depending on this crate is the build-time accelerator switch: the
//! CPU-only `limbmat` build never links the CUDA runtime.
//!
//! # Quick start
//!
//! ```ignore
//! use limbmat_cuda::CudaEngine;
//! use limbmat::{Layout, Transpose};
//!
//! let mut engine = CudaEngine::new();
//! // With zero visible devices every call transparently runs the host path.
//! engine.gemm_reduced(Layout::RowMajor, Transpose::NoTrans, Transpose::NoTrans,
//!                     m, n, k, &a, &b, &mut c)?;
//! ```

mod context;
mod error;
mod memory;

pub use context::DeviceContext;
pub use error::{CudaError, Result};
pub use memory::DeviceMirror;

use cudarc::cublas::sys as cublas_sys;
use cudarc::cublas::{Gemm, GemmConfig};
use cudarc::driver::{DevicePtr, DevicePtrMut};
use limbmat::conv::{GemmShape, PlaneDims, SyrkShape};
use limbmat::{codec, plan, timers, Engine, Error, Float, Layout, Transpose};
use std::ops::Range;
use std::time::Instant;

/// An engine instance with device mirrors. Falls back to the host engine
/// when no device is visible (`gpu_count = 0`); extra devices beyond the
/// output limb count simply idle.
pub struct CudaEngine {
    host: Engine,
    devices: Vec<DeviceContext>,
    mirrors: Vec<DeviceMirror>,
    extra_limbs: usize,
}

impl Default for CudaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CudaEngine {
    /// Enumerate devices and build one cuBLAS handle per device. A missing
    /// driver is not an error; it yields a host-only engine.
    pub fn new() -> Self {
        let devices = DeviceContext::enumerate().unwrap_or_default();
        let mirrors = devices.iter().map(|_| DeviceMirror::new()).collect();
        CudaEngine {
            host: Engine::new(),
            devices,
            mirrors,
            extra_limbs: 0,
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Guard limbs appended to matrix outputs, mirrored onto the host
    /// fallback engine.
    pub fn set_extra_output_limbs(&mut self, limbs: usize) {
        self.extra_limbs = limbs;
        self.host.set_extra_output_limbs(limbs);
    }

    /// `C := op(A) * op(B)`, device-accelerated. Semantics match
    /// [`limbmat::Engine::gemm_reduced`]; results are bit-identical to the
    /// host path because limb accumulation is exact integer arithmetic.
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
            return Err(dimension_error("output dimensions must be positive"));
        }
        let prec_a = validate_matrix("A", a, m * k)?;
        let prec_b = validate_matrix("B", b, k * n)?;
        if c.len() != m * n {
            return Err(dimension_error("C length does not match m * n"));
        }
        if k == 0 {
            write_zeros(c);
            return Ok(());
        }
        if self.devices.is_empty() {
            return self
                .host
                .gemm_reduced(layout, trans_a, trans_b, m, n, k, a, b, c)
                .map_err(Into::into);
        }

        let total = Instant::now();
        let start = Instant::now();
        let plan = plan::plan_gemm(prec_a, prec_b, k, self.extra_limbs)?;
        let limb = plan.limb_bits;
        let dims = PlaneDims {
            a: m * k,
            b: k * n,
            c: m * n,
        };
        let shape = GemmShape::resolve(layout, trans_a, trans_b, m, n, k);
        let mem_a = plan.size_a * dims.a;
        let mem_b = plan.size_b * dims.b;
        let mem_c = plan.size_c * dims.c;

        let ws = self.host.workspace_mut();
        ws.ensure(mem_a, mem_b, mem_c).map_err(CudaError::Core)?;
        ws.c[..mem_c].fill(0.0);
        for (ctx, mirror) in self.devices.iter().zip(self.mirrors.iter_mut()) {
            mirror.ensure(&ctx.device, mem_a, mem_b, mem_c)?;
        }
        timers::record("gemm_reduced.precalculations", start.elapsed());

        let t = Instant::now();
        let ws = self.host.workspace_mut();
        let exp_a = codec::encode_matrix(a, &mut ws.a, plan.size_a, limb);
        let exp_b = codec::encode_matrix(b, &mut ws.b, plan.size_b, limb);
        timers::record("gemm_reduced.GMPtoDouble", t.elapsed());

        // Broadcast: every device may need every limb plane.
        let t = Instant::now();
        let (host_a, host_b) = (&ws.a[..mem_a], &ws.b[..mem_b]);
        broadcast(&mut self.devices, &mut self.mirrors, host_a, host_b, mem_c)?;
        timers::record("gemm_reduced.gpu_copy_forward", t.elapsed());

        let t = Instant::now();
        let ranges = plane_ranges(plan.size_c, self.devices.len());
        let chunks = chunk_output(&mut ws.c[..mem_c], &ranges, dims.c);
        std::thread::scope(|scope| {
            let mut tasks = Vec::new();
            for (((ctx, mirror), chunk), range) in self
                .devices
                .iter_mut()
                .zip(self.mirrors.iter_mut())
                .zip(chunks)
                .zip(ranges.iter().cloned())
            {
                tasks.push(scope.spawn(move || {
                    device_gemm_task(ctx, mirror, chunk, range, plan, shape, dims)
                }));
            }
            tasks
                .into_iter()
                .map(|t| t.join().expect("device thread panicked"))
                .collect::<Result<Vec<()>>>()
        })?;
        timers::record("gemm_reduced.multiplication", t.elapsed());

        // Per-plane copies back are interleaved with the multiplication;
        // one synchronize per device closes the call.
        let t = Instant::now();
        for ctx in &self.devices {
            ctx.device.synchronize()?;
        }
        timers::record("gemm_reduced.gpu_copy_back", t.elapsed());

        let t = Instant::now();
        let ws = self.host.workspace_mut();
        codec::decode_matrix(c, &ws.c, plan.size_c, limb, exp_a + exp_b - limb as i64);
        timers::record("gemm_reduced.DoubletoGMP", t.elapsed());

        timers::record("gemm_reduced.complete", total.elapsed());
        Ok(())
    }

    /// `C := op(A) * op(A)^T`, device-accelerated, `C` symmetric.
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
            return Err(dimension_error("output dimension must be positive"));
        }
        let prec_a = validate_matrix("A", a, m * k)?;
        if c.len() != m * m {
            return Err(dimension_error("C length does not match m * m"));
        }
        if k == 0 {
            write_zeros(c);
            return Ok(());
        }
        if self.devices.is_empty() {
            return self
                .host
                .syrk_reduced(layout, trans_a, m, k, a, c)
                .map_err(Into::into);
        }

        let total = Instant::now();
        let start = Instant::now();
        let plan = plan::plan_syrk(prec_a, k, self.extra_limbs)?;
        let limb = plan.limb_bits;
        let dims = PlaneDims {
            a: m * k,
            b: 0,
            c: m * m,
        };
        let shape = SyrkShape::resolve(layout, trans_a, m, k);
        let mem_a = plan.size_a * dims.a;
        let mem_c = plan.size_c * dims.c;

        let ws = self.host.workspace_mut();
        ws.ensure(mem_a, 0, mem_c).map_err(CudaError::Core)?;
        ws.c[..mem_c].fill(0.0);
        for (ctx, mirror) in self.devices.iter().zip(self.mirrors.iter_mut()) {
            // The device B mirror stages the transpose-add.
            mirror.ensure(&ctx.device, mem_a, mem_c, mem_c)?;
        }
        timers::record("syrk_reduced.precalculations", start.elapsed());

        let t = Instant::now();
        let ws = self.host.workspace_mut();
        let exp_a = codec::encode_matrix(a, &mut ws.a, plan.size_a, limb);
        timers::record("syrk_reduced.GMPtoDouble", t.elapsed());

        let t = Instant::now();
        let host_a = &ws.a[..mem_a];
        broadcast(&mut self.devices, &mut self.mirrors, host_a, &[], mem_c)?;
        timers::record("syrk_reduced.gpu_copy_forward", t.elapsed());

        let t = Instant::now();
        let ranges = plane_ranges(plan.size_c, self.devices.len());
        let chunks = chunk_output(&mut ws.c[..mem_c], &ranges, dims.c);
        std::thread::scope(|scope| {
            let mut tasks = Vec::new();
            for (((ctx, mirror), chunk), range) in self
                .devices
                .iter_mut()
                .zip(self.mirrors.iter_mut())
                .zip(chunks)
                .zip(ranges.iter().cloned())
            {
                tasks.push(scope.spawn(move || {
                    device_syrk_task(ctx, mirror, chunk, range, plan, shape, dims)
                }));
            }
            tasks
                .into_iter()
                .map(|t| t.join().expect("device thread panicked"))
                .collect::<Result<Vec<()>>>()
        })?;
        timers::record("syrk_reduced.multiplication", t.elapsed());

        let t = Instant::now();
        for ctx in &self.devices {
            ctx.device.synchronize()?;
        }
        timers::record("syrk_reduced.gpu_copy_back", t.elapsed());

        let t = Instant::now();
        let ws = self.host.workspace_mut();
        codec::decode_matrix_symmetric(c, m, &ws.c, plan.size_c, limb, 2 * exp_a - limb as i64);
        timers::record("syrk_reduced.DoubletoGMP", t.elapsed());

        timers::record("syrk_reduced.complete", total.elapsed());
        Ok(())
    }
}

fn dimension_error(msg: &str) -> CudaError {
    CudaError::Core(Error::DimensionMismatch(msg.into()))
}

fn validate_matrix(name: &str, mat: &[Float], expect: usize) -> Result<u32> {
    if mat.len() != expect {
        return Err(dimension_error(&format!(
            "{name}: expected {expect} entries, got {}",
            mat.len()
        )));
    }
    let prec = mat.first().map(Float::prec).unwrap_or(64);
    for x in mat {
        if x.prec() != prec {
            return Err(dimension_error(&format!(
                "{name}: entries must share one precision"
            )));
        }
        if !x.is_finite() {
            return Err(dimension_error(&format!("{name}: non-finite entry")));
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

/// Contiguous output-plane range owned by each device under the dynamic
/// assignment `device = i * gpu_count / size_c`.
fn plane_ranges(size_c: usize, gpu_count: usize) -> Vec<Range<usize>> {
    (0..gpu_count)
        .map(|d| {
            let start = (d * size_c).div_ceil(gpu_count);
            let end = ((d + 1) * size_c).div_ceil(gpu_count);
            start..end.min(size_c)
        })
        .collect()
}

/// Split the active host C region into one contiguous chunk per device.
fn chunk_output<'w>(
    c: &'w mut [f64],
    ranges: &[Range<usize>],
    plane: usize,
) -> Vec<&'w mut [f64]> {
    let mut chunks = Vec::with_capacity(ranges.len());
    let mut rest = c;
    for range in ranges {
        let (head, tail) = rest.split_at_mut(range.len() * plane);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

fn broadcast(
    devices: &mut [DeviceContext],
    mirrors: &mut [DeviceMirror],
    host_a: &[f64],
    host_b: &[f64],
    mem_c: usize,
) -> Result<()> {
    std::thread::scope(|scope| {
        let mut tasks = Vec::new();
        for (ctx, mirror) in devices.iter_mut().zip(mirrors.iter_mut()) {
            tasks.push(scope.spawn(move || -> Result<()> {
                ctx.device.bind_to_thread()?;
                {
                    let mut view = mirror.a_mut().slice_mut(0..host_a.len());
                    ctx.device.htod_sync_copy_into(host_a, &mut view)?;
                }
                if !host_b.is_empty() {
                    let mut view = mirror.b_mut().slice_mut(0..host_b.len());
                    ctx.device.htod_sync_copy_into(host_b, &mut view)?;
                }
                let (_, _, d_c) = mirror.split();
                let mut view = d_c.slice_mut(0..mem_c);
                ctx.device.memset_zeros(&mut view)?;
                Ok(())
            }));
        }
        tasks
            .into_iter()
            .map(|t| t.join().expect("device thread panicked"))
            .collect::<Result<Vec<()>>>()
    })?;
    Ok(())
}

fn cublas_op(trans: Transpose) -> cublas_sys::cublasOperation_t {
    match trans {
        Transpose::NoTrans => cublas_sys::cublasOperation_t::CUBLAS_OP_N,
        Transpose::Trans => cublas_sys::cublasOperation_t::CUBLAS_OP_T,
    }
}

fn check(call: &'static str, status: cublas_sys::cublasStatus_t) -> Result<()> {
    if status == cublas_sys::cublasStatus_t::CUBLAS_STATUS_SUCCESS {
        Ok(())
    } else {
        Err(CudaError::BlasStatus {
            call,
            status: status as u32,
        })
    }
}

/// All GEMMs contributing to this device's output planes, each plane copied
/// back as soon as it is complete.
fn device_gemm_task(
    ctx: &mut DeviceContext,
    mirror: &mut DeviceMirror,
    chunk: &mut [f64],
    range: Range<usize>,
    plan: plan::Plan,
    shape: GemmShape,
    dims: PlaneDims,
) -> Result<()> {
    if range.is_empty() {
        return Ok(());
    }
    ctx.device.bind_to_thread()?;
    let (d_a, b_mirror, d_c) = mirror.split();
    let d_b: &cudarc::driver::CudaSlice<f64> = b_mirror;
    let cfg = GemmConfig {
        transa: cublas_op(shape.trans_first),
        transb: cublas_op(shape.trans_second),
        m: shape.m,
        n: shape.n,
        k: shape.k,
        alpha: 1.0,
        lda: shape.ld_first,
        ldb: shape.ld_second,
        beta: 1.0,
        ldc: shape.ldc,
    };

    for i in range.clone() {
        for j in 0..=i {
            let l = i - j;
            if j >= plan.size_a || l >= plan.size_b {
                continue;
            }
            let a_view = d_a.slice(j * dims.a..(j + 1) * dims.a);
            let b_view = d_b.slice(l * dims.b..(l + 1) * dims.b);
            let mut c_view = d_c.slice_mut(i * dims.c..(i + 1) * dims.c);
            unsafe {
                if shape.swap {
                    ctx.blas.gemm(cfg, &b_view, &a_view, &mut c_view)?;
                } else {
                    ctx.blas.gemm(cfg, &a_view, &b_view, &mut c_view)?;
                }
            }
        }
        let plane = d_c.slice(i * dims.c..(i + 1) * dims.c);
        let offset = (i - range.start) * dims.c;
        ctx.device
            .dtoh_sync_copy_into(&plane, &mut chunk[offset..offset + dims.c])?;
    }
    Ok(())
}

/// SYRK planes for one device: pair GEMMs, device-side transpose-add, and
/// the self product on even planes, then the copy back.
fn device_syrk_task(
    ctx: &mut DeviceContext,
    mirror: &mut DeviceMirror,
    chunk: &mut [f64],
    range: Range<usize>,
    plan: plan::Plan,
    shape: SyrkShape,
    dims: PlaneDims,
) -> Result<()> {
    if range.is_empty() {
        return Ok(());
    }
    ctx.device.bind_to_thread()?;
    let (d_a, d_b, d_c) = mirror.split();
    let handle = *ctx.blas.handle();
    let m = shape.m;
    let pair_cfg = GemmConfig {
        transa: cublas_op(shape.trans),
        transb: cublas_op(shape.trans.flip()),
        m,
        n: m,
        k: shape.k,
        alpha: 1.0,
        lda: shape.lda,
        ldb: shape.lda,
        beta: 1.0,
        ldc: m,
    };
    let (alpha, beta) = (1.0f64, 1.0f64);

    for i in range.clone() {
        for j in 0..(i / 2 + i % 2) {
            let l = i - j;
            if j >= plan.size_a || l >= plan.size_a {
                continue;
            }
            let a_j = d_a.slice(j * dims.a..(j + 1) * dims.a);
            let a_l = d_a.slice(l * dims.a..(l + 1) * dims.a);
            let mut c_view = d_c.slice_mut(i * dims.c..(i + 1) * dims.c);
            unsafe {
                ctx.blas.gemm(pair_cfg, &a_j, &a_l, &mut c_view)?;
            }
        }

        // C[i] += C[i]^T, staged through the B mirror, no host round-trip.
        {
            let c_view = d_c.slice(i * dims.c..(i + 1) * dims.c);
            let mut stage = d_b.slice_mut(i * dims.c..(i + 1) * dims.c);
            ctx.device.dtod_copy(&c_view, &mut stage)?;
        }
        {
            let stage = d_b.slice(i * dims.c..(i + 1) * dims.c);
            let mut c_view = d_c.slice_mut(i * dims.c..(i + 1) * dims.c);
            let stage_ptr = *stage.device_ptr() as *const f64;
            let c_ptr = *c_view.device_ptr_mut() as *mut f64;
            unsafe {
                check(
                    "cublasDgeam",
                    cublas_sys::cublasDgeam(
                        handle,
                        cublas_sys::cublasOperation_t::CUBLAS_OP_T,
                        cublas_sys::cublasOperation_t::CUBLAS_OP_N,
                        m,
                        m,
                        &alpha,
                        stage_ptr,
                        m,
                        &beta,
                        c_ptr as *const f64,
                        m,
                        c_ptr,
                        m,
                    ),
                )?;
            }
        }

        // Even output significance carries the self product.
        if i % 2 == 0 && i / 2 < plan.size_a {
            let h = i / 2;
            let a_view = d_a.slice(h * dims.a..(h + 1) * dims.a);
            let mut c_view = d_c.slice_mut(i * dims.c..(i + 1) * dims.c);
            let a_ptr = *a_view.device_ptr() as *const f64;
            let c_ptr = *c_view.device_ptr_mut() as *mut f64;
            unsafe {
                check(
                    "cublasDsyrk",
                    cublas_sys::cublasDsyrk_v2(
                        handle,
                        cublas_sys::cublasFillMode_t::CUBLAS_FILL_MODE_UPPER,
                        cublas_op(shape.trans),
                        m,
                        shape.k,
                        &alpha,
                        a_ptr,
                        shape.lda,
                        &beta,
                        c_ptr,
                        m,
                    ),
                )?;
            }
        }

        let plane = d_c.slice(i * dims.c..(i + 1) * dims.c);
        let offset = (i - range.start) * dims.c;
        ctx.device
            .dtoh_sync_copy_into(&plane, &mut chunk[offset..offset + dims.c])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use limbmat::random_float_vector;

    fn floats(vals: &[i64], prec: u32) -> Vec<Float> {
        vals.iter().map(|&v| Float::with_val(prec, v)).collect()
    }

    #[test]
    fn engine_works_with_or_without_devices() {
        let mut engine = CudaEngine::new();
        let a = floats(&[1, 2, 3, 4], 128);
        let b = floats(&[5, 6, 7, 8], 128);
        let mut c = vec![Float::new(128); 4];
        engine
            .gemm_reduced(
                Layout::RowMajor,
                Transpose::NoTrans,
                Transpose::NoTrans,
                2,
                2,
                2,
                &a,
                &b,
                &mut c,
            )
            .unwrap();
        assert_eq!(c[0], 19);
        assert_eq!(c[1], 22);
        assert_eq!(c[2], 43);
        assert_eq!(c[3], 50);
    }

    #[test]
    fn gemm_matches_host_bitwise() {
        let mut engine = CudaEngine::new();
        if engine.device_count() == 0 {
            println!("CUDA not available, skipping test");
            return;
        }
        let (dim, prec) = (48, 512);
        let a = random_float_vector(dim * dim, prec, 21);
        let b = random_float_vector(dim * dim, prec, 22);

        let mut c_gpu = vec![Float::new(prec); dim * dim];
        engine
            .gemm_reduced(
                Layout::RowMajor,
                Transpose::NoTrans,
                Transpose::NoTrans,
                dim,
                dim,
                dim,
                &a,
                &b,
                &mut c_gpu,
            )
            .unwrap();

        let mut c_cpu = vec![Float::new(prec); dim * dim];
        Engine::new()
            .gemm_reduced(
                Layout::RowMajor,
                Transpose::NoTrans,
                Transpose::NoTrans,
                dim,
                dim,
                dim,
                &a,
                &b,
                &mut c_cpu,
            )
            .unwrap();

        assert_eq!(c_gpu, c_cpu);
    }

    #[test]
    fn syrk_matches_host_and_is_symmetric() {
        let mut engine = CudaEngine::new();
        if engine.device_count() == 0 {
            println!("CUDA not available, skipping test");
            return;
        }
        let (m, k, prec) = (16, 24, 256);
        let a = random_float_vector(m * k, prec, 33);

        let mut c_gpu = vec![Float::new(prec); m * m];
        engine
            .syrk_reduced(Layout::ColMajor, Transpose::NoTrans, m, k, &a, &mut c_gpu)
            .unwrap();

        let mut c_cpu = vec![Float::new(prec); m * m];
        Engine::new()
            .syrk_reduced(Layout::ColMajor, Transpose::NoTrans, m, k, &a, &mut c_cpu)
            .unwrap();

        assert_eq!(c_gpu, c_cpu);
        for u in 0..m {
            for v in 0..m {
                assert_eq!(c_gpu[u * m + v], c_gpu[v * m + u]);
            }
        }
    }

    #[test]
    fn plane_ranges_cover_and_tolerate_excess_devices() {
        for (sc, g) in [(7usize, 2usize), (4, 4), (3, 8), (16, 3)] {
            let ranges = plane_ranges(sc, g);
            let mut seen = Vec::new();
            for r in &ranges {
                seen.extend(r.clone());
            }
            assert_eq!(seen, (0..sc).collect::<Vec<_>>(), "sc={sc} g={g}");
            // Consistency with the dynamic rule.
            for (d, r) in ranges.iter().enumerate() {
                for i in r.clone() {
                    assert_eq!(i * g / sc, d);
                }
            }
        }
    }
}
