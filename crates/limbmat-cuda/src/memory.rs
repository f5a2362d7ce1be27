//! Grow-only device mirrors of the host workspace.
//!
//! Each device keeps a resident copy of the A, B and C limb buffers with the
//! same monotone-capacity discipline as the host workspace: capacities only
//! grow, and a growing buffer is released before its replacement is
//! allocated.

use crate::error::Result;
use cudarc::driver::{CudaDevice, CudaSlice};
use std::sync::Arc;

/// Device-resident A/B/C buffers for one accelerator.
#[derive(Default)]
pub struct DeviceMirror {
    a: Option<CudaSlice<f64>>,
    b: Option<CudaSlice<f64>>,
    c: Option<CudaSlice<f64>>,
}

fn grow(
    device: &Arc<CudaDevice>,
    slot: &mut Option<CudaSlice<f64>>,
    elements: usize,
) -> Result<()> {
    if elements == 0 {
        return Ok(());
    }
    if let Some(buf) = slot {
        if buf.len() >= elements {
            return Ok(());
        }
    }
    *slot = None;
    *slot = Some(device.alloc_zeros::<f64>(elements)?);
    Ok(())
}

impl DeviceMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure device capacities of at least the given element counts.
    pub fn ensure(
        &mut self,
        device: &Arc<CudaDevice>,
        mem_a: usize,
        mem_b: usize,
        mem_c: usize,
    ) -> Result<()> {
        grow(device, &mut self.a, mem_a)?;
        grow(device, &mut self.b, mem_b)?;
        grow(device, &mut self.c, mem_c)?;
        Ok(())
    }

    /// Borrow the three buffers at once (B mutably, it doubles as device
    /// scratch for the SYRK transpose-add). Must follow a successful
    /// [`ensure`](Self::ensure) covering each buffer used.
    pub(crate) fn split(
        &mut self,
    ) -> (&CudaSlice<f64>, &mut CudaSlice<f64>, &mut CudaSlice<f64>) {
        match (&self.a, &mut self.b, &mut self.c) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => unreachable!("DeviceMirror::split before ensure"),
        }
    }

    pub(crate) fn a_mut(&mut self) -> &mut CudaSlice<f64> {
        self.a.as_mut().expect("DeviceMirror::a_mut before ensure")
    }

    pub(crate) fn b_mut(&mut self) -> &mut CudaSlice<f64> {
        self.b.as_mut().expect("DeviceMirror::b_mut before ensure")
    }
}
