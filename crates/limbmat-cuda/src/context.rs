//! Device enumeration and per-device handles.

use crate::error::Result;
use cudarc::cublas::CudaBlas;
use cudarc::driver::CudaDevice;
use std::sync::Arc;

/// One accelerator: its driver context plus a cuBLAS handle.
///
/// Handles are created once at engine construction and reused for every
/// call; within a call each device is driven by exactly one host thread.
pub struct DeviceContext {
    pub(crate) device: Arc<CudaDevice>,
    pub(crate) blas: CudaBlas,
    ordinal: usize,
}

impl DeviceContext {
    /// All visible devices, in ordinal order. An error here usually means
    /// no driver is present; callers fall back to the host path.
    pub fn enumerate() -> Result<Vec<DeviceContext>> {
        let count = CudaDevice::count()? as usize;
        (0..count)
            .map(|ordinal| {
                let device = CudaDevice::new(ordinal)?;
                let blas = CudaBlas::new(device.clone())?;
                Ok(DeviceContext {
                    device,
                    blas,
                    ordinal,
                })
            })
            .collect()
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn name(&self) -> String {
        self.device.name().unwrap_or_default()
    }
}
