//! Grow-only host workspace.
//!
//! One engine instance owns three limb buffers (A, B, C) plus a scratch
//! buffer sized to the largest of the three. Capacities only ever grow:
//! successive calls inside a solve usually request similar shapes, so the
//! steady state performs no allocation at all. When a request exceeds the
//! current capacity the old buffer is released first and a buffer of exactly
//! the requested size replaces it.

use crate::error::{Error, Result};

/// Host-side limb buffers. All buffers hold plain `f64` limb planes.
#[derive(Debug, Default)]
pub struct Workspace {
    /// Limb planes of the A operand.
    pub a: Vec<f64>,
    /// Limb planes of the B operand.
    pub b: Vec<f64>,
    /// Output limb planes followed by convolution scratch.
    pub c: Vec<f64>,
    /// Shared scratch, sized to the largest of the three buffers.
    pub t: Vec<f64>,
}

fn grow(buf: &mut Vec<f64>, elements: usize) -> Result<()> {
    if elements <= buf.len() {
        return Ok(());
    }
    // Release the old buffer before allocating the replacement, so the peak
    // footprint is one buffer rather than two.
    *buf = Vec::new();
    let mut fresh = Vec::new();
    fresh
        .try_reserve_exact(elements)
        .map_err(|_| Error::Allocation { elements })?;
    fresh.resize(elements, 0.0);
    *buf = fresh;
    Ok(())
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure capacities of at least `mem_a`, `mem_b` and `mem_c` elements.
    /// Buffers never shrink. The scratch buffer tracks the maximum request.
    pub fn ensure(&mut self, mem_a: usize, mem_b: usize, mem_c: usize) -> Result<()> {
        grow(&mut self.a, mem_a)?;
        grow(&mut self.b, mem_b)?;
        grow(&mut self.c, mem_c)?;
        let mem_t = mem_a.max(mem_b).max(mem_c);
        grow(&mut self.t, mem_t)?;
        Ok(())
    }

    /// Current capacities `(a, b, c, t)` in elements.
    pub fn capacities(&self) -> (usize, usize, usize, usize) {
        (self.a.len(), self.b.len(), self.c.len(), self.t.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_to_request() {
        let mut ws = Workspace::new();
        ws.ensure(64, 128, 256).unwrap();
        assert_eq!(ws.capacities(), (64, 128, 256, 256));
    }

    #[test]
    fn never_shrinks() {
        let mut ws = Workspace::new();
        ws.ensure(64, 64, 64).unwrap();
        ws.ensure(32, 32, 32).unwrap();
        assert_eq!(ws.capacities(), (64, 64, 64, 64));
        ws.ensure(128, 16, 128).unwrap();
        assert_eq!(ws.capacities(), (128, 64, 128, 128));
    }

    #[test]
    fn capacity_tracks_maximum_seen() {
        let mut ws = Workspace::new();
        for &(a, b, c) in &[(64, 64, 64), (32, 32, 32), (128, 128, 128)] {
            ws.ensure(a, b, c).unwrap();
        }
        assert_eq!(ws.capacities(), (128, 128, 128, 128));
    }

    #[test]
    fn scratch_covers_all_buffers() {
        let mut ws = Workspace::new();
        ws.ensure(10, 500, 20).unwrap();
        assert_eq!(ws.t.len(), 500);
    }
}
