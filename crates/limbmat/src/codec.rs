//! Conversion between arbitrary-precision scalars and limb planes.
//!
//! A matrix of `rug::Float` entries is encoded as `S` planes of
//! integer-valued doubles sharing one matrix exponent `E`. Entry `x` at
//! position `idx` satisfies
//!
//! ```text
//! x = sum_s limb[s][idx] * 2^(E - (s + 1) * L)
//! ```
//!
//! with plane 0 carrying the most significant window. Every limb is a
//! balanced `L`-bit window in `[-2^(L-1), 2^(L-1))`, so products of limbs
//! keep two spare bits of mantissa headroom relative to the planner bound.
//!
//! Decoding accumulates the planes back into a `rug::Integer` most
//! significant plane first; the big-integer addition is where all carry
//! propagation happens. The symmetric decode reads only the column-major
//! upper triangle and mirrors it.

use crate::plan::LIMB_GRAIN_BITS;
use rug::integer::Order;
use rug::{Float, Integer};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Wrapper to send a raw mutable pointer across thread boundaries.
/// Safety: the caller must ensure non-overlapping access between threads.
#[cfg(feature = "parallel")]
#[derive(Clone, Copy)]
pub(crate) struct SendMutPtr<T> {
    ptr: *mut T,
    len: usize,
}

#[cfg(feature = "parallel")]
unsafe impl<T: Send> Send for SendMutPtr<T> {}
#[cfg(feature = "parallel")]
unsafe impl<T: Send> Sync for SendMutPtr<T> {}

#[cfg(feature = "parallel")]
impl<T> SendMutPtr<T> {
    pub(crate) fn new(slice: &mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    /// Get a mutable slice. Safety: caller ensures no aliasing.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn as_mut_slice(&self) -> &mut [T] {
        std::slice::from_raw_parts_mut(self.ptr, self.len)
    }
}

fn ceil_to_grain(e: i64) -> i64 {
    let grain = LIMB_GRAIN_BITS as i64;
    (e + grain - 1).div_euclid(grain) * grain
}

/// Shared matrix exponent: one past the maximum binary exponent across the
/// matrix, rounded up to the coarse limb grain. The strict bound keeps the
/// most significant balanced window from carrying out.
pub fn matrix_exponent(src: &[Float]) -> i64 {
    src.iter()
        .filter_map(|x| x.get_exp())
        .max()
        .map(|e| ceil_to_grain(e as i64 + 1))
        .unwrap_or(0)
}

/// Extract `width < 64` bits of `digits` (little-endian 64-bit words)
/// starting at `start_bit`.
fn bit_window(digits: &[u64], start_bit: u64, width: u32) -> u64 {
    let word = (start_bit / 64) as usize;
    let offset = (start_bit % 64) as u32;
    let lo = digits.get(word).copied().unwrap_or(0) >> offset;
    let hi = if offset + width > 64 {
        digits.get(word + 1).copied().unwrap_or(0) << (64 - offset)
    } else {
        0
    };
    (lo | hi) & ((1u64 << width) - 1)
}

/// Encode one entry into its `size` limbs at stride `len`.
fn encode_entry(
    x: &Float,
    idx: usize,
    len: usize,
    size: usize,
    limb_bits: u32,
    exp: i64,
    dst: &mut [f64],
) {
    let mantissa = if x.is_finite() && !x.is_zero() {
        x.to_integer_exp()
    } else {
        None
    };
    let (mant, e) = match mantissa {
        Some(pair) => pair,
        None => {
            for s in 0..size {
                dst[s * len + idx] = 0.0;
            }
            return;
        }
    };

    let negative = mant.is_negative();
    let mut mag = mant.abs();
    // x * 2^(size * L - E) as a truncated integer.
    let shift = e as i64 + (size as i64) * limb_bits as i64 - exp;
    if shift >= 0 {
        mag <<= shift as u32;
    } else {
        mag >>= (-shift) as u32;
    }
    let digits = mag.to_digits::<u64>(Order::Lsf);

    // Balanced L-bit windows, least significant first, carry upward.
    let half = 1u64 << (limb_bits - 1);
    let full = 1i64 << limb_bits;
    let mut carry = 0u64;
    for s in 0..size {
        let w = bit_window(&digits, s as u64 * limb_bits as u64, limb_bits) + carry;
        let digit = if w >= half {
            carry = 1;
            w as i64 - full
        } else {
            carry = 0;
            w as i64
        };
        let signed = if negative { -digit } else { digit };
        dst[(size - 1 - s) * len + idx] = signed as f64;
    }
    // The shared exponent bounds |x * 2^(-E)| strictly below 2^(-1), so the
    // top window never carries out.
    debug_assert_eq!(carry, 0);
}

/// Encode a matrix into `size` limb planes of `dst`, returning the shared
/// matrix exponent.
pub fn encode_matrix(src: &[Float], dst: &mut [f64], size: usize, limb_bits: u32) -> i64 {
    let len = src.len();
    let total = size * len;
    debug_assert!(dst.len() >= total);
    let exp = matrix_exponent(src);

    #[cfg(feature = "parallel")]
    {
        let out = SendMutPtr::new(&mut dst[..total]);
        src.par_iter().enumerate().for_each(|(idx, x)| {
            // Entries write disjoint strided positions.
            let dst = unsafe { out.as_mut_slice() };
            encode_entry(x, idx, len, size, limb_bits, exp, dst);
        });
    }

    #[cfg(not(feature = "parallel"))]
    for (idx, x) in src.iter().enumerate() {
        encode_entry(x, idx, len, size, limb_bits, exp, &mut dst[..total]);
    }

    exp
}

/// Decode one entry at position `idx`, stride `len`, into a scalar of
/// precision `prec`.
fn decode_entry(
    limbs: &[f64],
    idx: usize,
    len: usize,
    size: usize,
    limb_bits: u32,
    exp: i64,
    prec: u32,
) -> Float {
    let mut acc = Integer::new();
    for s in 0..size {
        let v = limbs[s * len + idx];
        debug_assert_eq!(v.fract(), 0.0);
        acc <<= limb_bits;
        acc += v as i64;
    }
    let mut out = Float::with_val(prec, &acc);
    let shift = exp - (size as i64) * limb_bits as i64;
    out <<= shift as i32;
    out
}

/// Decode `size` limb planes into the caller's matrix. Each entry keeps its
/// own precision.
pub fn decode_matrix(dst: &mut [Float], limbs: &[f64], size: usize, limb_bits: u32, exp: i64) {
    let len = dst.len();
    debug_assert!(limbs.len() >= size * len);

    #[cfg(feature = "parallel")]
    dst.par_iter_mut().enumerate().for_each(|(idx, out)| {
        *out = decode_entry(limbs, idx, len, size, limb_bits, exp, out.prec());
    });

    #[cfg(not(feature = "parallel"))]
    for (idx, out) in dst.iter_mut().enumerate() {
        *out = decode_entry(limbs, idx, len, size, limb_bits, exp, out.prec());
    }
}

/// Decode a symmetric `m x m` result. Only the column-major upper triangle
/// of the limb planes holds valid data; both mirror positions of the output
/// receive the decoded value.
pub fn decode_matrix_symmetric(
    dst: &mut [Float],
    m: usize,
    limbs: &[f64],
    size: usize,
    limb_bits: u32,
    exp: i64,
) {
    let len = m * m;
    debug_assert_eq!(dst.len(), len);
    debug_assert!(limbs.len() >= size * len);

    #[cfg(feature = "parallel")]
    {
        let out = SendMutPtr::new(dst);
        (0..m).into_par_iter().for_each(|v| {
            // Column v owns positions (u, v) and (v, u) for u <= v; columns
            // touch disjoint position sets.
            let dst = unsafe { out.as_mut_slice() };
            for u in 0..=v {
                let val =
                    decode_entry(limbs, v * m + u, len, size, limb_bits, exp, dst[u * m + v].prec());
                dst[v * m + u] = val.clone();
                dst[u * m + v] = val;
            }
        });
    }

    #[cfg(not(feature = "parallel"))]
    for v in 0..m {
        for u in 0..=v {
            let val =
                decode_entry(limbs, v * m + u, len, size, limb_bits, exp, dst[u * m + v].prec());
            dst[v * m + u] = val.clone();
            dst[u * m + v] = val;
        }
    }
}
