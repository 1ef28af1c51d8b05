// crates/dht-idspace/src/lib.rs

//! Fixed-width identifier arithmetic for the ring (Chord) and prefix (Pastry)
//! overlays: hashing, ring distance, interval containment, and base-2^b
//! digit decomposition.
//!
//! `Id` is a 160-bit unsigned integer stored as 20 big-endian bytes. Because
//! `ID_BYTES * 8 == ID_BITS` exactly, ordinary wrapping byte-array add/sub
//! *is* arithmetic modulo 2^160 — no separate masking step is needed.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all)]

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Width of the identifier space in bits.
pub const ID_BITS: u32 = 160;

/// Width of the identifier space in bytes.
pub const ID_BYTES: usize = (ID_BITS / 8) as usize;

/// Deterministic error for malformed identifiers.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum IdSpaceError {
    /// An operation received a byte slice of the wrong width.
    #[error("malformed identifier: expected {expected} bytes, got {got}")]
    IdFormat {
        /// Expected width, in bytes.
        expected: usize,
        /// Width actually supplied.
        got: usize,
    },
}

/// A 160-bit ring/prefix identifier, big-endian.
///
/// `Ord`/`PartialOrd` are derived from the byte array, which is exactly
/// unsigned big-endian magnitude comparison.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(pub [u8; ID_BYTES]);

impl Id {
    /// The identifier zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; ID_BYTES])
    }

    /// Build an `Id` from exactly `ID_BYTES` bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Build an `Id` from a slice, failing if the width is wrong.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdSpaceError> {
        if bytes.len() != ID_BYTES {
            return Err(IdSpaceError::IdFormat {
                expected: ID_BYTES,
                got: bytes.len(),
            });
        }
        let mut out = [0u8; ID_BYTES];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Borrow the big-endian byte representation.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// Deterministic hash of an arbitrary byte string into the identifier
    /// space. Stable across runs and processes (required so that seeded
    /// experiments reproduce identifiers bit-for-bit).
    #[must_use]
    pub fn hash(bytes: &[u8]) -> Self {
        let digest = blake3::hash(bytes);
        let full = digest.as_bytes(); // 32 bytes
        let mut out = [0u8; ID_BYTES];
        out.copy_from_slice(&full[..ID_BYTES]);
        Self(out)
    }

    /// `(self + 2^i) mod 2^m`, used to build Chord finger-table targets.
    #[must_use]
    pub fn add_pow2(self, i: u32) -> Self {
        assert!(i < ID_BITS, "bit index {i} out of range for {ID_BITS}-bit ids");
        let mut out = self.0;
        // Byte 0 is most significant; bit `i` (0 = LSB) lives in byte
        // `ID_BYTES - 1 - i/8`, at position `i % 8` within that byte.
        let byte_idx = ID_BYTES - 1 - (i / 8) as usize;
        let bit = i % 8;
        let mut carry: u16 = 1u16 << bit;
        for idx in (0..=byte_idx).rev() {
            if carry == 0 {
                break;
            }
            let sum = out[idx] as u16 + (carry & 0xFF);
            out[idx] = sum as u8;
            carry = (carry >> 8) + (sum >> 8);
        }
        // Any carry past byte 0 overflows out of the fixed width, which is
        // exactly wraparound modulo 2^m.
        Self(out)
    }

    /// `(self - other) mod 2^m`.
    #[must_use]
    pub fn wrapping_sub(self, other: Self) -> Self {
        let mut out = [0u8; ID_BYTES];
        let mut borrow: i16 = 0;
        for idx in (0..ID_BYTES).rev() {
            let mut diff = self.0[idx] as i16 - other.0[idx] as i16 - borrow;
            if diff < 0 {
                diff += 256;
                borrow = 1;
            } else {
                borrow = 0;
            }
            out[idx] = diff as u8;
        }
        Self(out)
    }

    /// `(self + other) mod 2^m`.
    #[must_use]
    pub fn wrapping_add(self, other: Self) -> Self {
        let mut out = [0u8; ID_BYTES];
        let mut carry: u16 = 0;
        for idx in (0..ID_BYTES).rev() {
            let sum = self.0[idx] as u16 + other.0[idx] as u16 + carry;
            out[idx] = sum as u8;
            carry = sum >> 8;
        }
        Self(out)
    }

    /// Forward ring distance `(b - a) mod 2^m` from `self` to `other`.
    #[must_use]
    pub fn ring_distance_to(self, other: Self) -> Self {
        other.wrapping_sub(self)
    }

    /// `min(ring_distance(a,b), ring_distance(b,a))` — Pastry's "nearness".
    #[must_use]
    pub fn numeric_distance(self, other: Self) -> Self {
        let fwd = self.ring_distance_to(other);
        let bwd = other.ring_distance_to(self);
        fwd.min(bwd)
    }

    /// The `r`-th base-`2^b_bits` digit of this identifier, most-significant
    /// first (`r == 0` is the leading digit).
    #[must_use]
    pub fn digit(&self, r: usize, b_bits: u32) -> u32 {
        let bit_off = r as u32 * b_bits;
        let mut val: u32 = 0;
        for i in 0..b_bits {
            let bitpos = bit_off + i;
            let byte_idx = (bitpos / 8) as usize;
            let bit_in_byte = 7 - (bitpos % 8);
            let bit = if byte_idx < ID_BYTES {
                (self.0[byte_idx] >> bit_in_byte) & 1
            } else {
                0
            };
            val = (val << 1) | u32::from(bit);
        }
        val
    }

    /// Number of base-`2^b_bits` rows needed to cover the whole id space.
    #[must_use]
    pub fn rows(b_bits: u32) -> usize {
        ((ID_BITS + b_bits - 1) / b_bits) as usize
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "…")
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Number of leading base-`2^b_bits` digits `a` and `b` share.
#[must_use]
pub fn shared_prefix_len(a: &Id, b: &Id, b_bits: u32) -> usize {
    let rows = Id::rows(b_bits);
    for r in 0..rows {
        if a.digit(r, b_bits) != b.digit(r, b_bits) {
            return r;
        }
    }
    rows
}

/// Ring interval-containment test honoring open/closed endpoints.
///
/// `left_open`/`right_open` follow standard Chord notation: `(a,b]` is
/// `left_open = true, right_open = false`. When `start == end` the interval
/// denotes the entire ring (the single-node case): it is only *not* the
/// whole ring when both ends are open, in which case it excludes `start`.
#[must_use]
pub fn in_interval(id: Id, start: Id, end: Id, left_open: bool, right_open: bool) -> bool {
    if start == end {
        return if left_open && right_open { id != start } else { true };
    }
    let left_ok = if left_open { id > start } else { id >= start };
    let right_ok = if right_open { id < end } else { id <= end };
    match start.cmp(&end) {
        Ordering::Less => left_ok && right_ok,
        Ordering::Greater => left_ok || right_ok,
        Ordering::Equal => unreachable!("start == end handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> Id {
        let mut b = [0u8; ID_BYTES];
        b[ID_BYTES - 1] = n;
        Id(b)
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(Id::hash(b"alpha"), Id::hash(b"alpha"));
        assert_ne!(Id::hash(b"alpha"), Id::hash(b"beta"));
    }

    #[test]
    fn add_pow2_matches_plain_addition_for_small_values() {
        let a = id(10);
        assert_eq!(a.add_pow2(0), id(11));
        assert_eq!(a.add_pow2(3), id(18));
    }

    #[test]
    fn add_pow2_wraps_at_top() {
        let max = Id([0xff; ID_BYTES]);
        assert_eq!(max.add_pow2(0), Id::zero());
    }

    #[test]
    fn ring_distance_basic() {
        let a = id(5);
        let b = id(12);
        assert_eq!(a.ring_distance_to(b), id(7));
        // wraparound: b -> a goes almost all the way around.
        let back = b.ring_distance_to(a);
        assert_eq!(back, Id::zero().wrapping_sub(id(7)));
    }

    #[test]
    fn numeric_distance_is_symmetric_and_minimal() {
        let a = id(5);
        let b = id(12);
        assert_eq!(a.numeric_distance(b), b.numeric_distance(a));
        assert_eq!(a.numeric_distance(b), id(7));
    }

    #[test]
    fn in_interval_non_wrapping() {
        let a = id(5);
        let b = id(20);
        assert!(in_interval(id(10), a, b, true, false));
        assert!(!in_interval(id(5), a, b, true, false)); // left-open excludes a
        assert!(in_interval(id(20), a, b, true, false)); // right-closed includes b
        assert!(!in_interval(id(20), a, b, true, true));
    }

    #[test]
    fn in_interval_wrapping() {
        let a = id(250);
        let b = id(10);
        assert!(in_interval(id(255), a, b, true, false));
        assert!(in_interval(id(3), a, b, true, false));
        assert!(!in_interval(id(200), a, b, true, false));
    }

    #[test]
    fn in_interval_degenerate_single_node() {
        let a = id(42);
        assert!(in_interval(id(99), a, a, true, false));
        assert!(!in_interval(a, a, a, true, true));
        assert!(in_interval(id(0), a, a, true, true));
    }

    #[test]
    fn digit_and_shared_prefix_len_roundtrip() {
        let a = Id::hash(b"node-a");
        let b = a; // identical id shares every digit
        assert_eq!(shared_prefix_len(&a, &b, 4), Id::rows(4));

        let c = Id::hash(b"node-c");
        let p = shared_prefix_len(&a, &c, 4);
        assert!(p <= Id::rows(4));
        for r in 0..p {
            assert_eq!(a.digit(r, 4), c.digit(r, 4));
        }
        if p < Id::rows(4) {
            assert_ne!(a.digit(p, 4), c.digit(p, 4));
        }
    }

    #[test]
    fn rows_for_default_params() {
        assert_eq!(Id::rows(4), 40);
    }

    #[test]
    fn from_slice_rejects_wrong_width() {
        assert!(Id::from_slice(&[0u8; 10]).is_err());
        assert!(Id::from_slice(&[0u8; ID_BYTES]).is_ok());
    }
}
