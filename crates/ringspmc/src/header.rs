//! The fixed-layout record header that precedes every payload in the ring.
//!
//! Field order and widths are fixed across process boundaries: a producer
//! and an independently compiled consumer attaching to the same
//! shared-memory segment must agree on this layout bit-for-bit.

use std::mem::size_of;

/// Current (and only defined) wire version.
pub const VERSION: u8 = 1;

/// Ordinary data record.
pub const TYPE_STANDARD: u8 = 0;
/// Header-only keep-alive record; consumers filter these out.
pub const TYPE_WARMUP: u8 = 1;

/// Sentinel timestamp meaning "unset".
pub const TIMESTAMP_UNSET: i64 = i64::MIN;

/// Fixed-layout record header.
///
/// `size` is a native machine word (`usize` here) to match the original
/// wire contract's `size_t`; on the platforms this crate targets that is 8
/// bytes, matching `seqNum`/`timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Header {
    pub version: u8,
    pub kind: u8,
    pub size: usize,
    pub seq_num: u64,
    pub timestamp: i64,
}

/// On-the-wire byte footprint of a `Header`, including any padding
/// introduced by native alignment. Producer and consumer must use the same
/// target word width; this crate does not attempt cross-width framing.
pub const HEADER_LEN: usize = size_of::<Header>();

impl Header {
    pub fn standard(seq_num: u64, timestamp: i64, payload_len: usize) -> Self {
        Self {
            version: VERSION,
            kind: TYPE_STANDARD,
            size: payload_len,
            seq_num,
            timestamp,
        }
    }

    pub fn warmup(seq_num: u64, timestamp: i64) -> Self {
        Self {
            version: VERSION,
            kind: TYPE_WARMUP,
            size: 0,
            seq_num,
            timestamp,
        }
    }

    #[inline]
    pub fn is_warmup(&self) -> bool {
        self.kind == TYPE_WARMUP
    }

    /// Total on-wire footprint of this record: header plus payload.
    #[inline]
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.size
    }

    /// Reinterprets `HEADER_LEN` bytes at `src` as a `Header`. `src` must be
    /// at least `HEADER_LEN` bytes and must have been produced by a prior
    /// call to [`Header::write_to`] (same target, same crate version).
    pub(crate) fn read_from(src: &[u8]) -> Self {
        debug_assert!(src.len() >= HEADER_LEN);
        let mut bytes = [0u8; HEADER_LEN];
        bytes.copy_from_slice(&src[..HEADER_LEN]);
        // SAFETY: `Header` is `repr(C)` and made only of integer fields, so
        // any `HEADER_LEN`-byte buffer produced by `write_to` is a valid
        // bit pattern to read back.
        unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<Header>()) }
    }

    /// Writes this header's `HEADER_LEN`-byte representation into `dst`.
    pub(crate) fn write_to(&self, dst: &mut [u8]) {
        debug_assert!(dst.len() >= HEADER_LEN);
        let bytes = unsafe {
            std::slice::from_raw_parts((self as *const Header).cast::<u8>(), HEADER_LEN)
        };
        dst[..HEADER_LEN].copy_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let h = Header::standard(7, 12345, 42);
        let mut buf = [0u8; HEADER_LEN];
        h.write_to(&mut buf);
        let back = Header::read_from(&buf);
        assert_eq!(h, back);
    }

    #[test]
    fn warmup_header_has_zero_payload_and_is_flagged() {
        let h = Header::warmup(1, TIMESTAMP_UNSET);
        assert!(h.is_warmup());
        assert_eq!(h.size, 0);
        assert_eq!(h.frame_len(), HEADER_LEN);
    }
}
