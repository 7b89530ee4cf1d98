//! Byte-level circular storage.
//!
//! `Storage` is a thin, non-owning view over a `capacity`-byte region: it
//! performs no synchronization and does not own the memory it points into.
//! Ownership belongs to whichever [`crate::placement::Placement`] supplied
//! the pointer — a heap `Box<[u8]>` for an in-process queue, or a
//! `memmap2` mapping for a shared-memory one. Callers (`backpressure`/
//! `framing`) are responsible for coordinating who may read or write which
//! offsets and when.

/// A view over a fixed-capacity circular byte buffer.
///
/// `capacity` must be a power of two so that `offset & mask` replaces a
/// division on every access.
pub struct Storage {
    ptr: *mut u8,
    mask: usize,
}

// SAFETY: `Storage` performs no synchronization of its own; it is `Sync`
// because every caller of `write_at`/`read_at` is required (by the
// back-pressure core's cursor discipline) to only touch disjoint byte
// ranges concurrently — the producer writes ahead of `committed`, consumers
// only read behind it.
unsafe impl Sync for Storage {}
unsafe impl Send for Storage {}

impl Storage {
    /// Wraps an existing `capacity`-byte region.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes across `capacity` bytes,
    /// `capacity` must be a nonzero power of two, and the region must
    /// outlive every use of this `Storage`.
    pub unsafe fn new(ptr: *mut u8, capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity.is_power_of_two(),
            "capacity must be a nonzero power of two"
        );
        Self {
            ptr,
            mask: capacity - 1,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    fn offset(&self, cursor: u64) -> usize {
        (cursor as usize) & self.mask
    }

    /// Writes `src` into the ring starting at byte-cursor `cursor`, wrapping
    /// as needed. `src.len()` must not exceed `capacity`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no other writer touches this byte range
    /// concurrently (true for the single producer by construction) and that
    /// readers of this range have not yet been told (via `committed`) that
    /// it is readable.
    pub unsafe fn write_at(&self, cursor: u64, src: &[u8]) {
        let n = src.len();
        debug_assert!(n <= self.capacity());
        let start = self.offset(cursor);
        let cap = self.capacity();
        let buf = std::slice::from_raw_parts_mut(self.ptr, cap);

        if start + n <= cap {
            buf[start..start + n].copy_from_slice(src);
        } else {
            let first = cap - start;
            buf[start..cap].copy_from_slice(&src[..first]);
            buf[..n - first].copy_from_slice(&src[first..]);
        }
    }

    /// Reads `dst.len()` bytes starting at byte-cursor `cursor`, wrapping as
    /// needed.
    ///
    /// # Safety
    ///
    /// The caller must guarantee the requested range lies entirely within
    /// bytes already published via `committed`.
    pub unsafe fn read_at(&self, cursor: u64, dst: &mut [u8]) {
        let n = dst.len();
        debug_assert!(n <= self.capacity());
        let start = self.offset(cursor);
        let cap = self.capacity();
        let buf = std::slice::from_raw_parts(self.ptr, cap);

        if start + n <= cap {
            dst.copy_from_slice(&buf[start..start + n]);
        } else {
            let first = cap - start;
            dst[..first].copy_from_slice(&buf[start..cap]);
            dst[first..].copy_from_slice(&buf[..n - first]);
        }
    }
}
