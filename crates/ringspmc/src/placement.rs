//! Where the ring bytes, the committed cursor, the consumer slot table, and
//! the registration lock physically live.
//!
//! Everything above this module (`storage`, `backpressure`, `framing`,
//! `source`, `sink`) is written once against the [`Placement`] trait and
//! knows nothing about whether it is running in one process or several —
//! the two concrete placements below are the only code that cares.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use crate::backoff::Backoff;
use crate::error::QueueError;

/// One consumer's progress cursor plus its occupancy flag, cache-line
/// isolated from its neighbours in the slot table.
pub struct SlotCellInner {
    pub cursor: AtomicU64,
    pub occupied: AtomicBool,
}

pub type SlotCell = CachePadded<SlotCellInner>;

/// A lock guarding consumer (un)registration. Implementations must be safe
/// to use from multiple processes when the placement backing them is
/// shared memory.
pub trait RegistrationLock: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// RAII guard for a [`RegistrationLock`].
pub struct LockGuard<'a>(&'a dyn RegistrationLock);

impl<'a> LockGuard<'a> {
    pub fn new(lock: &'a dyn RegistrationLock) -> Self {
        lock.acquire();
        Self(lock)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// A simple in-process spinlock, used by [`InProcessPlacement`]. Built on
/// the same adaptive backoff the `Source`/`Sink` spin loops use.
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationLock for SpinLock {
    fn acquire(&self) {
        let mut backoff = Backoff::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }
    }

    fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// Exposes the four addresses the rest of the engine needs, regardless of
/// where they actually live.
pub trait Placement: Send + Sync {
    /// Pointer to the first byte of the ring's `capacity`-byte region.
    fn ring_ptr(&self) -> *mut u8;
    fn capacity(&self) -> usize;
    fn max_consumers(&self) -> usize;
    fn committed(&self) -> &AtomicU64;
    /// Producer-private claimed cursor. Never read by a consumer, but still
    /// resident alongside the other shared cells so the byte layout of a
    /// shared-memory segment matches across producer and consumer builds.
    fn claimed(&self) -> &AtomicU64;
    fn slot(&self, index: usize) -> &SlotCellInner;
    fn high_water(&self) -> &AtomicU8;
    fn lock(&self) -> &dyn RegistrationLock;
}

/// Heap-backed placement for same-process producers and consumers.
pub struct InProcessPlacement {
    ring: Box<[u8]>,
    committed: AtomicU64,
    claimed: AtomicU64,
    slots: Box<[SlotCell]>,
    high_water: AtomicU8,
    lock: SpinLock,
}

impl InProcessPlacement {
    pub fn new(capacity: usize, max_consumers: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        let slots = (0..max_consumers)
            .map(|_| {
                CachePadded::new(SlotCellInner {
                    cursor: AtomicU64::new(0),
                    occupied: AtomicBool::new(false),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            ring: vec![0u8; capacity].into_boxed_slice(),
            committed: AtomicU64::new(0),
            claimed: AtomicU64::new(0),
            slots,
            high_water: AtomicU8::new(0),
            lock: SpinLock::new(),
        }
    }
}

impl Placement for InProcessPlacement {
    fn ring_ptr(&self) -> *mut u8 {
        self.ring.as_ptr() as *mut u8
    }

    fn capacity(&self) -> usize {
        self.ring.len()
    }

    fn max_consumers(&self) -> usize {
        self.slots.len()
    }

    fn committed(&self) -> &AtomicU64 {
        &self.committed
    }

    fn claimed(&self) -> &AtomicU64 {
        &self.claimed
    }

    fn slot(&self, index: usize) -> &SlotCellInner {
        &self.slots[index]
    }

    fn high_water(&self) -> &AtomicU8 {
        &self.high_water
    }

    fn lock(&self) -> &dyn RegistrationLock {
        &self.lock
    }
}

mod shared_memory {
    use super::{QueueError, SlotCellInner};
    use memmap2::MmapMut;
    use std::fs::OpenOptions;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

    use crate::placement::{Placement, RegistrationLock};

    /// Fixed per-cell stride (bytes) for every book-keeping slot — the
    /// `committed` cursor, the `claimed` cursor, the high-water index, the
    /// registration lock, and each consumer slot each get one, so no two
    /// independently-written cells share a cache line.
    const CELL_STRIDE: usize = 128;

    fn slot_table_bytes(max_consumers: usize) -> usize {
        max_consumers * CELL_STRIDE
    }

    /// Total book-keeping bytes appended after the ring's `capacity` bytes:
    /// committed cursor, claimed cursor, high-water index, registration
    /// lock, then the consumer slot table.
    fn book_keeping(max_consumers: usize) -> usize {
        4 * CELL_STRIDE + slot_table_bytes(max_consumers)
    }

    /// A real `PTHREAD_PROCESS_SHARED` mutex placed inline in the mapped
    /// region, so unrelated processes attaching to the same named segment
    /// serialize registration correctly. POSIX-only.
    #[cfg(unix)]
    pub struct ProcessSharedMutex {
        raw: *mut libc::pthread_mutex_t,
    }

    // SAFETY: the mutex is process-shared by construction; concurrent
    // access from multiple threads/processes is exactly what it's for.
    #[cfg(unix)]
    unsafe impl Send for ProcessSharedMutex {}
    #[cfg(unix)]
    unsafe impl Sync for ProcessSharedMutex {}

    #[cfg(unix)]
    impl ProcessSharedMutex {
        /// Initializes a fresh process-shared mutex at `ptr`. Called only
        /// by the process that creates the segment.
        ///
        /// # Safety
        ///
        /// `ptr` must point to at least `size_of::<pthread_mutex_t>()`
        /// writable bytes, uninitialized or previously destroyed, and must
        /// outlive every `ProcessSharedMutex` wrapping it.
        unsafe fn init(ptr: *mut libc::pthread_mutex_t) -> Result<Self, QueueError> {
            let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
            if libc::pthread_mutexattr_init(&mut attr) != 0 {
                return Err(QueueError::ObjectInitFailed {
                    what: "registration mutex attr",
                    reason: "pthread_mutexattr_init failed".to_string(),
                });
            }
            libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
            let rc = libc::pthread_mutex_init(ptr, &attr);
            libc::pthread_mutexattr_destroy(&mut attr);
            if rc != 0 {
                return Err(QueueError::ObjectInitFailed {
                    what: "registration mutex",
                    reason: format!("pthread_mutex_init returned {rc}"),
                });
            }
            Ok(Self { raw: ptr })
        }

        /// Attaches to a mutex already initialized (by the creating
        /// process) at `ptr`.
        ///
        /// # Safety
        ///
        /// `ptr` must point to a `pthread_mutex_t` previously initialized
        /// with `PTHREAD_PROCESS_SHARED` and must outlive this wrapper.
        unsafe fn attach(ptr: *mut libc::pthread_mutex_t) -> Self {
            Self { raw: ptr }
        }
    }

    #[cfg(unix)]
    impl RegistrationLock for ProcessSharedMutex {
        fn acquire(&self) {
            unsafe {
                libc::pthread_mutex_lock(self.raw);
            }
        }

        fn release(&self) {
            unsafe {
                libc::pthread_mutex_unlock(self.raw);
            }
        }
    }

    /// Fallback registration lock for non-POSIX targets, where
    /// `pthread_mutex_t` isn't available: a single `AtomicBool` placed
    /// inline in the mapped region, spun on with the same adaptive
    /// [`crate::backoff::Backoff`] the in-process [`super::SpinLock`] uses.
    /// Independently started processes attached to the same segment see
    /// the same cell, so this serializes registration across processes
    /// exactly as the pthread mutex does on unix.
    #[cfg(not(unix))]
    pub struct RawSpinLock {
        raw: *const std::sync::atomic::AtomicBool,
    }

    #[cfg(not(unix))]
    unsafe impl Send for RawSpinLock {}
    #[cfg(not(unix))]
    unsafe impl Sync for RawSpinLock {}

    #[cfg(not(unix))]
    impl RawSpinLock {
        /// # Safety
        ///
        /// `ptr` must point to at least `size_of::<AtomicBool>()` writable
        /// bytes, uninitialized or previously destroyed, and must outlive
        /// every `RawSpinLock` wrapping it.
        unsafe fn init(ptr: *mut std::sync::atomic::AtomicBool) -> Self {
            ptr.write(std::sync::atomic::AtomicBool::new(false));
            Self { raw: ptr }
        }

        /// # Safety
        ///
        /// `ptr` must point to an `AtomicBool` previously initialized by
        /// [`Self::init`] and must outlive this wrapper.
        unsafe fn attach(ptr: *mut std::sync::atomic::AtomicBool) -> Self {
            Self { raw: ptr }
        }

        fn cell(&self) -> &std::sync::atomic::AtomicBool {
            unsafe { &*self.raw }
        }
    }

    #[cfg(not(unix))]
    impl RegistrationLock for RawSpinLock {
        fn acquire(&self) {
            let mut backoff = crate::backoff::Backoff::new();
            while self
                .cell()
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                backoff.snooze();
            }
        }

        fn release(&self) {
            self.cell().store(false, Ordering::Release);
        }
    }

    #[cfg(unix)]
    type SegmentLock = ProcessSharedMutex;
    #[cfg(not(unix))]
    type SegmentLock = RawSpinLock;

    /// A named, file-mapped region that an independently started process
    /// can attach to by path.
    pub struct SharedMemoryPlacement {
        mmap: MmapMut,
        capacity: usize,
        max_consumers: usize,
        lock: SegmentLock,
    }

    impl SharedMemoryPlacement {
        fn offsets(capacity: usize) -> (usize, usize, usize, usize, usize) {
            let committed = capacity;
            let claimed = committed + CELL_STRIDE;
            let high_water = claimed + CELL_STRIDE;
            let mutex = high_water + CELL_STRIDE;
            let slots = mutex + CELL_STRIDE;
            (committed, claimed, high_water, mutex, slots)
        }

        /// Creates a brand-new named segment sized for `capacity` ring
        /// bytes and `max_consumers` slots, owned by the calling
        /// (producer) process.
        pub fn create(
            path: impl AsRef<Path>,
            capacity: usize,
            max_consumers: usize,
        ) -> Result<Self, QueueError> {
            assert!(capacity.is_power_of_two(), "capacity must be a power of two");
            let total = capacity + book_keeping(max_consumers);

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path.as_ref())
                .map_err(|e| QueueError::ObjectInitFailed {
                    what: "segment file",
                    reason: e.to_string(),
                })?;
            file.set_len(total as u64).map_err(|e| QueueError::ObjectInitFailed {
                what: "segment file",
                reason: e.to_string(),
            })?;

            let mut mmap = unsafe {
                memmap2::MmapOptions::new().len(total).map_mut(&file)
            }
            .map_err(|e| QueueError::ObjectInitFailed {
                what: "segment mapping",
                reason: e.to_string(),
            })?;

            let (_, _, _, lock_off, _) = Self::offsets(capacity);
            #[cfg(unix)]
            let lock = unsafe {
                ProcessSharedMutex::init(mmap.as_mut_ptr().add(lock_off).cast::<libc::pthread_mutex_t>())?
            };
            #[cfg(not(unix))]
            let lock = unsafe {
                RawSpinLock::init(
                    mmap.as_mut_ptr()
                        .add(lock_off)
                        .cast::<std::sync::atomic::AtomicBool>(),
                )
            };

            Ok(Self {
                mmap,
                capacity,
                max_consumers,
                lock,
            })
        }

        /// Attaches to a segment previously created by [`Self::create`].
        pub fn attach(
            path: impl AsRef<Path>,
            capacity: usize,
            max_consumers: usize,
        ) -> Result<Self, QueueError> {
            if !path.as_ref().exists() {
                return Err(QueueError::SegmentNotFound {
                    name: path.as_ref().display().to_string(),
                });
            }
            assert!(capacity.is_power_of_two(), "capacity must be a power of two");
            let total = capacity + book_keeping(max_consumers);

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path.as_ref())
                .map_err(|e| QueueError::ObjectInitFailed {
                    what: "segment file",
                    reason: e.to_string(),
                })?;

            let mut mmap = unsafe {
                memmap2::MmapOptions::new().len(total).map_mut(&file)
            }
            .map_err(|e| QueueError::ObjectInitFailed {
                what: "segment mapping",
                reason: e.to_string(),
            })?;

            let (_, _, _, lock_off, _) = Self::offsets(capacity);
            #[cfg(unix)]
            let lock = unsafe {
                ProcessSharedMutex::attach(mmap.as_mut_ptr().add(lock_off).cast::<libc::pthread_mutex_t>())
            };
            #[cfg(not(unix))]
            let lock = unsafe {
                RawSpinLock::attach(
                    mmap.as_mut_ptr()
                        .add(lock_off)
                        .cast::<std::sync::atomic::AtomicBool>(),
                )
            };

            Ok(Self {
                mmap,
                capacity,
                max_consumers,
                lock,
            })
        }
    }

    impl Placement for SharedMemoryPlacement {
        fn ring_ptr(&self) -> *mut u8 {
            self.mmap.as_ptr() as *mut u8
        }

        fn capacity(&self) -> usize {
            self.capacity
        }

        fn max_consumers(&self) -> usize {
            self.max_consumers
        }

        fn committed(&self) -> &AtomicU64 {
            let (off, ..) = Self::offsets(self.capacity);
            unsafe { &*(self.mmap.as_ptr().add(off).cast::<AtomicU64>()) }
        }

        fn claimed(&self) -> &AtomicU64 {
            let (_, off, ..) = Self::offsets(self.capacity);
            unsafe { &*(self.mmap.as_ptr().add(off).cast::<AtomicU64>()) }
        }

        fn slot(&self, index: usize) -> &SlotCellInner {
            debug_assert!(index < self.max_consumers);
            let (.., slots_off) = Self::offsets(self.capacity);
            let cell_off = slots_off + index * CELL_STRIDE;
            unsafe { &*(self.mmap.as_ptr().add(cell_off).cast::<SlotCellInner>()) }
        }

        fn high_water(&self) -> &AtomicU8 {
            let (_, _, off, ..) = Self::offsets(self.capacity);
            unsafe { &*(self.mmap.as_ptr().add(off).cast::<AtomicU8>()) }
        }

        fn lock(&self) -> &dyn RegistrationLock {
            &self.lock
        }
    }
}

pub use shared_memory::SharedMemoryPlacement;
#[cfg(unix)]
pub use shared_memory::ProcessSharedMutex;
#[cfg(not(unix))]
pub use shared_memory::RawSpinLock;
