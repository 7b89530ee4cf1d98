//! Loom-based concurrency tests for the back-pressure core's cursor
//! discipline.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! Loom exhaustively explores thread interleavings to find ordering bugs
//! that might only show up under a specific, rare schedule. The real
//! `BackPressureCore` logic operates on `std::sync::atomic` types through
//! the `Placement` trait; loom requires its own atomic types to instrument
//! interleavings, so this test re-states the same `claimed`/`committed`/
//! consumer-cursor protocol against loom's primitives directly rather than
//! against the crate's own code.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;

/// One reliable consumer slot: occupancy plus its progress cursor.
struct Slot {
    occupied: AtomicBool,
    cursor: AtomicU64,
}

/// A single producer / single reliable consumer instance of the
/// `claimed`/`committed`/`consumer[0]` protocol, capacity fixed small so
/// loom's state-space search stays tractable.
struct LoomCore {
    capacity: u64,
    claimed: AtomicU64,
    committed: AtomicU64,
    slot: Slot,
}

impl LoomCore {
    fn new(capacity: u64) -> Self {
        Self {
            capacity,
            claimed: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            slot: Slot {
                occupied: AtomicBool::new(true),
                cursor: AtomicU64::new(0),
            },
        }
    }

    fn write_available(&self) -> u64 {
        let committed = self.committed.load(Ordering::Relaxed);
        let consumed = self.slot.cursor.load(Ordering::Acquire);
        self.capacity - (committed - consumed)
    }

    fn acquire_space(&self, n: u64) -> Option<u64> {
        if self.write_available() < n {
            return None;
        }
        let claimed = self.claimed.load(Ordering::Relaxed);
        self.claimed.store(claimed + n, Ordering::Relaxed);
        Some(claimed)
    }

    fn release_space(&self) {
        let claimed = self.claimed.load(Ordering::Relaxed);
        self.committed.store(claimed, Ordering::Release);
    }

    fn read_available(&self, local_cursor: u64) -> u64 {
        self.committed.load(Ordering::Acquire) - local_cursor
    }

    fn update_consumer(&self, local_cursor: u64) {
        self.slot.cursor.store(local_cursor, Ordering::Release);
    }
}

#[test]
fn producer_and_consumer_never_disagree_about_available_bytes() {
    loom::model(|| {
        let core = Arc::new(LoomCore::new(8));

        let producer = {
            let core = Arc::clone(&core);
            thread::spawn(move || {
                if let Some(_start) = core.acquire_space(4) {
                    core.release_space();
                }
            })
        };

        let consumer = {
            let core = Arc::clone(&core);
            thread::spawn(move || {
                let mut local_cursor = 0u64;
                let available = core.read_available(local_cursor);
                if available >= 4 {
                    local_cursor += 4;
                    core.update_consumer(local_cursor);
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();

        // Whatever interleaving occurred, the consumer can never have
        // consumed more than was committed, and the core must never report
        // negative writable space.
        assert!(core.write_available() <= core.capacity);
    });
}

#[test]
fn release_is_visible_to_consumer_only_after_the_write_it_guards() {
    loom::model(|| {
        let core = Arc::new(LoomCore::new(8));
        let payload = Arc::new(AtomicU64::new(0));

        let producer = {
            let core = Arc::clone(&core);
            let payload = Arc::clone(&payload);
            thread::spawn(move || {
                if let Some(_start) = core.acquire_space(4) {
                    // The "payload" write that release-ordering must make
                    // visible before the consumer observes `committed`.
                    payload.store(42, Ordering::Relaxed);
                    core.release_space();
                }
            })
        };

        let consumer = {
            let core = Arc::clone(&core);
            let payload = Arc::clone(&payload);
            thread::spawn(move || {
                if core.read_available(0) >= 4 {
                    // If we can see the committed advance, we must also see
                    // the payload write that happened-before it.
                    assert_eq!(payload.load(Ordering::Relaxed), 42);
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
    });
}
