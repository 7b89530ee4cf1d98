//! Turns the byte ring into a sequence of framed records: a fixed
//! [`Header`](crate::header::Header) followed immediately by its payload,
//! published to consumers as a single atomic unit.

use thiserror::Error;

use crate::backpressure::{self, ConsumerState};
use crate::header::{Header, HEADER_LEN};
use crate::invariants::debug_assert_within_committed;
use crate::placement::Placement;
use crate::storage::Storage;

/// Errors from framing operations that are structural rather than "try
/// again" outcomes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The record (header + payload) can never fit: it exceeds the ring's
    /// total capacity. Retrying will not help.
    #[error("record of {needed} bytes cannot fit in a ring of capacity {capacity}")]
    RecordTooLarge { needed: usize, capacity: usize },
}

/// Outcome of a single pop attempt against the raw ring (no prefetch cache
/// involved — see [`crate::sink::Sink`] for the cached variant).
#[derive(Debug, PartialEq, Eq)]
pub enum PopOutcome {
    /// Nothing new to read yet.
    Empty,
    /// A complete record was read.
    Record(Header, Vec<u8>),
    /// This (droppable) consumer had fallen more than `capacity` bytes
    /// behind; the in-flight record was discarded and the consumer's cursor
    /// has been reset to the current committed position.
    Resynchronised,
}

/// The byte ring plus its back-pressure core, generic over where the ring's
/// bytes and cursors actually live. Everything above this module (`source`,
/// `sink`) is written once against this type and knows nothing about
/// whether it is running in one process or several.
pub struct RingCore<P: Placement> {
    placement: P,
    storage: Storage,
}

impl<P: Placement> RingCore<P> {
    pub fn new(placement: P) -> Self {
        // SAFETY: `placement` owns `capacity()` valid bytes at `ring_ptr()`
        // for as long as it exists, and it is moved into (and so outlives)
        // this `Storage`.
        let storage = unsafe { Storage::new(placement.ring_ptr(), placement.capacity()) };
        Self { placement, storage }
    }

    pub fn placement(&self) -> &P {
        &self.placement
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    #[inline]
    pub fn committed(&self) -> u64 {
        self.placement.committed().load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn register_consumer(&self) -> Result<ConsumerState, crate::error::QueueError> {
        backpressure::register_consumer(&self.placement)
    }

    pub fn register_droppable(&self) -> ConsumerState {
        backpressure::register_droppable(&self.placement)
    }

    pub fn unregister_consumer(&self, state: &mut ConsumerState) {
        backpressure::unregister_consumer(&self.placement, state);
    }

    pub fn write_available(&self) -> usize {
        backpressure::write_available(&self.placement)
    }

    pub fn read_available(&self, state: &ConsumerState) -> usize {
        backpressure::read_available(&self.placement, state)
    }

    pub fn update_consumer_state(&self, state: &ConsumerState) {
        backpressure::update_consumer_state(&self.placement, state);
    }

    pub fn registered_count(&self) -> usize {
        backpressure::registered_count(&self.placement)
    }

    /// Copies `dst.len()` raw bytes starting at ring offset `cursor`,
    /// bypassing framing. Used by the prefetch cache to pull a batch of
    /// not-yet-parsed bytes ahead of where a consumer has read to, and by
    /// the cache's own bypass path for records larger than it.
    ///
    /// The caller must ensure `[cursor, cursor + dst.len())` lies within
    /// what the producer has committed.
    pub(crate) fn read_raw(&self, cursor: u64, dst: &mut [u8]) {
        let committed = self.committed();
        debug_assert_within_committed!(cursor, dst.len() as u64, committed);
        // SAFETY: bounds checked above against `committed`.
        unsafe {
            self.storage.read_at(cursor, dst);
        }
    }

    /// Attempts to publish `header` followed by `payload` as one atomic
    /// record.
    ///
    /// Returns `Ok(true)` on success, `Ok(false)` if there is currently not
    /// enough writable space (the caller should back off and retry), or
    /// `Err` if the record can never fit regardless of how much space frees
    /// up.
    pub fn try_push(&self, header: &Header, payload: &[u8]) -> Result<bool, FrameError> {
        let n = HEADER_LEN + payload.len();
        if n > self.storage.capacity() {
            return Err(FrameError::RecordTooLarge {
                needed: n,
                capacity: self.storage.capacity(),
            });
        }

        let Some(start) = backpressure::acquire_space(&self.placement, n) else {
            return Ok(false);
        };

        let mut header_bytes = [0u8; HEADER_LEN];
        header.write_to(&mut header_bytes);

        // SAFETY: `acquire_space` reserved exactly this [start, start+n)
        // span for us alone; no other writer can touch it, and it is not
        // yet reachable by consumers because `committed` hasn't advanced.
        unsafe {
            self.storage.write_at(start, &header_bytes);
            self.storage.write_at(start + HEADER_LEN as u64, payload);
        }

        backpressure::release_space(&self.placement);
        Ok(true)
    }

    /// Attempts to read the next record visible to `state`, advancing and
    /// flushing its cursor on success. Never consults a prefetch cache —
    /// see [`crate::sink::Sink`] for that.
    pub fn try_pop(&self, state: &mut ConsumerState) -> PopOutcome {
        let committed = self.committed();
        let available = committed - state.cursor;

        if !state.reliable && available as usize > self.storage.capacity() {
            // The producer has wrapped past bytes we hadn't read yet.
            state.cursor = committed;
            self.update_consumer_state(state);
            return PopOutcome::Resynchronised;
        }

        if available < HEADER_LEN as u64 {
            return PopOutcome::Empty;
        }

        let mut header_bytes = [0u8; HEADER_LEN];
        debug_assert_within_committed!(state.cursor, HEADER_LEN as u64, committed);
        // SAFETY: bounds checked above against `committed`, which the
        // producer only advances after fully writing these bytes.
        unsafe {
            self.storage.read_at(state.cursor, &mut header_bytes);
        }
        let header = Header::read_from(&header_bytes);

        let frame_len = header.frame_len() as u64;
        if available < frame_len {
            return PopOutcome::Empty;
        }

        let mut payload = vec![0u8; header.size];
        if header.size > 0 {
            debug_assert_within_committed!(
                state.cursor + HEADER_LEN as u64,
                header.size as u64,
                committed
            );
            // SAFETY: same reasoning as the header read above.
            unsafe {
                self.storage
                    .read_at(state.cursor + HEADER_LEN as u64, &mut payload);
            }
        }

        state.cursor += frame_len;
        self.update_consumer_state(state);

        PopOutcome::Record(header, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::InProcessPlacement;

    fn ring(capacity: usize, max_consumers: usize) -> RingCore<InProcessPlacement> {
        RingCore::new(InProcessPlacement::new(capacity, max_consumers))
    }

    fn push_record(ring: &RingCore<InProcessPlacement>, seq: u64, payload: &[u8]) -> bool {
        let header = Header::standard(seq, 0, payload.len());
        ring.try_push(&header, payload).unwrap()
    }

    #[test]
    fn push_then_pop_round_trips_bytes_and_sequence() {
        let ring = ring(128, 4);
        let mut state = ring.register_consumer().unwrap();

        assert!(push_record(&ring, 1, &[1, 2, 3, 4]));
        assert!(push_record(&ring, 2, &[5, 6, 7, 8]));

        match ring.try_pop(&mut state) {
            PopOutcome::Record(h, payload) => {
                assert_eq!(h.seq_num, 1);
                assert_eq!(payload, vec![1, 2, 3, 4]);
            }
            other => panic!("expected a record, got {other:?}"),
        }
        match ring.try_pop(&mut state) {
            PopOutcome::Record(h, payload) => {
                assert_eq!(h.seq_num, 2);
                assert_eq!(payload, vec![5, 6, 7, 8]);
            }
            other => panic!("expected a record, got {other:?}"),
        }
        assert_eq!(ring.try_pop(&mut state), PopOutcome::Empty);
    }

    #[test]
    fn oversized_record_is_rejected_deterministically() {
        let ring = ring(32, 4);
        let header = Header::standard(1, 0, 64);
        let payload = vec![0u8; 64];
        assert_eq!(
            ring.try_push(&header, &payload),
            Err(FrameError::RecordTooLarge {
                needed: 64 + HEADER_LEN,
                capacity: 32
            })
        );
    }

    #[test]
    fn push_fails_softly_when_ring_is_full() {
        let ring = ring(64, 4);
        let _state = ring.register_consumer().unwrap();
        let payload = vec![0u8; 16];

        // Fill until the next push can't fit.
        loop {
            let header = Header::standard(1, 0, payload.len());
            if !ring.try_push(&header, &payload).unwrap() {
                break;
            }
        }
    }

    #[test]
    fn droppable_consumer_falling_behind_resynchronises() {
        let ring = ring(64, 4);
        let mut droppable = ring.register_droppable();

        // Push enough records to wrap past capacity without the droppable
        // consumer reading anything.
        for seq in 0..20u64 {
            let header = Header::standard(seq, 0, 8);
            let _ = ring.try_push(&header, &[0u8; 8]);
        }

        assert_eq!(ring.try_pop(&mut droppable), PopOutcome::Resynchronised);
        assert_eq!(droppable.cursor, ring.committed());
    }

    #[test]
    fn reliable_consumer_never_resynchronises() {
        let ring = ring(4096, 4);
        let mut state = ring.register_consumer().unwrap();
        for seq in 0..50u64 {
            let header = Header::standard(seq, 0, 8);
            assert!(ring.try_push(&header, &[0u8; 8]).unwrap());
        }
        for seq in 0..50u64 {
            match ring.try_pop(&mut state) {
                PopOutcome::Record(h, _) => assert_eq!(h.seq_num, seq),
                other => panic!("expected record {seq}, got {other:?}"),
            }
        }
    }
}
