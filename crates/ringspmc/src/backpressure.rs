//! Consumer registration and the atomic cursor discipline that couples the
//! producer's writable space to the slowest reliable consumer.
//!
//! Every function here takes a `&impl Placement` instead of owning its own
//! cells: the committed/claimed cursors and the slot table live wherever the
//! placement puts them (a heap box for an in-process queue, a mapped file
//! for a shared-memory one), and this module is the only code that touches
//! them with the specific ordering the cursor discipline requires.

use std::sync::atomic::Ordering;

use crate::error::QueueError;
use crate::invariants::{
    debug_assert_consumer_not_past_committed, debug_assert_monotonic, debug_assert_no_wrap,
    debug_assert_valid_slot_index,
};
use crate::placement::{LockGuard, Placement};

/// Sentinel stored in [`ConsumerState::index`] for a consumer that holds no
/// slot (droppable consumers never occupy one).
pub const UNREGISTERED_SLOT: usize = usize::MAX;

/// Handle a reader uses to track its own progress. Not shared: one instance
/// lives in the `Sink` that owns it. `index` is [`UNREGISTERED_SLOT`] for a
/// droppable consumer.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerState {
    pub index: usize,
    pub cursor: u64,
    pub reliable: bool,
}

impl ConsumerState {
    fn unregistered(reliable: bool) -> Self {
        Self {
            index: UNREGISTERED_SLOT,
            cursor: 0,
            reliable,
        }
    }
}

/// Registers a new reliable consumer, seeding its cursor at the current
/// `committed` value: a newly attached reader starts from live data, it
/// does not replay history.
pub fn register_consumer<P: Placement>(placement: &P) -> Result<ConsumerState, QueueError> {
    let _guard = LockGuard::new(placement.lock());

    let free = (0..placement.max_consumers()).find(|&i| !placement.slot(i).occupied.load(Ordering::Acquire));
    let Some(index) = free else {
        return Err(QueueError::TooManyConsumers {
            max: placement.max_consumers(),
        });
    };
    debug_assert_valid_slot_index!(index, placement.max_consumers());

    let committed = placement.committed().load(Ordering::Acquire);
    placement.slot(index).cursor.store(committed, Ordering::Release);
    placement.slot(index).occupied.store(true, Ordering::Release);

    let prev_high_water = placement.high_water().load(Ordering::Relaxed);
    if index as u8 >= prev_high_water {
        placement.high_water().store(index as u8 + 1, Ordering::Relaxed);
    }

    Ok(ConsumerState {
        index,
        cursor: committed,
        reliable: true,
    })
}

/// Creates a droppable consumer's local state. Droppable consumers hold no
/// slot and so never appear in `write_available`'s computation.
pub fn register_droppable<P: Placement>(placement: &P) -> ConsumerState {
    ConsumerState {
        index: UNREGISTERED_SLOT,
        cursor: placement.committed().load(Ordering::Acquire),
        reliable: false,
    }
}

/// Releases a reliable consumer's slot. Must be called from the reader's own
/// context; the producer must never unregister a slot on a consumer's
/// behalf, since the producer cannot know the consumer has finished
/// observing its own cursor.
pub fn unregister_consumer<P: Placement>(placement: &P, state: &mut ConsumerState) {
    if state.index == UNREGISTERED_SLOT {
        return;
    }
    let _guard = LockGuard::new(placement.lock());
    placement.slot(state.index).occupied.store(false, Ordering::Release);
    *state = ConsumerState::unregistered(state.reliable);
}

/// Writable space given the slowest currently registered reliable consumer.
/// Returns full capacity if no reliable consumer is registered — droppable
/// consumers never exert back-pressure.
pub fn write_available<P: Placement>(placement: &P) -> usize {
    let committed = placement.committed().load(Ordering::Relaxed);
    let mut min_consumed = committed;
    let mut any_registered = false;

    for i in 0..placement.max_consumers() {
        let slot = placement.slot(i);
        if slot.occupied.load(Ordering::Acquire) {
            any_registered = true;
            let c = slot.cursor.load(Ordering::Acquire);
            if c < min_consumed {
                min_consumed = c;
            }
        }
    }

    if !any_registered {
        return placement.capacity();
    }
    placement.capacity() - (committed - min_consumed) as usize
}

/// Bytes available for `state` to read.
pub fn read_available<P: Placement>(placement: &P, state: &ConsumerState) -> usize {
    let committed = placement.committed().load(Ordering::Acquire);
    (committed - state.cursor) as usize
}

/// Reserves `n` bytes for the producer, advancing `claimed` but not
/// `committed`. Returns `None` (reserving nothing) if there isn't enough
/// writable space.
pub fn acquire_space<P: Placement>(placement: &P, n: usize) -> Option<u64> {
    if write_available(placement) < n {
        return None;
    }
    let claimed = placement.claimed().load(Ordering::Relaxed);
    let new_claimed = claimed + n as u64;
    debug_assert_monotonic!("claimed", claimed, new_claimed);
    placement.claimed().store(new_claimed, Ordering::Relaxed);
    Some(claimed)
}

/// Publishes everything reserved so far: `committed := claimed`, with
/// release ordering so that consumers which observe the new `committed`
/// also observe every byte written below it.
pub fn release_space<P: Placement>(placement: &P) {
    let claimed = placement.claimed().load(Ordering::Relaxed);
    let committed = placement.committed().load(Ordering::Relaxed);
    debug_assert_no_wrap!("committed", committed, claimed);
    placement.committed().store(claimed, Ordering::Release);
}

/// Flushes a reader's local cursor to its shared slot so the producer's next
/// `write_available` sees its progress. No-op for droppable consumers, which
/// hold no slot to flush into.
pub fn update_consumer_state<P: Placement>(placement: &P, state: &ConsumerState) {
    if state.index == UNREGISTERED_SLOT {
        return;
    }
    debug_assert_consumer_not_past_committed!(
        state.cursor,
        placement.committed().load(Ordering::Relaxed)
    );
    placement.slot(state.index).cursor.store(state.cursor, Ordering::Release);
}

/// Number of reliable consumer slots in use right now.
pub fn registered_count<P: Placement>(placement: &P) -> usize {
    (0..placement.max_consumers())
        .filter(|&i| placement.slot(i).occupied.load(Ordering::Acquire))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::InProcessPlacement;

    #[test]
    fn fresh_core_has_full_capacity_with_no_consumers() {
        let p = InProcessPlacement::new(1024, 4);
        assert_eq!(write_available(&p), 1024);
    }

    #[test]
    fn registering_consumer_starts_at_current_committed() {
        let p = InProcessPlacement::new(1024, 4);
        acquire_space(&p, 100).unwrap();
        release_space(&p);

        let state = register_consumer(&p).unwrap();
        assert_eq!(state.cursor, 100);
        assert_eq!(read_available(&p, &state), 0);
    }

    #[test]
    fn slowest_consumer_bounds_write_available() {
        let p = InProcessPlacement::new(1024, 4);
        let fast = register_consumer(&p).unwrap();
        let slow = register_consumer(&p).unwrap();

        acquire_space(&p, 200).unwrap();
        release_space(&p);

        let mut fast = fast;
        fast.cursor = 200;
        update_consumer_state(&p, &fast);

        // slow hasn't advanced, so write_available is bounded by it.
        assert_eq!(write_available(&p), 1024 - 200);

        let mut slow = slow;
        slow.cursor = 200;
        update_consumer_state(&p, &slow);
        assert_eq!(write_available(&p), 1024);
    }

    #[test]
    fn registration_fails_past_slot_table_capacity() {
        let p = InProcessPlacement::new(1024, 2);
        let _a = register_consumer(&p).unwrap();
        let _b = register_consumer(&p).unwrap();
        assert!(matches!(
            register_consumer(&p),
            Err(QueueError::TooManyConsumers { max: 2 })
        ));
    }

    #[test]
    fn unregistering_frees_the_slot_for_reuse() {
        let p = InProcessPlacement::new(1024, 1);
        let mut a = register_consumer(&p).unwrap();
        assert!(register_consumer(&p).is_err());

        unregister_consumer(&p, &mut a);
        assert!(register_consumer(&p).is_ok());
    }

    #[test]
    fn droppable_consumer_never_bounds_write_available() {
        let p = InProcessPlacement::new(1024, 4);
        let droppable = register_droppable(&p);
        assert!(!droppable.reliable);
        assert_eq!(write_available(&p), 1024);
    }
}
