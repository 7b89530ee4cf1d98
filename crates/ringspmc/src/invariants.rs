//! Debug-only assertion macros for the cursor arithmetic used throughout the
//! crate. Active only under `#[cfg(debug_assertions)]`, so release builds pay
//! nothing for them.

/// Assert that consumed bytes never exceed committed bytes for a consumer.
///
/// Used in: `BackPressureCore::update_consumer_state`.
macro_rules! debug_assert_consumer_not_past_committed {
    ($consumer_cursor:expr, $committed:expr) => {
        debug_assert!(
            $consumer_cursor <= $committed,
            "consumer cursor {} advanced past committed {}",
            $consumer_cursor,
            $committed
        )
    };
}

/// Assert that a cursor never regresses.
///
/// Used in: every cursor update (`claimed`, `committed`, per-consumer cursors).
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that a 64-bit cursor has not silently wrapped.
///
/// At even 10 billion records/sec, wrapping `u64` space takes decades; a
/// backward jump this large indicates a bug rather than legitimate wrap.
///
/// Used in: `BackPressureCore::release_space` after advancing `committed`.
macro_rules! debug_assert_no_wrap {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new > $old || $old.wrapping_sub($new) > (1u64 << 32),
            "{} went from {} to {} — looks like wraparound, not progress",
            $name,
            $old,
            $new.wrapping_sub($old)
        )
    };
}

/// Assert that the byte span about to be copied out of the ring lies fully
/// within what the producer has published.
///
/// Used in: `framing::pop` before reading header or payload bytes.
macro_rules! debug_assert_within_committed {
    ($start:expr, $len:expr, $committed:expr) => {
        debug_assert!(
            $start + $len <= $committed,
            "read of [{}, {}) reaches past committed bound {}",
            $start,
            $start + $len,
            $committed
        )
    };
}

/// Assert that a consumer slot index is either the unregistered sentinel or
/// within the slot table's bounds.
///
/// Used in: `BackPressureCore::register_consumer`/`unregister_consumer`.
macro_rules! debug_assert_valid_slot_index {
    ($index:expr, $max:expr) => {
        debug_assert!(
            $index == crate::backpressure::UNREGISTERED_SLOT || $index < $max,
            "slot index {} out of bounds for a table of size {}",
            $index,
            $max
        )
    };
}

pub(crate) use debug_assert_consumer_not_past_committed;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_no_wrap;
pub(crate) use debug_assert_valid_slot_index;
pub(crate) use debug_assert_within_committed;
