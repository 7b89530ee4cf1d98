//! Error types surfaced by the transport.
//!
//! Only structural failures — the ones that leave a `Source` or `Sink`
//! permanently unusable — are modelled as `Err` variants here. Ordinary,
//! expected outcomes of pushing/popping (back-pressure, an empty ring, a
//! droppable consumer falling behind) are plain return values, not errors;
//! see `PopOutcome` in `framing.rs`.

use thiserror::Error;

/// Errors that can occur while constructing or registering against a queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The consumer slot table is already at `max_no_drop_consumers` and has
    /// no free slot for a new reliable consumer.
    #[error("too many reliable consumers registered (max: {max})")]
    TooManyConsumers {
        /// Capacity of the consumer slot table.
        max: usize,
    },

    /// A consumer tried to attach to a named shared-memory segment that does
    /// not exist.
    #[error("shared-memory segment {name:?} not found")]
    SegmentNotFound {
        /// Name the caller requested.
        name: String,
    },

    /// The ring, committed cursor, slot table, or registration lock could
    /// not be placed (allocation failure, mapping failure, or a size
    /// mismatch against an existing segment).
    #[error("failed to initialize queue object {what}: {reason}")]
    ObjectInitFailed {
        /// Which object failed to initialize (`"ring bytes"`, `"committed cursor"`, …).
        what: &'static str,
        /// Underlying reason, if any is available.
        reason: String,
    },
}

impl QueueError {
    /// Whether this failure is specific to the calling party and does not
    /// imply any other attached `Source`/`Sink` is affected.
    #[inline]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::TooManyConsumers { .. } | Self::SegmentNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_consumers_reports_limit() {
        let err = QueueError::TooManyConsumers { max: 4 };
        assert!(err.to_string().contains('4'));
        assert!(err.is_local());
    }

    #[test]
    fn object_init_failed_is_not_local() {
        let err = QueueError::ObjectInitFailed {
            what: "ring bytes",
            reason: "mmap failed".to_string(),
        };
        assert!(!err.is_local());
    }
}
