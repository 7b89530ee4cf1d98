//! Producer-side facade: sequence numbering, timestamps, keep-warm records,
//! and the spin loop that waits out back-pressure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use crate::backoff::Backoff;
use crate::config::Config;
use crate::error::QueueError;
use crate::framing::{FrameError, RingCore};
use crate::header::Header;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::placement::{InProcessPlacement, Placement, SharedMemoryPlacement};

/// Outcome of a single [`Source::next`] or [`Source::next_keep_warm`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The record was published.
    Pushed,
    /// The caller called [`Source::stop`] while this call was spinning
    /// against back-pressure; nothing was published.
    Stopped,
}

/// The single writer attached to a ring. Exactly one `Source` exists per
/// ring: the type does not enforce this (the ring itself has no concept of
/// "the" producer), but only one party may ever call its methods at a time.
pub struct Source<P: Placement> {
    ring: Arc<RingCore<P>>,
    seq_num: AtomicU64,
    origin: Instant,
    stop: AtomicBool,
    metrics: Arc<Metrics>,
    enable_metrics: bool,
}

impl Source<InProcessPlacement> {
    /// Creates a brand-new in-process ring and the `Source` that owns it.
    pub fn new(config: Config) -> Self {
        let placement = InProcessPlacement::new(config.capacity(), config.max_no_drop_consumers);
        let ring = Arc::new(RingCore::new(placement));
        info!(capacity = config.capacity(), "source started (in-process)");
        Self::from_ring(ring, config.enable_metrics)
    }
}

impl Source<SharedMemoryPlacement> {
    /// Creates a brand-new named shared-memory segment and the `Source`
    /// that owns it. Consumers attach with [`crate::sink::Sink::open`].
    pub fn create(path: impl AsRef<Path>, config: Config) -> Result<Self, QueueError> {
        let placement = SharedMemoryPlacement::create(
            path.as_ref(),
            config.capacity(),
            config.max_no_drop_consumers,
        )?;
        let ring = Arc::new(RingCore::new(placement));
        info!(path = %path.as_ref().display(), capacity = config.capacity(), "source started (shared memory)");
        Ok(Self::from_ring(ring, config.enable_metrics))
    }
}

impl<P: Placement> Source<P> {
    fn from_ring(ring: Arc<RingCore<P>>, enable_metrics: bool) -> Self {
        Self {
            ring,
            seq_num: AtomicU64::new(1),
            origin: Instant::now(),
            stop: AtomicBool::new(false),
            metrics: Arc::new(Metrics::new()),
            enable_metrics,
        }
    }

    /// A clone of the shared ring handle, for attaching in-process `Sink`s.
    pub fn ring(&self) -> Arc<RingCore<P>> {
        Arc::clone(&self.ring)
    }

    /// A point-in-time snapshot of this source's counters, or a zeroed
    /// snapshot if `Config::enable_metrics` was `false`.
    pub fn metrics(&self) -> MetricsSnapshot {
        if self.enable_metrics {
            self.metrics.snapshot()
        } else {
            MetricsSnapshot::default()
        }
    }

    /// Flips the cooperative stop flag: any `next`/`next_keep_warm` call
    /// currently spinning against back-pressure returns `Stopped` instead
    /// of retrying.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[inline]
    fn timestamp_now(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }

    /// Pushes `payload` as the next standard record, spinning against
    /// back-pressure until space frees up, the push succeeds, or the
    /// `Source` is stopped.
    ///
    /// Returns `Err` only if `payload` can never fit regardless of how much
    /// space frees up — a structural, non-retryable failure.
    pub fn next(&self, payload: &[u8]) -> Result<PushOutcome, FrameError> {
        let seq = self.seq_num.fetch_add(1, Ordering::Relaxed);
        let header = Header::standard(seq, self.timestamp_now(), payload.len());
        self.spin_push(&header, payload)
    }

    /// Pushes a header-only `WARMUP` record to keep the ring's cache lines
    /// hot while the application is otherwise quiescent. Does not consume a
    /// standard sequence number — consumers filter these out by
    /// [`Header::is_warmup`].
    pub fn next_keep_warm(&self) -> Result<PushOutcome, FrameError> {
        let header = Header::warmup(0, self.timestamp_now());
        self.spin_push(&header, &[])
    }

    fn spin_push(&self, header: &Header, payload: &[u8]) -> Result<PushOutcome, FrameError> {
        let mut backoff = Backoff::new();
        loop {
            if self.stop.load(Ordering::Acquire) {
                debug!(seq = header.seq_num, "push aborted: source stopped");
                return Ok(PushOutcome::Stopped);
            }
            match self.ring.try_push(header, payload) {
                Ok(true) => {
                    if self.enable_metrics {
                        self.metrics.record_sent(payload.len());
                    }
                    return Ok(PushOutcome::Pushed);
                }
                Ok(false) => {
                    if self.enable_metrics {
                        self.metrics.push_spin();
                    }
                    backoff.snooze();
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sink::Sink;

    #[test]
    fn next_publishes_records_a_sink_can_read() {
        let source = Source::new(Config::new(10, 4, 0, false));
        let mut sink = Sink::attach(source.ring(), true, 0, false).unwrap();

        assert_eq!(source.next(&[1, 2, 3]).unwrap(), PushOutcome::Pushed);

        match sink.pop_nonblocking() {
            crate::sink::SinkPop::Record(h, payload) => {
                assert_eq!(h.seq_num, 1);
                assert_eq!(payload, vec![1, 2, 3]);
            }
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[test]
    fn stop_aborts_a_spinning_push() {
        let source = Source::new(Config::new(10, 1, 0, false));
        let _sink = Sink::attach(source.ring(), true, 0, false).unwrap();

        let frame = 64 + crate::header::HEADER_LEN;
        while source.ring().write_available() >= frame {
            assert_eq!(source.next(&[0u8; 64]).unwrap(), PushOutcome::Pushed);
        }

        source.stop();
        assert_eq!(source.next(&[0u8; 64]).unwrap(), PushOutcome::Stopped);
    }

    #[test]
    fn keep_warm_record_is_filtered_by_type_not_by_the_core() {
        let source = Source::new(Config::new(10, 4, 0, false));
        let mut sink = Sink::attach(source.ring(), true, 0, false).unwrap();

        source.next_keep_warm().unwrap();
        match sink.pop_nonblocking() {
            crate::sink::SinkPop::Record(h, _) => assert!(h.is_warmup()),
            other => panic!("expected the warmup record, got {other:?}"),
        }
    }
}
