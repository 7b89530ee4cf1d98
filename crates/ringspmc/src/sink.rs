//! Consumer-side facade: registration lifecycle, blocking/non-blocking pop,
//! the optional prefetch cache, and producer-restart detection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::backpressure::ConsumerState;
use crate::error::QueueError;
use crate::framing::RingCore;
use crate::header::{Header, HEADER_LEN};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::placement::{InProcessPlacement, Placement, SharedMemoryPlacement};
use crate::prefetch::PrefetchCache;

fn from_pop_outcome(outcome: crate::framing::PopOutcome) -> SinkPop {
    match outcome {
        crate::framing::PopOutcome::Empty => SinkPop::Empty,
        crate::framing::PopOutcome::Record(h, p) => SinkPop::Record(h, p),
        crate::framing::PopOutcome::Resynchronised => SinkPop::Resynchronised,
    }
}

/// Lifecycle states of a [`Sink`]. `Registered` and `Reading` are both
/// "live" states; the distinction exists only for observability (metrics,
/// logging) since every pop behaves identically in either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Fresh,
    Registered,
    Reading,
    Stopped,
}

/// Outcome of a single non-blocking pop attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum SinkPop {
    /// Nothing new to read yet.
    Empty,
    /// A complete record was read. `is_warmup()` on the header tells the
    /// caller whether this is a real record or a keep-alive hint.
    Record(Header, Vec<u8>),
    /// This consumer (necessarily droppable) had fallen more than
    /// `capacity` bytes behind the producer; the in-flight record was
    /// discarded and the consumer resynchronised to the current committed
    /// position.
    Resynchronised,
}

/// Outcome of a blocking [`Sink::next`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum SinkNext {
    /// A record was read — see [`SinkPop::Record`].
    Record(Header, Vec<u8>),
    /// The caller called [`Sink::stop`] while this call was spinning on an
    /// empty ring.
    Stopped,
}

/// One reader attached to a ring, reliable or droppable, with an optional
/// prefetch cache. Not `Sync`: a `Sink` is meant to be owned and driven by
/// exactly one reader thread/process.
pub struct Sink<P: Placement> {
    ring: Arc<RingCore<P>>,
    state: ConsumerState,
    machine: SinkState,
    cache: PrefetchCache,
    /// Ring cursor up to which bytes have been copied into `cache`. Always
    /// equal to `state.cursor + cache.len()`. Kept separate from
    /// `state.cursor` because the shared slot only reflects bytes the
    /// *caller* has consumed out of the cache, not bytes merely prefetched
    /// into it — the back-pressure signal must track actual consumption.
    pulled: u64,
    stop: AtomicBool,
    last_seq: Option<u64>,
    metrics: Metrics,
    enable_metrics: bool,
}

impl Sink<InProcessPlacement> {
    /// Attaches to an in-process ring owned by a [`crate::source::Source`].
    /// `enable_metrics` should normally mirror the `Source`'s own
    /// `Config::enable_metrics`.
    pub fn attach(
        ring: Arc<RingCore<InProcessPlacement>>,
        reliable: bool,
        prefetch_cache_size: usize,
        enable_metrics: bool,
    ) -> Result<Self, QueueError> {
        Self::from_ring(ring, reliable, prefetch_cache_size, enable_metrics)
    }
}

impl Sink<SharedMemoryPlacement> {
    /// Opens a named shared-memory segment previously created by
    /// [`crate::source::Source::create`] and attaches to it.
    pub fn open(
        path: impl AsRef<Path>,
        capacity: usize,
        max_no_drop_consumers: usize,
        reliable: bool,
        prefetch_cache_size: usize,
        enable_metrics: bool,
    ) -> Result<Self, QueueError> {
        let placement = SharedMemoryPlacement::attach(path, capacity, max_no_drop_consumers)?;
        Self::from_ring(
            Arc::new(RingCore::new(placement)),
            reliable,
            prefetch_cache_size,
            enable_metrics,
        )
    }
}

impl<P: Placement> Sink<P> {
    fn from_ring(
        ring: Arc<RingCore<P>>,
        reliable: bool,
        prefetch_cache_size: usize,
        enable_metrics: bool,
    ) -> Result<Self, QueueError> {
        let metrics = Metrics::new();
        let state = if reliable {
            ring.register_consumer()?
        } else {
            ring.register_droppable()
        };
        if enable_metrics {
            metrics.registration();
        }
        let pulled = state.cursor;
        Ok(Self {
            ring,
            state,
            machine: SinkState::Registered,
            cache: PrefetchCache::new(prefetch_cache_size),
            pulled,
            stop: AtomicBool::new(false),
            last_seq: None,
            metrics,
            enable_metrics,
        })
    }

    /// Attaches a second reader to an already-open ring, for tests and
    /// multi-consumer demos that share a `RingCore` directly rather than
    /// going through `Source`/`Sink::open`.
    pub fn attach_to(
        ring: Arc<RingCore<P>>,
        reliable: bool,
        prefetch_cache_size: usize,
        enable_metrics: bool,
    ) -> Result<Self, QueueError> {
        Self::from_ring(ring, reliable, prefetch_cache_size, enable_metrics)
    }

    pub fn state(&self) -> SinkState {
        self.machine
    }

    /// A point-in-time snapshot of this sink's counters, or a zeroed
    /// snapshot if metrics were not enabled when this `Sink` was attached.
    pub fn metrics(&self) -> MetricsSnapshot {
        if self.enable_metrics {
            self.metrics.snapshot()
        } else {
            MetricsSnapshot::default()
        }
    }

    /// Flips the cooperative stop flag: a [`Self::next`] call currently
    /// spinning on an empty ring returns `Stopped` instead of retrying.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Attempts one pop without blocking.
    pub fn pop_nonblocking(&mut self) -> SinkPop {
        let outcome = if self.cache.enabled() {
            self.pop_cached()
        } else {
            from_pop_outcome(self.ring.try_pop(&mut self.state))
        };

        match outcome {
            SinkPop::Record(header, payload) => {
                self.machine = SinkState::Reading;
                self.note_sequence(&header);
                if self.enable_metrics {
                    self.metrics.record_received(payload.len());
                }
                SinkPop::Record(header, payload)
            }
            SinkPop::Resynchronised => {
                if self.enable_metrics {
                    self.metrics.resynchronisation();
                }
                SinkPop::Resynchronised
            }
            SinkPop::Empty => SinkPop::Empty,
        }
    }

    /// Loops until a record is available or the `Sink` is stopped.
    pub fn next(&mut self) -> SinkNext {
        let mut backoff = Backoff::new();
        loop {
            if self.stop.load(Ordering::Acquire) {
                self.machine = SinkState::Stopped;
                return SinkNext::Stopped;
            }
            match self.pop_nonblocking() {
                SinkPop::Record(header, payload) => return SinkNext::Record(header, payload),
                SinkPop::Resynchronised => {
                    warn!("sink resynchronised: producer outran this droppable reader");
                    backoff.reset();
                }
                SinkPop::Empty => {
                    if self.enable_metrics {
                        self.metrics.pop_spin();
                    }
                    backoff.snooze();
                }
            }
        }
    }

    /// Whether `seq_num` indicates the producer restarted (it reset its
    /// sequence numbering to 1 and has since produced a value lower than
    /// one this sink already observed).
    fn note_sequence(&mut self, header: &Header) {
        if header.is_warmup() {
            return;
        }
        if let Some(prev) = self.last_seq {
            if header.seq_num < prev {
                debug!(prev, now = header.seq_num, "producer restart detected");
                if self.enable_metrics {
                    self.metrics.producer_restart();
                }
            }
        }
        self.last_seq = Some(header.seq_num);
    }

    /// Last non-warmup sequence number observed, if any.
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_seq
    }

    fn ensure_cached(&mut self, want: usize) {
        if self.cache.len() >= want {
            return;
        }
        let committed = self.ring.committed();
        let available_to_pull = (committed - self.pulled) as usize;
        let room = self.cache.capacity().saturating_sub(self.cache.len());
        let pull_n = available_to_pull.min(room);
        if pull_n == 0 {
            return;
        }
        let mut buf = vec![0u8; pull_n];
        self.ring.read_raw(self.pulled, &mut buf);
        self.cache.fill(&buf);
        self.pulled += pull_n as u64;
    }

    fn pop_cached(&mut self) -> SinkPop {
        let committed = self.ring.committed();

        if !self.state.reliable && (committed - self.state.cursor) as usize > self.ring.capacity() {
            self.cache.clear();
            self.state.cursor = committed;
            self.pulled = committed;
            self.ring.update_consumer_state(&self.state);
            return SinkPop::Resynchronised;
        }

        let available = committed - self.state.cursor;
        if available < HEADER_LEN as u64 {
            return SinkPop::Empty;
        }

        self.ensure_cached(HEADER_LEN);
        if self.cache.len() < HEADER_LEN {
            // Cache can't even hold one header; nothing meaningful to
            // amortize, so this pop degrades to a direct ring read.
            return from_pop_outcome(self.ring.try_pop(&mut self.state));
        }

        let header = Header::read_from(self.cache.peek(HEADER_LEN));
        let frame_len = header.frame_len() as u64;
        if available < frame_len {
            return SinkPop::Empty;
        }

        if header.frame_len() > self.cache.capacity() {
            // This record alone is larger than the whole cache: bypass it
            // for this one read rather than stalling forever.
            self.cache.clear();
            self.pulled = self.state.cursor;
            let mut payload = vec![0u8; header.size];
            if header.size > 0 {
                self.ring.read_raw(self.state.cursor + HEADER_LEN as u64, &mut payload);
            }
            self.state.cursor += frame_len;
            self.pulled = self.state.cursor;
            self.ring.update_consumer_state(&self.state);
            return SinkPop::Record(header, payload);
        }

        self.ensure_cached(header.frame_len());
        debug_assert!(self.cache.len() >= header.frame_len());

        let mut frame = vec![0u8; header.frame_len()];
        self.cache.drain_into(&mut frame);
        self.state.cursor += frame_len;
        self.ring.update_consumer_state(&self.state);

        let payload = frame[HEADER_LEN..].to_vec();
        SinkPop::Record(header, payload)
    }
}

impl<P: Placement> Drop for Sink<P> {
    fn drop(&mut self) {
        self.ring.unregister_consumer(&mut self.state);
        if self.enable_metrics {
            self.metrics.unregistration();
        }
        self.machine = SinkState::Stopped;
    }
}
