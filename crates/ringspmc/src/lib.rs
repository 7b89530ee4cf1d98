//! A lock-free single-producer / multiple-consumer shared-memory message
//! transport.
//!
//! A single [`Source`] writes length-prefixed records into a fixed-capacity
//! circular byte buffer; any number of [`Sink`]s read them back, either in
//! the same process or across processes attached to a named shared-memory
//! segment. Reliable sinks hold a slot in a bounded consumer table and
//! exert back-pressure on the producer; droppable sinks hold no slot and
//! may silently fall behind and resynchronise instead.
//!
//! ```
//! use ringspmc_rs::{Config, Source, Sink};
//!
//! let source = Source::new(Config::new(10, 4, 0, false));
//! let mut sink = Sink::attach(source.ring(), true, 0, false).unwrap();
//!
//! source.next(b"hello").unwrap();
//! match sink.pop_nonblocking() {
//!     ringspmc_rs::SinkPop::Record(header, payload) => {
//!         assert_eq!(payload, b"hello");
//!         assert_eq!(header.seq_num, 1);
//!     }
//!     other => panic!("expected a record, got {other:?}"),
//! }
//! ```

pub mod backoff;
pub mod backpressure;
pub mod config;
pub mod error;
pub mod framing;
pub mod header;
pub(crate) mod invariants;
pub mod metrics;
pub mod placement;
pub mod prefetch;
pub mod sink;
pub mod source;
pub mod storage;

pub use config::{Config, HIGH_THROUGHPUT_CONFIG, LOW_LATENCY_CONFIG, MAX_NO_DROP_CONSUMERS};
pub use error::QueueError;
pub use framing::{FrameError, PopOutcome, RingCore};
pub use header::{Header, HEADER_LEN, TIMESTAMP_UNSET, TYPE_STANDARD, TYPE_WARMUP, VERSION};
pub use metrics::{Metrics, MetricsSnapshot};
pub use placement::{InProcessPlacement, Placement, SharedMemoryPlacement};
pub use sink::{Sink, SinkNext, SinkPop, SinkState};
pub use source::{PushOutcome, Source};
