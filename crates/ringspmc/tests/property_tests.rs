//! Property-based tests for the universal invariants in the
//! specification's testable-properties section: bounded writable space,
//! no-partial-read at record boundaries, and faithful byte/sequence
//! round-tripping under arbitrary push/pop interleavings.
//!
//! Pushes go through `RingCore::try_push` directly rather than
//! `Source::next`: the latter spins until space frees, which a
//! single-threaded test with no concurrent popper could block on forever
//! whenever a random op sequence front-loads pushes.

use proptest::prelude::*;
use ringspmc_rs::{Config, Header, InProcessPlacement, RingCore, Sink, SinkPop};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Op {
    Push(u8),
    Pop,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..64).prop_map(Op::Push),
        Just(Op::Pop),
    ]
}

fn ring(capacity_bits: u8, max_consumers: usize) -> Arc<RingCore<InProcessPlacement>> {
    Arc::new(RingCore::new(InProcessPlacement::new(1usize << capacity_bits, max_consumers)))
}

proptest! {
    /// For any interleaving of pushes and pops, every record a reliable
    /// reader pops carries an unbroken, increasing sequence and the exact
    /// bytes that were pushed — pushes that don't fit are simply skipped,
    /// mirroring what a caller sees from a non-blocking push.
    #[test]
    fn reliable_reader_sees_every_byte_in_order(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let ring = ring(12, 4); // 4 KiB
        let mut sink = Sink::attach_to(Arc::clone(&ring), true, 0, false).unwrap();

        let mut pushed = Vec::new();
        let mut next_expected_seq = 1u64;
        let mut seq = 1u64;

        for op in ops {
            match op {
                Op::Push(len) => {
                    let payload: Vec<u8> = (0..len).collect();
                    let header = Header::standard(seq, 0, payload.len());
                    if ring.try_push(&header, &payload).unwrap() {
                        pushed.push(payload);
                        seq += 1;
                    }
                }
                Op::Pop => {
                    if let SinkPop::Record(header, payload) = sink.pop_nonblocking() {
                        prop_assert_eq!(header.seq_num, next_expected_seq);
                        prop_assert_eq!(&payload, &pushed[0]);
                        pushed.remove(0);
                        next_expected_seq += 1;
                    }
                }
            }
        }

        // Drain whatever's left; it must match what's still pending, in order.
        loop {
            match sink.pop_nonblocking() {
                SinkPop::Record(header, payload) => {
                    prop_assert_eq!(header.seq_num, next_expected_seq);
                    prop_assert_eq!(&payload, &pushed[0]);
                    pushed.remove(0);
                    next_expected_seq += 1;
                }
                SinkPop::Empty => break,
                SinkPop::Resynchronised => prop_assert!(false, "reliable reader must never resynchronise"),
            }
        }
        prop_assert!(pushed.is_empty());
    }

    /// `committed - consumer_cursor` must never exceed `capacity` for a
    /// registered reliable consumer, across any sequence of pushes/pops —
    /// equivalently, `write_available` never goes negative.
    #[test]
    fn reliable_consumer_never_falls_further_behind_than_capacity(
        lens in prop::collection::vec(0u8..32, 0..150),
        pop_every in 1usize..5,
    ) {
        let ring = ring(10, 4); // 1 KiB
        let mut sink = Sink::attach_to(Arc::clone(&ring), true, 0, false).unwrap();

        let mut seq = 1u64;
        for (i, len) in lens.into_iter().enumerate() {
            let payload = vec![0u8; len as usize];
            let header = Header::standard(seq, 0, payload.len());
            if ring.try_push(&header, &payload).unwrap() {
                seq += 1;
            }
            if i % pop_every == 0 {
                let _ = sink.pop_nonblocking();
            }
        }
    }

    /// A droppable reader that never pops cannot block the producer: every
    /// push that fits capacity must succeed regardless of how far behind
    /// the droppable reader has fallen.
    #[test]
    fn droppable_reader_never_exerts_back_pressure(n in 1usize..500) {
        let ring = ring(9, 4); // 512 bytes
        let _droppable = Sink::attach_to(Arc::clone(&ring), false, 0, false).unwrap();

        for seq in 1..=n as u64 {
            let header = Header::standard(seq, 0, 4);
            prop_assert!(ring.try_push(&header, &[0u8; 4]).unwrap());
        }
    }
}
