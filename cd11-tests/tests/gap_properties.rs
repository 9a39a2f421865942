//! Property-based tests for gap tracking
//!
//! Random operation sequences must never break the structural invariants of
//! the gap list: ranges stay inside the tracked bounds, stay ordered and
//! never overlap.

use cd11_protocol::{Acknack, GapStateSnapshot, SequenceGapTracker};
use proptest::prelude::*;

fn check_invariants(tracker: &SequenceGapTracker) {
    let list = tracker.gap_list();
    let min = list.min();
    let max = list.max();
    assert!(min <= max, "bounds inverted: [{min}, {max}]");

    let ranges = list.gap_ranges(false, false).unwrap();
    for &(start, end) in &ranges {
        assert!(start <= end, "gap inverted: [{start}, {end}]");
        assert!(start >= min && end <= max, "gap [{start}, {end}] outside [{min}, {max}]");
    }
    for pair in ranges.windows(2) {
        assert!(
            pair[0].1 < pair[1].0,
            "gaps overlap or touch out of order: {pair:?}"
        );
    }
}

fn record_op_strategy() -> impl Strategy<Value = (u64, bool)> {
    (0u64..2000, any::<bool>())
}

proptest! {
    #[test]
    fn recorded_sequences_keep_invariants(ops in prop::collection::vec(record_op_strategy(), 0..100)) {
        let mut tracker = SequenceGapTracker::new();
        for (value, is_data_frame) in ops {
            tracker.record_sequence_number(value, is_data_frame);
            check_invariants(&tracker);
        }
    }

    #[test]
    fn data_frames_never_reappear_as_gaps(values in prop::collection::vec(0u64..2000, 1..100)) {
        let mut tracker = SequenceGapTracker::new();
        for &value in &values {
            tracker.record_sequence_number(value, true);
        }

        let ranges = tracker.gap_list().gap_ranges(false, false).unwrap();
        for &value in &values {
            for &(start, end) in &ranges {
                prop_assert!(
                    value < start || value > end,
                    "recorded value {} inside gap [{}, {}]",
                    value, start, end
                );
            }
        }
    }

    #[test]
    fn reconcile_never_breaks_invariants(
        seed in prop::collection::vec(0u64..500, 0..20),
        lowest in 0u64..300,
        span in 0u64..300,
        gap_ranges in prop::collection::vec(0u64..600, 0..8),
    ) {
        let mut tracker = SequenceGapTracker::new();
        for value in seed {
            tracker.record_sequence_number(value, true);
        }

        let acknack = Acknack {
            frameset_acked: "STA01".into(),
            lowest_seq_num: lowest,
            highest_seq_num: lowest + span,
            gap_ranges,
        };
        // Content errors drop the update whole; either way the invariants hold.
        let _ = tracker.reconcile(&acknack);
        check_invariants(&tracker);
    }

    #[test]
    fn snapshot_round_trip_preserves_state(values in prop::collection::vec(0u64..2000, 0..60)) {
        let mut tracker = SequenceGapTracker::new();
        for value in values {
            tracker.record_sequence_number(value, true);
        }

        let json = tracker.snapshot().to_json().unwrap();
        let restored =
            SequenceGapTracker::from_snapshot(&GapStateSnapshot::from_json(&json).unwrap()).unwrap();

        prop_assert_eq!(restored.starting_sequence_number(), tracker.starting_sequence_number());
        prop_assert_eq!(restored.gap_list().min(), tracker.gap_list().min());
        prop_assert_eq!(restored.gap_list().max(), tracker.gap_list().max());
        prop_assert_eq!(
            restored.gap_list().gap_ranges(false, false).unwrap(),
            tracker.gap_list().gap_ranges(false, false).unwrap()
        );
    }
}
