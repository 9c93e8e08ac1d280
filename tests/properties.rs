use ironpane::testing::{assert_watermarks_advance, pane_values};
use ironpane::*;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn elem(value: u64, ts: TimestampMs) -> WindowedValue<u64, IntervalWindow> {
    WindowedValue::new(value, ts, Vec::new(), PaneInfo::NO_FIRING)
}

fn session_sum() -> WindowedCombiner<u64, u64, u64, Sum<u64>, Sessions> {
    let strategy = WindowingStrategy::of(Sessions::with_gap(5).unwrap())
        .with_timestamp_combiner(TimestampCombiner::Earliest);
    WindowedCombiner::new(strategy, Sum::new())
}

fn reduce_all(
    c: &WindowedCombiner<u64, u64, u64, Sum<u64>, Sessions>,
    inputs: &[(u64, TimestampMs)],
) -> Vec<WindowedValue<u64, IntervalWindow>> {
    inputs
        .iter()
        .try_fold(c.zero(), |accs, &(v, ts)| c.reduce(accs, elem(v, ts)))
        .unwrap()
}

fn inputs() -> impl Strategy<Value = Vec<(u64, TimestampMs)>> {
    prop::collection::vec((0u64..100, 0i64..200), 0..40)
}

#[derive(Clone, Debug)]
enum Step {
    Element(TimestampMs),
    Watermark(TimestampMs),
}

fn steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            (0i64..300).prop_map(Step::Element),
            (0i64..300).prop_map(Step::Watermark),
        ],
        1..60,
    )
}

proptest! {
    #[test]
    fn fixed_window_contains_its_timestamp(ts in -10_000i64..10_000, size in 1i64..500, offset in 0i64..500) {
        let fw = FixedWindows::with_offset(size, offset % size).unwrap();
        let windows = fw.assign_windows(ts);
        prop_assert_eq!(windows.len(), 1);
        prop_assert!(windows[0].contains(ts));
        prop_assert_eq!(windows[0].duration(), size);
    }

    #[test]
    fn sliding_windows_all_contain_their_timestamp(ts in -1_000i64..1_000, period in 1i64..50, extra in 0i64..100) {
        let sw = SlidingWindows::of(period + extra, period).unwrap();
        let windows = sw.assign_windows(ts);
        prop_assert!(!windows.is_empty());
        prop_assert!(windows.iter().all(|w| w.contains(ts)));
        let distinct: BTreeSet<_> = windows.iter().collect();
        prop_assert_eq!(distinct.len(), windows.len());
    }

    #[test]
    fn merged_sessions_are_disjoint_and_cover_inputs(inputs in inputs()) {
        let accs = reduce_all(&session_sum(), &inputs);
        let windows: Vec<IntervalWindow> = accs.iter().map(|a| a.windows()[0]).collect();
        for pair in windows.windows(2) {
            prop_assert!(pair[0].is_disjoint(&pair[1]));
        }
        for &(_, ts) in &inputs {
            prop_assert!(windows.iter().any(|w| w.contains(ts)));
        }
        let total: u64 = accs.iter().map(|a| *a.value()).sum();
        prop_assert_eq!(total, inputs.iter().map(|(v, _)| v).sum::<u64>());
    }

    #[test]
    fn split_reduce_then_merge_matches_reduce(inputs in inputs(), split in 0usize..40) {
        let c = session_sum();
        let split = split.min(inputs.len());
        let (left, right) = inputs.split_at(split);
        let merged = c.merge(reduce_all(&c, left), reduce_all(&c, right)).unwrap();
        prop_assert_eq!(merged, reduce_all(&c, &inputs));
    }

    #[test]
    fn merging_with_zero_is_identity(inputs in inputs()) {
        let c = session_sum();
        let accs = reduce_all(&c, &inputs);
        prop_assert_eq!(c.merge(accs.clone(), c.zero()).unwrap(), accs.clone());
        prop_assert_eq!(c.merge(c.zero(), accs.clone()).unwrap(), accs);
    }

    #[test]
    fn earliest_is_the_minimum(ts in prop::collection::vec(any::<i64>(), 1..20)) {
        prop_assert_eq!(TimestampCombiner::Earliest.combine_all(ts.iter().copied()), ts.iter().min().copied());
        prop_assert_eq!(TimestampCombiner::Latest.combine_all(ts.iter().copied()), ts.iter().max().copied());
    }

    #[test]
    fn output_watermark_never_regresses(steps in steps(), lateness in 0i64..50) {
        let strategy = WindowingStrategy::of(Sessions::with_gap(10).unwrap())
            .with_allowed_lateness(lateness)
            .with_timestamp_combiner(TimestampCombiner::Earliest);
        let mut op = GroupByKeyOp::new("prop", strategy, Sum::<u64>::new()).unwrap();
        let mut out = CollectingEmitter::default();
        for step in steps {
            match step {
                Step::Element(ts) => {
                    op.process_element(KeyedWorkItem::elements("k", [elem(1, ts)]), &mut out).unwrap();
                }
                Step::Watermark(wm) => op.process_watermark(wm, &mut out).unwrap(),
            }
            prop_assert!(op.output_watermark() <= op.input_watermark());
        }
        assert_watermarks_advance(&out.watermarks);

        // Everything not dropped as late comes out once the watermark reaches the end of time.
        op.process_watermark(TIMESTAMP_MAX_VALUE, &mut out).unwrap();
        prop_assert_eq!(op.state_len(), 0);
        let emitted: u64 = pane_values(&out.elements).iter().map(|(_, _, v)| v).sum();
        prop_assert_eq!(emitted, op.stats().elements_added);
    }
}
