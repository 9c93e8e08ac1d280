use ironpane::testing::{assert_pane_timings, assert_panes_equal, assert_watermarks_advance};
use ironpane::*;

fn elem<V>(value: V, ts: TimestampMs) -> WindowedValue<V, IntervalWindow> {
    WindowedValue::new(value, ts, Vec::new(), PaneInfo::NO_FIRING)
}

fn w(start: TimestampMs, end: TimestampMs) -> IntervalWindow {
    IntervalWindow::new(start, end)
}

fn fixed(size: DurationMs) -> anyhow::Result<WindowingStrategy<FixedWindows>> {
    Ok(WindowingStrategy::of(FixedWindows::of(size)?))
}

/// Route operator logs to the test output; filter with `IRONPANE_LOG`.
fn test_logger() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_env("IRONPANE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}

type SumOp<K, WF> = GroupByKeyOp<K, u64, u64, u64, Sum<u64>, WF>;

#[test]
fn on_time_panes_fire_when_watermark_passes_window_end() -> anyhow::Result<()> {
    test_logger();
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("sum", fixed(10)?, Sum::new())?;
    let mut out = CollectingEmitter::default();

    op.process_element(KeyedWorkItem::elements("k", [elem(1, 1), elem(2, 5), elem(4, 12)]), &mut out)?;
    assert!(out.elements.is_empty());
    assert_eq!(op.state_len(), 2);

    op.process_watermark(10, &mut out)?;
    assert_panes_equal(&out.elements, vec![("k", w(0, 10), 3)]);
    assert_eq!(out.elements[0].timestamp(), 9);
    assert_eq!(out.elements[0].pane(), PaneInfo::ON_TIME_AND_ONLY_FIRING);
    assert_eq!(out.watermarks, vec![10]);

    op.process_watermark(20, &mut out)?;
    assert_panes_equal(&out.elements, vec![("k", w(0, 10), 3), ("k", w(10, 20), 4)]);
    assert_eq!(out.watermarks, vec![10, 20]);
    assert_eq!(op.state_len(), 0);
    assert_eq!(op.pending_timers(), 0);
    Ok(())
}

#[test]
fn late_data_within_lateness_fires_late_panes_and_beyond_is_dropped() -> anyhow::Result<()> {
    let strategy = fixed(10)?.with_allowed_lateness(5);
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("late", strategy, Sum::new())?;
    let mut out = CollectingEmitter::default();

    op.process_element(KeyedWorkItem::elements("k", [elem(1, 1)]), &mut out)?;
    op.process_watermark(10, &mut out)?;
    assert_eq!(out.elements.len(), 1);
    let on_time = out.elements[0].pane();
    assert_eq!(on_time.timing, Timing::OnTime);
    assert!(!on_time.is_last);

    // behind the watermark but within lateness
    op.process_element(KeyedWorkItem::elements("k", [elem(2, 3)]), &mut out)?;
    assert_eq!(out.elements.len(), 2);
    let late = &out.elements[1];
    assert_eq!(late.value(), &("k", 2));
    assert_eq!(late.pane(), PaneInfo::create_pane(false, false, Timing::Late, 1, 1));

    op.process_watermark(15, &mut out)?;
    assert_eq!(op.state_len(), 0);
    assert_eq!(op.stats().windows_purged, 1);

    // window [0, 10) expired at 14
    op.process_element(KeyedWorkItem::elements("k", [elem(4, 4)]), &mut out)?;
    assert_eq!(out.elements.len(), 2);
    assert_eq!(op.state_len(), 0);
    assert_eq!(op.stats().late_elements_dropped, 1);
    Ok(())
}

#[test]
fn sessions_merge_into_one_pane() -> anyhow::Result<()> {
    test_logger();
    let strategy = WindowingStrategy::of(Sessions::with_gap(5)?);
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("sessions", strategy, Sum::new())?;
    let mut out = CollectingEmitter::default();

    op.process_element(KeyedWorkItem::elements("k", [elem(1, 0)]), &mut out)?;
    op.process_element(KeyedWorkItem::elements("k", [elem(2, 3)]), &mut out)?;
    op.process_element(KeyedWorkItem::elements("k", [elem(4, 20)]), &mut out)?;
    assert_eq!(op.state_len(), 2);
    assert_eq!(op.stats().windows_merged, 1);

    op.process_watermark(100, &mut out)?;
    assert_panes_equal(&out.elements, vec![("k", w(0, 8), 3), ("k", w(20, 25), 4)]);
    let timestamps: Vec<_> = out.elements.iter().map(WindowedValue::timestamp).collect();
    assert_eq!(timestamps, vec![7, 24]);
    assert_eq!(op.state_len(), 0);
    Ok(())
}

#[test]
fn sessions_are_tracked_per_key() -> anyhow::Result<()> {
    let strategy = WindowingStrategy::of(Sessions::with_gap(5)?);
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("sessions", strategy, Sum::new())?;
    let mut out = CollectingEmitter::default();

    op.process_element(KeyedWorkItem::elements("a", [elem(1, 0), elem(1, 3)]), &mut out)?;
    op.process_element(KeyedWorkItem::elements("b", [elem(10, 2)]), &mut out)?;
    op.process_watermark(100, &mut out)?;

    assert_panes_equal(&out.elements, vec![("a", w(0, 8), 2), ("b", w(2, 7), 10)]);
    Ok(())
}

#[test]
fn early_firings_accumulate_or_discard() -> anyhow::Result<()> {
    for (mode, expected) in [(AccumulationMode::Accumulating, [3, 6]), (AccumulationMode::Discarding, [3, 3])] {
        let strategy = fixed(10)?
            .with_trigger(Trigger::AfterWatermark { early: Some(2), late: None })
            .with_accumulation_mode(mode);
        let mut op: SumOp<&str, _> = GroupByKeyOp::new("early", strategy, Sum::new())?;
        let out = testing::TestStream::new()
            .add_element("k", 1, 1)
            .add_element("k", 2, 2)
            .add_element("k", 3, 3)
            .advance_watermark_to(10)
            .run(&mut op)?;

        let values: Vec<u64> = out.elements.iter().map(|o| o.value().1).collect();
        assert_eq!(values, expected, "{mode:?}");
        assert_pane_timings(&out.elements, &[Timing::Early, Timing::OnTime]);
        assert_eq!(out.elements[0].pane(), PaneInfo::create_pane(true, false, Timing::Early, 0, -1));
        assert_eq!(out.elements[1].pane(), PaneInfo::create_pane(false, true, Timing::OnTime, 1, 0));
    }
    Ok(())
}

#[test]
fn finished_trigger_drops_further_input() -> anyhow::Result<()> {
    let strategy = fixed(10)?.with_trigger(Trigger::element_count_at_least(2));
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("count", strategy, Sum::new())?;
    let mut out = CollectingEmitter::default();

    op.process_element(KeyedWorkItem::elements("k", [elem(1, 1), elem(2, 2), elem(4, 3)]), &mut out)?;
    assert_eq!(out.elements.len(), 1);
    assert_eq!(out.elements[0].value(), &("k", 3));
    assert!(out.elements[0].pane().is_last);
    assert_eq!(op.stats().closed_window_drops, 1);

    op.process_watermark(10, &mut out)?;
    assert_eq!(out.elements.len(), 1);
    assert_eq!(op.state_len(), 0);
    Ok(())
}

#[test]
fn never_trigger_emits_only_at_garbage_collection() -> anyhow::Result<()> {
    let strategy = fixed(10)?.with_trigger(Trigger::Never).with_allowed_lateness(10);
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("never", strategy, Sum::new())?;
    let out = testing::TestStream::new()
        .add_element("k", 5, 1)
        .advance_watermark_to(15)
        .add_element("k", 6, 2)
        .advance_watermark_to(20)
        .run(&mut op)?;

    assert_panes_equal(&out.elements, vec![("k", w(0, 10), 11)]);
    assert_eq!(out.elements[0].pane(), PaneInfo::ON_TIME_AND_ONLY_FIRING);
    Ok(())
}

#[test]
fn closing_behavior_controls_empty_final_pane() -> anyhow::Result<()> {
    for (closing, panes) in [(ClosingBehavior::FireIfNonEmpty, 1), (ClosingBehavior::FireAlways, 2)] {
        let strategy = fixed(10)?
            .with_trigger(Trigger::repeatedly(Trigger::element_count_at_least(2)))
            .with_closing_behavior(closing);
        let mut op: SumOp<&str, _> = GroupByKeyOp::new("closing", strategy, Sum::new())?;
        let out = testing::TestStream::new()
            .add_element("k", 1, 1)
            .add_element("k", 1, 2)
            .advance_watermark_to(10)
            .run(&mut op)?;

        assert_eq!(out.elements.len(), panes, "{closing:?}");
        if closing == ClosingBehavior::FireAlways {
            assert_eq!(out.elements[1].value(), &("k", 0));
            assert!(out.elements[1].pane().is_last);
        }
    }
    Ok(())
}

#[test]
fn on_time_behavior_controls_empty_on_time_pane() -> anyhow::Result<()> {
    for (behavior, expected) in [
        (OnTimeBehavior::FireAlways, vec![Timing::Early, Timing::OnTime]),
        (OnTimeBehavior::FireIfNonEmpty, vec![Timing::Early]),
    ] {
        let strategy = fixed(10)?
            .with_trigger(Trigger::AfterWatermark { early: Some(1), late: Some(1) })
            .with_allowed_lateness(10)
            .with_on_time_behavior(behavior);
        let mut op: SumOp<&str, _> = GroupByKeyOp::new("on-time", strategy, Sum::new())?;
        let out = testing::TestStream::new()
            .add_element("k", 7, 1)
            .advance_watermark_to(10)
            .run(&mut op)?;
        assert_pane_timings(&out.elements, &expected);
    }
    Ok(())
}

#[test]
fn output_watermark_is_held_and_never_regresses() -> anyhow::Result<()> {
    let strategy = fixed(10)?.with_timestamp_combiner(TimestampCombiner::Earliest);
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("holds", strategy, Sum::new())?;
    let mut out = CollectingEmitter::default();

    op.process_element(KeyedWorkItem::elements("k", [elem(1, 3)]), &mut out)?;
    op.process_watermark(5, &mut out)?;
    assert_eq!(op.output_watermark(), 3);
    op.process_watermark(8, &mut out)?;
    op.process_watermark(7, &mut out)?;
    assert_eq!(op.input_watermark(), 8);
    assert_eq!(out.watermarks, vec![3]);

    op.process_watermark(10, &mut out)?;
    assert_eq!(out.elements[0].timestamp(), 3);
    assert_eq!(out.watermarks, vec![3, 10]);
    assert_watermarks_advance(&out.watermarks);
    Ok(())
}

#[test]
fn global_window_fires_at_end_of_time() -> anyhow::Result<()> {
    let mut op = GroupByKeyOp::new("global", WindowingStrategy::default(), Count)?;
    let mut out = CollectingEmitter::default();
    let items = ["x", "y", "z"].map(WindowedValue::value_in_global_window);
    op.process_element(KeyedWorkItem::elements(1u32, items), &mut out)?;

    op.process_watermark(1_000_000, &mut out)?;
    assert!(out.elements.is_empty());

    op.process_watermark(TIMESTAMP_MAX_VALUE, &mut out)?;
    assert_eq!(out.elements.len(), 1);
    assert_eq!(out.elements[0].value(), &(1, 3));
    assert_eq!(out.elements[0].windows(), &[GlobalWindow]);
    assert_eq!(out.elements[0].pane(), PaneInfo::ON_TIME_AND_ONLY_FIRING);
    Ok(())
}

#[test]
fn group_by_key_keeps_arrival_order() -> anyhow::Result<()> {
    let mut op = GroupByKeyOp::group_by_key("gbk", fixed(10)?)?;
    let out = testing::TestStream::new()
        .add_elements(
            [("k", "b", 4), ("k", "a", 1), ("j", "c", 2), ("k", "d", 15)]
                .map(|(k, v, ts)| (k, v.to_string(), ts)),
        )
        .advance_watermark_to_infinity()
        .run(&mut op)?;

    assert_panes_equal(
        &out.elements,
        vec![
            ("j", w(0, 10), vec!["c".to_string()]),
            ("k", w(0, 10), vec!["b".to_string(), "a".to_string()]),
            ("k", w(10, 20), vec!["d".to_string()]),
        ],
    );
    Ok(())
}

#[test]
fn upstream_watermarks_combine_to_the_minimum() -> anyhow::Result<()> {
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("join", fixed(10)?, Sum::new())?.with_upstreams(2);
    let mut out = CollectingEmitter::default();
    op.process_element(KeyedWorkItem::elements("k", [elem(1, 1)]), &mut out)?;

    op.process_upstream_watermark(0, 50, &mut out)?;
    assert!(out.elements.is_empty());
    op.process_upstream_watermark(1, 10, &mut out)?;
    assert_eq!(out.elements.len(), 1);
    assert_eq!(op.input_watermark(), 10);

    let err = op.process_upstream_watermark(7, 60, &mut out);
    assert!(matches!(err, Err(Error::WatermarkInvariant(_))));
    Ok(())
}

#[test]
fn delivered_timer_purges_window() -> anyhow::Result<()> {
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("timers", fixed(10)?, Sum::new())?;
    let mut out = CollectingEmitter::default();
    op.process_element(KeyedWorkItem::elements("k", [elem(5, 1)]), &mut out)?;

    let timer = KeyedTimer {
        key: "k",
        timer: TimerData::event_time(9, TimerKind::GarbageCollection, w(0, 10)),
    };
    op.process_timer(timer, &mut out)?;
    assert_panes_equal(&out.elements, vec![("k", w(0, 10), 5)]);
    assert_eq!(op.state_len(), 0);
    Ok(())
}

#[test]
fn delivered_end_of_window_timer_fires_on_time_once() -> anyhow::Result<()> {
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("eow", fixed(10)?.with_allowed_lateness(20), Sum::new())?;
    let mut out = CollectingEmitter::default();
    op.process_element(KeyedWorkItem::elements("k", [elem(5, 1)]), &mut out)?;

    let timer = KeyedTimer {
        key: "k",
        timer: TimerData::event_time(9, TimerKind::EndOfWindow, w(0, 10)),
    };
    op.process_timer(timer.clone(), &mut out)?;
    op.process_watermark(10, &mut out)?;
    op.process_timer(timer, &mut out)?;
    op.process_watermark(30, &mut out)?;

    assert_panes_equal(&out.elements, vec![("k", w(0, 10), 5)]);
    assert_eq!(out.elements[0].pane(), PaneInfo::create_pane(true, false, Timing::OnTime, 0, 0));
    assert_eq!(op.state_len(), 0);
    Ok(())
}

#[test]
fn processing_time_trigger_fires_early_panes() -> anyhow::Result<()> {
    let strategy = fixed(100)?.with_trigger(Trigger::repeatedly(Trigger::after_processing_time(10)));
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("ptime", strategy, Sum::new())?;
    let out = testing::TestStream::new()
        .advance_processing_time(0)
        .add_element("k", 1, 5)
        .advance_processing_time(5)
        .add_element("k", 2, 6)
        .advance_processing_time(10)
        .add_element("k", 4, 7)
        .advance_processing_time(19)
        .advance_processing_time(20)
        .advance_watermark_to_infinity()
        .run(&mut op)?;

    let values: Vec<u64> = out.elements.iter().map(|o| o.value().1).collect();
    assert_eq!(values, [3, 4]);
    assert_pane_timings(&out.elements, &[Timing::Early, Timing::Early]);
    assert_eq!(out.elements[1].pane(), PaneInfo::create_pane(false, false, Timing::Early, 1, -1));
    assert_eq!(op.state_len(), 0);
    assert_eq!(op.pending_timers(), 0);
    Ok(())
}

#[test]
fn processing_time_trigger_without_repeat_closes_the_window() -> anyhow::Result<()> {
    let strategy = fixed(100)?.with_trigger(Trigger::after_processing_time(10));
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("ptime-once", strategy, Sum::new())?;
    let mut out = CollectingEmitter::default();
    op.advance_processing_time(0, &mut out)?;
    op.process_element(KeyedWorkItem::elements("k", [elem(1, 5)]), &mut out)?;
    op.advance_processing_time(10, &mut out)?;
    op.process_element(KeyedWorkItem::elements("k", [elem(2, 6)]), &mut out)?;
    op.process_watermark(TIMESTAMP_MAX_VALUE, &mut out)?;

    assert_panes_equal(&out.elements, vec![("k", w(0, 100), 1)]);
    assert_eq!(out.elements[0].pane(), PaneInfo::create_pane(true, true, Timing::Early, 0, -1));
    assert_eq!(op.stats().closed_window_drops, 1);
    assert_eq!(op.state_len(), 0);
    Ok(())
}

#[test]
fn merging_into_extracted_accumulator_leaves_state_alone() -> anyhow::Result<()> {
    let mut store = InMemoryStateStore::new();
    let mut spent = WindowState::new(2u64);
    spent.accumulator.extract_with(|a| a)?;
    store.put(&"k", &w(0, 10), WindowState::new(4u64))?;
    store.put(&"k", &w(15, 25), spent)?;

    let strategy = WindowingStrategy::of(Sessions::with_gap(10)?);
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("spent", strategy, Sum::new())?.with_state_store(store);
    let mut out = CollectingEmitter::default();
    let err = op.process_element(KeyedWorkItem::elements("k", [elem(1, 8)]), &mut out);

    assert!(matches!(err, Err(Error::IncompatibleAccumulators(_))));
    assert!(out.elements.is_empty());
    assert_eq!(op.state_len(), 2);
    assert_eq!(op.state_store().get(&"k", &w(0, 10))?, Some(WindowState::new(4)));
    assert!(op.state_store().get(&"k", &w(15, 25))?.is_some_and(|s| s.accumulator.is_extracted()));
    assert_eq!(op.pending_timers(), 0);
    Ok(())
}

#[test]
fn out_of_range_timestamps_are_rejected() -> anyhow::Result<()> {
    let strategy = WindowingStrategy::of(Sessions::with_gap(10)?);
    let mut op: SumOp<&str, _> = GroupByKeyOp::new("range", strategy, Sum::new())?;
    let mut out = CollectingEmitter::default();

    let err = op.process_element(KeyedWorkItem::elements("k", [elem(1, i64::MAX)]), &mut out);
    assert!(matches!(err, Err(Error::TimestampOutOfRange(i64::MAX))));
    assert_eq!(op.state_len(), 0);

    op.process_element(KeyedWorkItem::elements("k", [elem(1, TIMESTAMP_MAX_VALUE - 1)]), &mut out)?;
    assert_eq!(
        op.state_store().windows_for(&"k")?,
        vec![w(TIMESTAMP_MAX_VALUE - 1, TIMESTAMP_MAX_VALUE)]
    );
    Ok(())
}

#[test]
fn encoded_store_matches_in_memory_store() -> anyhow::Result<()> {
    let run = |encoded: bool| -> anyhow::Result<Vec<KeyedOutput<String, u64, IntervalWindow>>> {
        let strategy = WindowingStrategy::of(Sessions::with_gap(5)?).with_allowed_lateness(5);
        let mut op: SumOp<String, _> = GroupByKeyOp::new("store", strategy, Sum::new())?;
        if encoded {
            op = op.with_state_store(EncodedStateStore::with_postcard());
        }
        let out = testing::TestStream::new()
            .add_element("a".to_string(), 1, 0)
            .add_element("a".to_string(), 2, 4)
            .advance_watermark_to(9)
            .add_element("a".to_string(), 3, 6)
            .add_element("b".to_string(), 5, 1)
            .advance_watermark_to_infinity()
            .run(&mut op)?;
        Ok(out.elements)
    };
    assert_eq!(run(false)?, run(true)?);
    Ok(())
}

#[test]
fn snapshot_restores_into_fresh_operator() -> anyhow::Result<()> {
    let strategy = fixed(10)?.with_allowed_lateness(20);
    let mut op: SumOp<String, _> = GroupByKeyOp::new("snap", strategy.clone(), Sum::new())?;
    let mut out = CollectingEmitter::default();
    op.process_element(KeyedWorkItem::elements("k".to_string(), [elem(2, 1), elem(3, 11)]), &mut out)?;
    op.process_watermark(10, &mut out)?;
    let bytes = op.snapshot_bytes()?;

    let mut restored: SumOp<String, _> = GroupByKeyOp::new("snap", strategy.clone(), Sum::new())?;
    restored.restore_bytes(&bytes)?;
    assert_eq!(restored.state_len(), op.state_len());
    assert_eq!(restored.input_watermark(), 10);
    assert_eq!(restored.stats(), op.stats());

    let mut a = CollectingEmitter::default();
    let mut b = CollectingEmitter::default();
    op.process_watermark(50, &mut a)?;
    restored.process_watermark(50, &mut b)?;
    assert_eq!(a.elements, b.elements);
    assert_eq!(a.watermarks, b.watermarks);

    let mut other: SumOp<String, _> = GroupByKeyOp::new("other", strategy, Sum::new())?;
    assert!(matches!(other.restore_bytes(&bytes), Err(Error::State(_))));

    // upstream watermarks survive too
    let mut joined: SumOp<String, _> = GroupByKeyOp::new("join", fixed(10)?, Sum::new())?.with_upstreams(2);
    joined.process_element(KeyedWorkItem::elements("k".to_string(), [elem(1, 1)]), &mut out)?;
    joined.process_upstream_watermark(0, 100, &mut out)?;
    joined.process_upstream_watermark(1, 5, &mut out)?;
    let bytes = joined.snapshot_bytes()?;

    let mut resumed: SumOp<String, _> = GroupByKeyOp::new("join", fixed(10)?, Sum::new())?.with_upstreams(2);
    resumed.restore_bytes(&bytes)?;
    let mut panes = CollectingEmitter::default();
    resumed.process_upstream_watermark(1, 50, &mut panes)?;
    assert_eq!(resumed.input_watermark(), 50);
    assert_panes_equal(&panes.elements, vec![("k".to_string(), w(0, 10), 1)]);
    Ok(())
}

#[test]
fn invalid_strategy_is_rejected() -> anyhow::Result<()> {
    let strategy = fixed(10)?.with_allowed_lateness(-1);
    let op: Result<SumOp<&str, _>> = GroupByKeyOp::new("bad", strategy, Sum::new());
    assert!(matches!(op, Err(Error::InvalidWindowing(_))));
    Ok(())
}
