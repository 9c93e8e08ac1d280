use ironpane::testing::{assert_all, pane_values};
use ironpane::*;

type SumExecutor = ShardedExecutor<String, u64, u64, u64, Sum<u64>, FixedWindows>;

fn clicks() -> Vec<(String, WindowedValue<u64, IntervalWindow>)> {
    (0..100)
        .map(|i| (format!("user-{}", i % 10), WindowedValue::new(1, i % 20, Vec::new(), PaneInfo::NO_FIRING)))
        .collect()
}

fn executor(config: ExecutorConfig) -> anyhow::Result<SumExecutor> {
    let strategy = WindowingStrategy::of(FixedWindows::of(10)?);
    Ok(ShardedExecutor::new("clicks", strategy, Sum::new(), config)?)
}

#[test]
fn sharded_sum_fires_every_key_and_window() -> anyhow::Result<()> {
    let mut exec = executor(ExecutorConfig::default().with_shards(4))?;
    assert_eq!(exec.num_shards(), 4);

    let batch = exec.process_batch(clicks())?;
    assert!(batch.elements.is_empty());
    assert_eq!(exec.state_len(), 20);
    assert_eq!(batch.output_watermark, TIMESTAMP_MIN_VALUE);

    let fired = exec.advance_watermark(20)?;
    assert_eq!(fired.elements.len(), 20);
    assert_all(&fired.elements, |o| o.value().1 == 5);
    assert_all(&fired.elements, |o| o.pane() == PaneInfo::ON_TIME_AND_ONLY_FIRING);
    assert_eq!(fired.output_watermark, 20);
    assert_eq!(exec.watermarks().low(), 20);
    assert_eq!(exec.state_len(), 0);

    let stats = exec.stats();
    assert_eq!(stats.elements_added, 100);
    assert_eq!(stats.panes_emitted, 20);
    Ok(())
}

#[test]
fn sequential_and_parallel_agree() -> anyhow::Result<()> {
    let modes = [
        ExecutorConfig::sequential(3),
        ExecutorConfig::default().with_shards(3),
        ExecutorConfig::default().with_shards(3).with_mode(ExecMode::Parallel { threads: Some(2) }),
    ];
    let mut results = Vec::new();
    for config in modes {
        let mut exec = executor(config)?;
        exec.process_batch(clicks())?;
        let out = exec.advance_watermark(20)?;
        results.push(pane_values(&out.elements));
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0], results[2]);
    Ok(())
}

#[test]
fn keys_always_land_on_the_same_shard() -> anyhow::Result<()> {
    let exec = executor(ExecutorConfig::sequential(8))?;
    for i in 0..50 {
        let key = format!("user-{i}");
        let shard = exec.shard_for(&key);
        assert!(shard < 8);
        assert_eq!(shard, exec.shard_for(&key));
    }
    Ok(())
}

#[test]
fn key_state_lives_on_one_shard() -> anyhow::Result<()> {
    let mut exec = executor(ExecutorConfig::sequential(4))?;
    exec.process_batch(clicks())?;
    for (i, shard) in exec.shards().iter().enumerate() {
        let expected = (0..10).filter(|k| exec.shard_for(&format!("user-{k}")) == i).count();
        assert_eq!(shard.state_len(), expected * 2, "shard {i}");
    }
    Ok(())
}

#[test]
fn zero_shards_is_an_error() -> anyhow::Result<()> {
    let exec = executor(ExecutorConfig::sequential(0));
    assert!(exec.is_err());
    Ok(())
}

#[test]
fn processing_time_must_strictly_increase() -> anyhow::Result<()> {
    let mut exec = executor(ExecutorConfig::sequential(2))?;
    exec.advance_processing_time(5)?;
    assert_eq!(exec.watermarks().synchronized_processing_time(), Some(5));
    let again: Result<_> = exec.advance_processing_time(5);
    assert!(matches!(again, Err(Error::WatermarkInvariant(_))));
    exec.advance_processing_time(6)?;
    Ok(())
}
