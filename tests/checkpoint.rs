#![cfg(feature = "checkpointing")]

use ironpane::checkpoint::{CheckpointConfig, CheckpointManager, CheckpointPolicy, operator_id};
use ironpane::*;
use std::path::Path;

type SumOp = GroupByKeyOp<String, u64, u64, u64, Sum<u64>, FixedWindows>;

fn manager(dir: &Path, max_checkpoints: Option<usize>) -> anyhow::Result<CheckpointManager> {
    CheckpointManager::new(CheckpointConfig {
        enabled: true,
        directory: dir.to_path_buf(),
        policy: CheckpointPolicy::EveryWatermark,
        auto_recover: true,
        max_checkpoints,
    })
}

fn op() -> anyhow::Result<SumOp> {
    let strategy = WindowingStrategy::of(FixedWindows::of(10)?).with_allowed_lateness(20);
    Ok(GroupByKeyOp::new("sums", strategy, Sum::new())?)
}

fn feed(op: &mut SumOp, out: &mut CollectingEmitter<KeyedOutput<String, u64, IntervalWindow>>) -> anyhow::Result<()> {
    for (v, ts) in [(2, 1), (3, 11), (4, 12)] {
        let e = WindowedValue::new(v, ts, Vec::new(), PaneInfo::NO_FIRING);
        op.process_element(KeyedWorkItem::elements("k".to_string(), [e]), out)?;
    }
    op.process_watermark(10, out)?;
    Ok(())
}

#[test]
fn recovered_operator_continues_where_checkpoint_left_off() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut original = op()?;
    let mut out = CollectingEmitter::default();
    feed(&mut original, &mut out)?;
    assert_eq!(out.elements.len(), 1);

    let mut m = manager(dir.path(), None)?;
    assert!(m.should_checkpoint());
    let path = m.checkpoint(&original)?;
    assert!(path.exists());

    let mut recovered = op()?;
    let mut m = manager(dir.path(), None)?;
    assert_eq!(m.recover(&mut recovered)?, Some(0));
    assert_eq!(recovered.state_len(), original.state_len());
    assert_eq!(recovered.input_watermark(), 10);

    let mut a = CollectingEmitter::default();
    let mut b = CollectingEmitter::default();
    original.process_watermark(20, &mut a)?;
    recovered.process_watermark(20, &mut b)?;
    assert_eq!(a.elements, b.elements);
    assert_eq!(b.elements[0].value(), &("k".to_string(), 7));

    // The next checkpoint continues the sequence.
    let next = m.checkpoint(&recovered)?;
    assert!(next.to_string_lossy().ends_with("00000000000000000001.bin"));
    Ok(())
}

#[test]
fn nothing_to_recover_leaves_operator_untouched() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut m = manager(dir.path(), None)?;
    let mut fresh = op()?;
    assert_eq!(m.recover(&mut fresh)?, None);
    assert_eq!(fresh.state_len(), 0);
    Ok(())
}

#[test]
fn old_checkpoints_are_pruned() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut m = manager(dir.path(), Some(2))?;
    let op = op()?;
    let paths: Vec<_> = (0..4).map(|_| m.checkpoint(&op)).collect::<anyhow::Result<_>>()?;

    let remaining = std::fs::read_dir(dir.path())?.count();
    assert_eq!(remaining, 2);
    assert!(!paths[0].exists());
    assert!(!paths[1].exists());
    assert_eq!(m.find_latest_checkpoint(&operator_id("sums"))?, Some(paths[3].clone()));
    Ok(())
}

#[test]
fn corrupted_checkpoint_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut m = manager(dir.path(), None)?;
    let mut source = op()?;
    feed(&mut source, &mut CollectingEmitter::default())?;
    let path = m.checkpoint(&source)?;

    let mut bytes = std::fs::read(&path)?;
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xff;
    std::fs::write(&path, bytes)?;

    assert!(m.load_checkpoint(&path).is_err());
    assert!(m.recover(&mut op()?).is_err());
    Ok(())
}

#[test]
fn clear_removes_every_checkpoint() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut m = manager(dir.path(), None)?;
    let op = op()?;
    m.checkpoint(&op)?;
    m.checkpoint(&op)?;

    let id = operator_id("sums");
    m.clear_checkpoints(&id)?;
    assert_eq!(m.find_latest_checkpoint(&id)?, None);
    Ok(())
}
