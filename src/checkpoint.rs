//! Checkpointing of operator state for recovery.
//!
//! A checkpoint is a postcard-encoded [`OperatorSnapshot`](crate::group_by_key::OperatorSnapshot)
//! (window state, timers, watermark holds and watermarks) wrapped in a [`CheckpointState`]
//! carrying a SHA-256 checksum. Checkpoints are written as one file per sequence number,
//! the newest `max_checkpoints` are kept, and [`CheckpointManager::recover`] restores an
//! operator from the latest valid one.
//!
//! # Usage
//!
//! ```no_run
//! use ironpane::checkpoint::{CheckpointConfig, CheckpointManager, CheckpointPolicy};
//! use ironpane::{FixedWindows, GroupByKeyOp, Sum, WindowingStrategy};
//! use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let config = CheckpointConfig {
//!     enabled: true,
//!     directory: "./checkpoints".into(),
//!     policy: CheckpointPolicy::EveryNWatermarks(10),
//!     auto_recover: true,
//!     max_checkpoints: Some(5),
//! };
//! let mut manager = CheckpointManager::new(config)?;
//! let strategy = WindowingStrategy::of(FixedWindows::of(60_000)?);
//! let mut op = GroupByKeyOp::<String, u64, _, _, _, _>::new("sum", strategy, Sum::<u64>::new())?;
//!
//! manager.recover(&mut op)?;
//! // ... process elements and watermarks ...
//! if manager.should_checkpoint() {
//!     manager.checkpoint(&op)?;
//! }
//! # Ok(())
//! # }
//! ```

use crate::combine::CombineFn;
use crate::group_by_key::GroupByKeyOp;
use crate::time::TimestampMs;
use crate::windowing::WindowFn;
use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Debug, Write as _};
use std::fs::{DirEntry, File, create_dir_all, read_dir, remove_file};
use std::hash::Hash;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Controls when, where, and how checkpoints are created.
#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    pub enabled: bool,
    /// Directory where checkpoint files are stored.
    pub directory: PathBuf,
    pub policy: CheckpointPolicy,
    /// Restore from the latest checkpoint in [`CheckpointManager::recover`].
    pub auto_recover: bool,
    /// Number of checkpoints to retain per operator; `None` keeps all of them.
    pub max_checkpoints: Option<usize>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("./ironpane_checkpoints"),
            policy: CheckpointPolicy::EveryWatermark,
            auto_recover: true,
            max_checkpoints: Some(10),
        }
    }
}

/// When [`CheckpointManager::should_checkpoint`] says yes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointPolicy {
    EveryWatermark,
    EveryNWatermarks(u64),
    /// At most once every N seconds.
    TimeInterval(u64),
    Hybrid { watermarks: bool, interval_secs: u64 },
}

/// One checkpoint file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointState {
    /// File-name-safe id derived from the operator's step name.
    pub operator_id: String,
    pub step_name: String,
    pub sequence: u64,
    /// Wall-clock creation time, milliseconds since epoch.
    pub timestamp: u64,
    pub input_watermark: TimestampMs,
    pub output_watermark: TimestampMs,
    /// Postcard-encoded operator snapshot.
    pub payload: Vec<u8>,
    /// SHA-256 over the metadata and the payload.
    pub checksum: String,
}

impl CheckpointState {
    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "{}:{}:{}:{}:{}:",
                self.operator_id, self.sequence, self.timestamp, self.input_watermark, self.output_watermark
            )
            .as_bytes(),
        );
        hasher.update(&self.payload);
        to_hex(&hasher.finalize())
    }

    /// Whether the stored checksum matches the contents.
    pub fn verify(&self) -> bool {
        self.digest() == self.checksum
    }
}

/// Creates, persists, and recovers checkpoints.
pub struct CheckpointManager {
    config: CheckpointConfig,
    next_sequence: u64,
    watermarks_since_checkpoint: u64,
    last_checkpoint_time: Option<SystemTime>,
}

impl CheckpointManager {
    /// # Errors
    ///
    /// Returns an error if the checkpoint directory cannot be created.
    pub fn new(config: CheckpointConfig) -> Result<Self> {
        if config.enabled {
            create_dir_all(&config.directory).context("Failed to create checkpoint directory")?;
        }
        Ok(Self {
            config,
            next_sequence: 0,
            watermarks_since_checkpoint: 0,
            last_checkpoint_time: None,
        })
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Call once per processed watermark; returns whether a checkpoint is due.
    pub fn should_checkpoint(&mut self) -> bool {
        if !self.config.enabled {
            return false;
        }
        self.watermarks_since_checkpoint += 1;
        match self.config.policy {
            CheckpointPolicy::EveryWatermark => true,
            CheckpointPolicy::EveryNWatermarks(n) => self.watermarks_since_checkpoint >= n.max(1),
            CheckpointPolicy::TimeInterval(secs) => self.interval_elapsed(secs),
            CheckpointPolicy::Hybrid { watermarks, interval_secs } => {
                watermarks || self.interval_elapsed(interval_secs)
            }
        }
    }

    fn interval_elapsed(&self, secs: u64) -> bool {
        let now = SystemTime::now();
        self.last_checkpoint_time.is_none_or(|last| {
            now.duration_since(last)
                .is_ok_and(|elapsed| elapsed >= Duration::from_secs(secs))
        })
    }

    /// Snapshot `op` and write it as the next checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the operator state cannot be encoded or the file cannot be written.
    pub fn checkpoint<K, V, A, O, C, WF>(&mut self, op: &GroupByKeyOp<K, V, A, O, C, WF>) -> Result<PathBuf>
    where
        K: Clone + Debug + Eq + Hash + Send + Serialize + DeserializeOwned + 'static,
        V: Clone,
        A: Clone + Send + Serialize + DeserializeOwned + 'static,
        C: CombineFn<V, A, O>,
        WF: WindowFn,
    {
        let payload = op.snapshot_bytes().context("Failed to snapshot operator")?;
        let mut state = CheckpointState {
            operator_id: operator_id(op.step_name()),
            step_name: op.step_name().to_string(),
            sequence: self.next_sequence,
            timestamp: current_timestamp_ms(),
            input_watermark: op.input_watermark(),
            output_watermark: op.output_watermark(),
            payload,
            checksum: String::new(),
        };
        state.checksum = state.digest();
        self.save_checkpoint(&state)
    }

    /// Restore `op` from its latest checkpoint, if recovery is enabled and one exists.
    /// Returns the sequence number restored from.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint is unreadable, fails verification, or belongs to
    /// another step.
    pub fn recover<K, V, A, O, C, WF>(&mut self, op: &mut GroupByKeyOp<K, V, A, O, C, WF>) -> Result<Option<u64>>
    where
        K: Clone + Debug + Eq + Hash + Send + Serialize + DeserializeOwned + 'static,
        V: Clone,
        A: Clone + Send + Serialize + DeserializeOwned + 'static,
        C: CombineFn<V, A, O>,
        WF: WindowFn,
    {
        if !self.config.auto_recover {
            return Ok(None);
        }
        let Some(path) = self.find_latest_checkpoint(&operator_id(op.step_name()))? else {
            return Ok(None);
        };
        let state = self.load_checkpoint(&path)?;
        op.restore_bytes(&state.payload)
            .with_context(|| format!("Failed to restore operator from {}", path.display()))?;
        self.next_sequence = state.sequence + 1;
        info!(step = %state.step_name, sequence = state.sequence, "recovered from checkpoint");
        Ok(Some(state.sequence))
    }

    /// Write `state` to disk and prune old checkpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint file cannot be created or written to.
    pub fn save_checkpoint(&mut self, state: &CheckpointState) -> Result<PathBuf> {
        let filename = format!("checkpoint_{}_{:020}.bin", state.operator_id, state.sequence);
        let path = self.config.directory.join(&filename);

        let encoded = postcard::to_allocvec(state).context("Failed to serialize checkpoint")?;
        let mut file = File::create(&path).context("Failed to create checkpoint file")?;
        file.write_all(&encoded).context("Failed to write checkpoint")?;
        file.sync_all().context("Failed to sync checkpoint to disk")?;

        self.last_checkpoint_time = Some(SystemTime::now());
        self.watermarks_since_checkpoint = 0;
        self.next_sequence = self.next_sequence.max(state.sequence + 1);
        debug!(step = %state.step_name, sequence = state.sequence, bytes = encoded.len(), "saved checkpoint");

        self.cleanup_old_checkpoints(&state.operator_id)?;
        Ok(path)
    }

    /// Most recent checkpoint file of an operator.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint directory cannot be read.
    pub fn find_latest_checkpoint(&self, operator_id: &str) -> Result<Option<PathBuf>> {
        if !self.config.enabled || !self.config.directory.exists() {
            return Ok(None);
        }
        Ok(self.list_checkpoints(operator_id)?.pop().map(|(_, e)| e.path()))
    }

    /// Read and verify a checkpoint file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded, or the checksum does not match.
    pub fn load_checkpoint(&self, path: &Path) -> Result<CheckpointState> {
        let mut file = File::open(path).context("Failed to open checkpoint file")?;
        let mut encoded = Vec::new();
        file.read_to_end(&mut encoded).context("Failed to read checkpoint")?;

        let state: CheckpointState =
            postcard::from_bytes(&encoded).context("Failed to deserialize checkpoint")?;
        if !state.verify() {
            warn!(path = %path.display(), "checkpoint checksum mismatch");
            return Err(anyhow!("Checkpoint integrity check failed: checksum mismatch"));
        }
        Ok(state)
    }

    fn cleanup_old_checkpoints(&self, operator_id: &str) -> Result<()> {
        let Some(max_checkpoints) = self.config.max_checkpoints else {
            return Ok(());
        };
        let checkpoints = self.list_checkpoints(operator_id)?;
        if checkpoints.len() <= max_checkpoints {
            return Ok(());
        }
        let to_delete = checkpoints.len() - max_checkpoints;
        for (_, entry) in checkpoints.iter().take(to_delete) {
            remove_file(entry.path()).ok();
        }
        Ok(())
    }

    /// Delete every checkpoint of an operator.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint directory cannot be read.
    pub fn clear_checkpoints(&self, operator_id: &str) -> Result<()> {
        for (_, entry) in self.list_checkpoints(operator_id)? {
            remove_file(entry.path()).ok();
        }
        Ok(())
    }

    /// Checkpoint files of an operator, oldest first.
    fn list_checkpoints(&self, operator_id: &str) -> Result<Vec<(u64, DirEntry)>> {
        let prefix = format!("checkpoint_{operator_id}_");
        let mut checkpoints: Vec<_> = read_dir(&self.config.directory)
            .context("Failed to read checkpoint directory")?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let seq = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix(&prefix))
                    .and_then(|s| s.strip_suffix(".bin"))
                    .and_then(|s| s.parse::<u64>().ok())?;
                Some((seq, entry))
            })
            .collect();
        checkpoints.sort_by_key(|(seq, _)| *seq);
        Ok(checkpoints)
    }
}

/// Stable file-name-safe id for a step name.
#[must_use]
pub fn operator_id(step_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(step_name.as_bytes());
    to_hex(&hasher.finalize())[..16].to_string()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Current wall-clock time in milliseconds since epoch.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_ids_are_stable_and_path_safe() {
        let a = operator_id("sum/shard-0");
        assert_eq!(a, operator_id("sum/shard-0"));
        assert_ne!(a, operator_id("sum/shard-1"));
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tampering_breaks_verification() {
        let mut state = CheckpointState {
            operator_id: "op".into(),
            step_name: "op".into(),
            sequence: 3,
            timestamp: 0,
            input_watermark: 10,
            output_watermark: 5,
            payload: vec![1, 2, 3],
            checksum: String::new(),
        };
        state.checksum = state.digest();
        assert!(state.verify());
        state.payload.push(4);
        assert!(!state.verify());
    }

    #[test]
    fn nth_watermark_policy() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut m = CheckpointManager::new(CheckpointConfig {
            enabled: true,
            directory: dir.path().to_path_buf(),
            policy: CheckpointPolicy::EveryNWatermarks(3),
            ..Default::default()
        })?;
        let due: Vec<bool> = (0..3).map(|_| m.should_checkpoint()).collect();
        assert_eq!(due, vec![false, false, true]);
        Ok(())
    }

    #[test]
    fn disabled_manager_never_checkpoints() -> Result<()> {
        let mut m = CheckpointManager::new(CheckpointConfig::default())?;
        assert!(!m.should_checkpoint());
        assert_eq!(m.find_latest_checkpoint("x")?, None);
        Ok(())
    }
}
