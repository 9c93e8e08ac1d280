//! Key-sharded parallel execution of [`GroupByKeyOp`]s.
//!
//! Keys are hashed onto a fixed number of shards. Each shard exclusively owns one operator
//! (its window state, timers and holds), so all state of a key is only ever touched by the
//! worker running that shard. Shards process a batch in parallel on rayon; a watermark is
//! broadcast to every shard, and each shard fires its timers between element batches, never
//! concurrently with them.

use crate::combine::CombineFn;
use crate::error::{Error, Result};
use crate::group_by_key::{CollectingEmitter, GroupByKeyOp};
use crate::keyed_work_item::KeyedWorkItem;
use crate::reduce_fn::{KeyedOutput, ReduceStats};
use crate::strategy::WindowingStrategy;
use crate::time::TimestampMs;
use crate::watermark::SourceWatermarks;
use crate::windowed_value::WindowedValue;
use crate::windowing::WindowFn;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(feature = "metrics")]
use crate::metrics::MetricsCollector;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    Sequential,
    /// Run shards on rayon; `threads` builds a dedicated pool instead of the global one.
    Parallel { threads: Option<usize> },
}

#[derive(Clone, Copy, Debug)]
pub struct ExecutorConfig {
    pub shards: usize,
    pub mode: ExecMode,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shards: 2 * num_cpus::get().max(2),
            mode: ExecMode::Parallel { threads: None },
        }
    }
}

impl ExecutorConfig {
    #[must_use]
    pub fn sequential(shards: usize) -> Self {
        Self { shards, mode: ExecMode::Sequential }
    }

    #[must_use]
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A dedicated rayon pool with `threads` workers.
pub(crate) fn build_thread_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::Execution(format!("failed to build thread pool: {e}")))
}

/// Outputs of one executor call and the output watermark afterwards.
#[derive(Clone, Debug)]
pub struct ShardOutput<T> {
    pub elements: Vec<T>,
    /// Minimum output watermark over all shards.
    pub output_watermark: TimestampMs,
}

/// Runs one [`GroupByKeyOp`] per shard.
pub struct ShardedExecutor<K, V, A, O, C, WF: WindowFn> {
    shards: Vec<GroupByKeyOp<K, V, A, O, C, WF>>,
    pool: Option<rayon::ThreadPool>,
    config: ExecutorConfig,
    watermarks: SourceWatermarks,
}

impl<K, V, A, O, C, WF> ShardedExecutor<K, V, A, O, C, WF>
where
    K: Clone + Debug + Eq + Hash + Send + 'static,
    V: Clone + Send,
    A: Clone + Send + 'static,
    O: Send,
    C: CombineFn<V, A, O>,
    WF: WindowFn,
{
    pub fn new(
        step_name: &str,
        strategy: WindowingStrategy<WF>,
        combine_fn: C,
        config: ExecutorConfig,
    ) -> Result<Self> {
        if config.shards == 0 {
            return Err(Error::Execution("executor needs at least one shard".into()));
        }
        let pool = match config.mode {
            ExecMode::Parallel { threads: Some(t) } => Some(build_thread_pool(t)?),
            _ => None,
        };
        let strategy = Arc::new(strategy);
        let combine_fn = Arc::new(combine_fn);
        let shards = (0..config.shards)
            .map(|i| {
                GroupByKeyOp::from_shared(
                    format!("{step_name}/shard-{i}"),
                    Arc::clone(&strategy),
                    Arc::clone(&combine_fn),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        info!(step = step_name, shards = config.shards, mode = ?config.mode, "created sharded executor");
        Ok(Self { shards, pool, config, watermarks: SourceWatermarks::default() })
    }

    /// Report every shard's counters into `metrics`.
    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_metrics(mut self, metrics: &MetricsCollector) -> Self {
        self.shards = self
            .shards
            .into_iter()
            .map(|op| op.with_metrics(metrics.clone()))
            .collect();
        self
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_for(&self, key: &K) -> usize {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        (h.finish() % self.shards.len() as u64) as usize
    }

    /// Route elements to their key's shard and process all shards.
    pub fn process_batch<I>(&mut self, elements: I) -> Result<ShardOutput<KeyedOutput<K, O, WF::Window>>>
    where
        I: IntoIterator<Item = (K, WindowedValue<V, WF::Window>)>,
    {
        let mut buckets: Vec<Vec<(K, Vec<WindowedValue<V, WF::Window>>)>> =
            (0..self.shards.len()).map(|_| Vec::new()).collect();
        let mut slots: HashMap<K, (usize, usize)> = HashMap::new();
        for (key, value) in elements {
            let (shard, idx) = match slots.get(&key) {
                Some(slot) => *slot,
                None => {
                    let shard = self.shard_for(&key);
                    let slot = (shard, buckets[shard].len());
                    buckets[shard].push((key.clone(), Vec::new()));
                    slots.insert(key, slot);
                    slot
                }
            };
            buckets[shard][idx].1.push(value);
        }
        let elements = self.run(buckets, |op, items| {
            let mut emitter = CollectingEmitter::default();
            for (key, values) in items {
                op.process_element(KeyedWorkItem::elements(key, values), &mut emitter)?;
            }
            Ok(emitter.elements)
        })?;
        Ok(ShardOutput { elements, output_watermark: self.output_watermark() })
    }

    /// Broadcast an input watermark to every shard.
    pub fn advance_watermark(&mut self, watermark: TimestampMs) -> Result<ShardOutput<KeyedOutput<K, O, WF::Window>>> {
        let elements = self.run(vec![(); self.shards.len()], |op, ()| {
            let mut emitter = CollectingEmitter::default();
            op.process_watermark(watermark, &mut emitter)?;
            Ok(emitter.elements)
        })?;
        let (low, high) = self.watermark_range();
        self.watermarks.advance(low, high)?;
        debug!(watermark, low, high, "advanced executor watermark");
        Ok(ShardOutput { elements, output_watermark: low })
    }

    /// Broadcast processing time to every shard.
    pub fn advance_processing_time(&mut self, now: TimestampMs) -> Result<ShardOutput<KeyedOutput<K, O, WF::Window>>> {
        self.watermarks.advance_processing_time(now)?;
        let elements = self.run(vec![(); self.shards.len()], |op, ()| {
            let mut emitter = CollectingEmitter::default();
            op.advance_processing_time(now, &mut emitter)?;
            Ok(emitter.elements)
        })?;
        Ok(ShardOutput { elements, output_watermark: self.output_watermark() })
    }

    /// Minimum output watermark across shards.
    pub fn output_watermark(&self) -> TimestampMs {
        self.watermark_range().0
    }

    /// Slowest and fastest shard output watermarks as of the last watermark advance.
    pub fn watermarks(&self) -> SourceWatermarks {
        self.watermarks
    }

    pub fn stats(&self) -> ReduceStats {
        let mut total = ReduceStats::default();
        for op in &self.shards {
            total += op.stats();
        }
        total
    }

    pub fn state_len(&self) -> usize {
        self.shards.iter().map(GroupByKeyOp::state_len).sum()
    }

    pub fn shards(&self) -> &[GroupByKeyOp<K, V, A, O, C, WF>] {
        &self.shards
    }

    fn watermark_range(&self) -> (TimestampMs, TimestampMs) {
        let wms = self.shards.iter().map(GroupByKeyOp::output_watermark);
        let low = wms.clone().min().unwrap_or(crate::time::TIMESTAMP_MIN_VALUE);
        let high = wms.max().unwrap_or(crate::time::TIMESTAMP_MIN_VALUE);
        (low, high)
    }

    /// Run `f` once per shard with that shard's input, in shard order.
    fn run<T, F>(&mut self, inputs: Vec<T>, f: F) -> Result<Vec<KeyedOutput<K, O, WF::Window>>>
    where
        T: Send,
        F: Fn(&mut GroupByKeyOp<K, V, A, O, C, WF>, T) -> Result<Vec<KeyedOutput<K, O, WF::Window>>> + Send + Sync,
    {
        let shards = &mut self.shards;
        let per_shard: Vec<Vec<_>> = match (self.config.mode, &self.pool) {
            (ExecMode::Sequential, _) => shards
                .iter_mut()
                .zip(inputs)
                .map(|(op, t)| f(op, t))
                .collect::<Result<_>>()?,
            (ExecMode::Parallel { .. }, Some(pool)) => pool.install(|| {
                shards
                    .par_iter_mut()
                    .zip(inputs)
                    .map(|(op, t)| f(op, t))
                    .collect::<Result<_>>()
            })?,
            (ExecMode::Parallel { .. }, None) => shards
                .par_iter_mut()
                .zip(inputs)
                .map(|(op, t)| f(op, t))
                .collect::<Result<_>>()?,
        };
        Ok(per_shard.into_iter().flatten().collect())
    }
}
