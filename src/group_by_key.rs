//! The keyed group-by-key / combine operator.
//!
//! [`GroupByKeyOp`] owns the window state and timers of every key routed to it and drives a
//! [`ReduceFnRunner`] from three inputs: keyed work items, watermarks, and timers. Outputs
//! and output watermarks leave through an [`OpEmitter`]. All calls take `&mut self`, so one
//! operator instance processes one thing at a time; parallelism comes from running several
//! operators over disjoint key sets (see [`ShardedExecutor`](crate::ShardedExecutor)).
//!
//! # Example
//! ```
//! use ironpane::{
//!     CollectingEmitter, FixedWindows, GroupByKeyOp, KeyedWorkItem, Sum, WindowFn,
//!     WindowedValue, WindowingStrategy,
//! };
//!
//! let fixed = FixedWindows::of(10)?;
//! let mut op = GroupByKeyOp::new("sum", WindowingStrategy::of(fixed), Sum::<u64>::new())?;
//! let mut out = CollectingEmitter::default();
//!
//! let elems = [(1, 3u64), (4, 4)].map(|(ts, v)| WindowedValue::of(v, ts, fixed.assign_windows(ts)[0]));
//! op.process_element(KeyedWorkItem::elements("k", elems), &mut out)?;
//! op.process_watermark(10, &mut out)?;
//!
//! assert_eq!(out.elements[0].value(), &("k", 7));
//! assert_eq!(out.watermarks, vec![10]);
//! # Ok::<(), ironpane::Error>(())
//! ```

use crate::combine::{CombineFn, Data};
use crate::combiners::ToList;
use crate::error::{Error, Result};
use crate::keyed_work_item::KeyedWorkItem;
use crate::reduce_fn::{KeyedOutput, ReduceFnRunner, ReduceStats};
use crate::state::{InMemoryStateStore, StateStore, WindowState};
use crate::strategy::WindowingStrategy;
use crate::time::TimestampMs;
use crate::timers::{KeyedTimer, TimerService, TimerSnapshot};
use crate::watermark::WatermarkTracker;
use crate::windowing::WindowFn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, trace};

#[cfg(feature = "metrics")]
use crate::metrics::MetricsCollector;

/// Where an operator sends its output.
pub trait OpEmitter<T> {
    fn emit_element(&mut self, element: T);
    fn emit_watermark(&mut self, watermark: TimestampMs);
}

/// Emitter that keeps everything in memory.
#[derive(Clone, Debug)]
pub struct CollectingEmitter<T> {
    pub elements: Vec<T>,
    pub watermarks: Vec<TimestampMs>,
}

impl<T> Default for CollectingEmitter<T> {
    fn default() -> Self {
        Self { elements: Vec::new(), watermarks: Vec::new() }
    }
}

impl<T> CollectingEmitter<T> {
    pub fn take_elements(&mut self) -> Vec<T> {
        std::mem::take(&mut self.elements)
    }

    pub fn last_watermark(&self) -> Option<TimestampMs> {
        self.watermarks.last().copied()
    }
}

impl<T> OpEmitter<T> for CollectingEmitter<T> {
    fn emit_element(&mut self, element: T) {
        self.elements.push(element);
    }

    fn emit_watermark(&mut self, watermark: TimestampMs) {
        self.watermarks.push(watermark);
    }
}

/// Serializable state of a [`GroupByKeyOp`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperatorSnapshot<K, W, A> {
    pub step_name: String,
    pub entries: Vec<(K, W, WindowState<A>)>,
    pub timers: TimerSnapshot<K, W>,
    /// Last watermark of every upstream input.
    pub upstreams: Vec<(usize, TimestampMs)>,
    pub stats: ReduceStats,
}

type Store<K, W, A> = Box<dyn StateStore<K, W, WindowState<A>>>;

/// Groups and combines values per key and window.
pub struct GroupByKeyOp<K, V, A, O, C, WF: WindowFn> {
    step_name: String,
    runner: ReduceFnRunner<V, A, O, C, WF>,
    store: Store<K, WF::Window, A>,
    timers: TimerService<K, WF::Window>,
    upstreams: WatermarkTracker<usize>,
    stats: ReduceStats,
    #[cfg(feature = "metrics")]
    metrics: Option<MetricsCollector>,
}

impl<K, V, A, O, C, WF> GroupByKeyOp<K, V, A, O, C, WF>
where
    K: Clone + Debug + Eq + Hash + Send + 'static,
    V: Clone,
    A: Clone + Send + 'static,
    C: CombineFn<V, A, O>,
    WF: WindowFn,
{
    pub fn new(step_name: impl Into<String>, strategy: WindowingStrategy<WF>, combine_fn: C) -> Result<Self> {
        Self::from_shared(step_name, Arc::new(strategy), Arc::new(combine_fn))
    }

    /// Build an operator sharing strategy and combine fn with others (e.g. executor shards).
    pub fn from_shared(
        step_name: impl Into<String>,
        strategy: Arc<WindowingStrategy<WF>>,
        combine_fn: Arc<C>,
    ) -> Result<Self> {
        strategy.validate()?;
        Ok(Self {
            step_name: step_name.into(),
            runner: ReduceFnRunner::new(strategy, combine_fn),
            store: Box::new(InMemoryStateStore::new()),
            timers: TimerService::new(),
            upstreams: WatermarkTracker::with_sources([0]),
            stats: ReduceStats::default(),
            #[cfg(feature = "metrics")]
            metrics: None,
        })
    }

    /// Keep window state in `store` instead of memory. Any state held so far is dropped.
    #[must_use]
    pub fn with_state_store(mut self, store: impl StateStore<K, WF::Window, WindowState<A>> + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Expect watermarks from `n` upstream inputs, numbered `0..n`; see
    /// [`process_upstream_watermark`](Self::process_upstream_watermark).
    #[must_use]
    pub fn with_upstreams(mut self, n: usize) -> Self {
        self.upstreams = WatermarkTracker::with_sources(0..n.max(1));
        self
    }

    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Process new elements of one key, then any timers delivered with them.
    pub fn process_element<E>(&mut self, item: KeyedWorkItem<K, V, WF::Window>, emitter: &mut E) -> Result<()>
    where
        E: OpEmitter<KeyedOutput<K, O, WF::Window>> + ?Sized,
    {
        let (key, timers, elements) = item.into_parts();
        let mut out = Vec::new();
        let mut stats = self
            .runner
            .process_elements(&key, elements, &mut *self.store, &mut self.timers, &mut out)?;
        if !timers.is_empty() {
            stats += self
                .runner
                .on_timers(&key, timers, &mut *self.store, &mut self.timers, &mut out)?;
        }
        self.finish(stats, out, emitter);
        Ok(())
    }

    /// Advance the input watermark: fire every event-time timer it passed, then forward the
    /// output watermark if it advanced.
    pub fn process_watermark<E>(&mut self, watermark: TimestampMs, emitter: &mut E) -> Result<()>
    where
        E: OpEmitter<KeyedOutput<K, O, WF::Window>> + ?Sized,
    {
        trace!(step = %self.step_name, watermark, "input watermark");
        let fired = self.timers.advance_input_watermark(watermark);
        self.fire(fired, emitter)?;
        self.forward_watermark(emitter);
        Ok(())
    }

    /// Record the watermark of one upstream input; the operator advances once the minimum
    /// over all upstreams does.
    pub fn process_upstream_watermark<E>(
        &mut self,
        upstream: usize,
        watermark: TimestampMs,
        emitter: &mut E,
    ) -> Result<()>
    where
        E: OpEmitter<KeyedOutput<K, O, WF::Window>> + ?Sized,
    {
        match self.upstreams.update(&upstream, watermark)? {
            Some(combined) => self.process_watermark(combined, emitter),
            None => Ok(()),
        }
    }

    /// Deliver a single timer. The same timer is no longer pending afterwards.
    pub fn process_timer<E>(&mut self, timer: KeyedTimer<K, WF::Window>, emitter: &mut E) -> Result<()>
    where
        E: OpEmitter<KeyedOutput<K, O, WF::Window>> + ?Sized,
    {
        let t = &timer.timer;
        self.timers.delete_timer(&timer.key, &t.window, t.domain, t.kind);
        self.fire(vec![timer], emitter)?;
        self.forward_watermark(emitter);
        Ok(())
    }

    /// Advance processing time and fire the processing-time timers now due.
    pub fn advance_processing_time<E>(&mut self, now: TimestampMs, emitter: &mut E) -> Result<()>
    where
        E: OpEmitter<KeyedOutput<K, O, WF::Window>> + ?Sized,
    {
        let fired = self.timers.advance_processing_time(now);
        self.fire(fired, emitter)?;
        self.forward_watermark(emitter);
        Ok(())
    }

    pub fn input_watermark(&self) -> TimestampMs {
        self.timers.input_watermark()
    }

    pub fn output_watermark(&self) -> TimestampMs {
        self.timers.output_watermark()
    }

    /// Counters accumulated since the operator was created or restored.
    pub fn stats(&self) -> ReduceStats {
        self.stats
    }

    /// Number of `(key, window)` entries holding state.
    pub fn state_len(&self) -> usize {
        self.store.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending_timers()
    }

    pub fn state_store(&self) -> &dyn StateStore<K, WF::Window, WindowState<A>> {
        &*self.store
    }

    fn fire<E>(&mut self, fired: Vec<KeyedTimer<K, WF::Window>>, emitter: &mut E) -> Result<()>
    where
        E: OpEmitter<KeyedOutput<K, O, WF::Window>> + ?Sized,
    {
        let mut out = Vec::new();
        let mut stats = ReduceStats::default();
        for KeyedTimer { key, timer } in fired {
            debug!(step = %self.step_name, "Firing timer {:?} for key {:?}", timer, key);
            stats += self
                .runner
                .on_timers(&key, [timer], &mut *self.store, &mut self.timers, &mut out)?;
        }
        self.finish(stats, out, emitter);
        Ok(())
    }

    fn finish<E>(&mut self, stats: ReduceStats, out: Vec<KeyedOutput<K, O, WF::Window>>, emitter: &mut E)
    where
        E: OpEmitter<KeyedOutput<K, O, WF::Window>> + ?Sized,
    {
        self.stats += stats;
        #[cfg(feature = "metrics")]
        {
            if let Some(m) = &self.metrics {
                m.record_stats(&stats);
            }
        }
        for o in out {
            emitter.emit_element(o);
        }
    }

    fn forward_watermark<E>(&mut self, emitter: &mut E)
    where
        E: OpEmitter<KeyedOutput<K, O, WF::Window>> + ?Sized,
    {
        if let Some(wm) = self.timers.update_output_watermark() {
            debug!(step = %self.step_name, watermark = wm, "output watermark advanced");
            #[cfg(feature = "metrics")]
            {
                if let Some(m) = &self.metrics {
                    m.record_output_watermark(wm);
                }
            }
            emitter.emit_watermark(wm);
        }
    }
}

impl<K, V, A, O, C, WF> GroupByKeyOp<K, V, A, O, C, WF>
where
    K: Clone + Debug + Eq + Hash + Send + Serialize + DeserializeOwned + 'static,
    V: Clone,
    A: Clone + Send + Serialize + DeserializeOwned + 'static,
    C: CombineFn<V, A, O>,
    WF: WindowFn,
{
    /// Capture window state, timers, holds and watermarks.
    pub fn snapshot(&self) -> Result<OperatorSnapshot<K, WF::Window, A>> {
        let mut upstreams = self.upstreams.snapshot();
        upstreams.sort_unstable();
        Ok(OperatorSnapshot {
            step_name: self.step_name.clone(),
            entries: self.store.entries()?,
            timers: self.timers.snapshot(),
            upstreams,
            stats: self.stats,
        })
    }

    /// Replace all state with `snapshot`.
    pub fn restore(&mut self, snapshot: OperatorSnapshot<K, WF::Window, A>) -> Result<()> {
        if snapshot.step_name != self.step_name {
            return Err(Error::State(format!(
                "snapshot of step {:?} cannot restore step {:?}",
                snapshot.step_name, self.step_name
            )));
        }
        self.store.clear();
        for (k, w, s) in snapshot.entries {
            self.store.put(&k, &w, s)?;
        }
        self.timers = TimerService::restore(snapshot.timers);
        if !snapshot.upstreams.is_empty() {
            self.upstreams = WatermarkTracker::restore(snapshot.upstreams);
        }
        self.stats = snapshot.stats;
        debug!(step = %self.step_name, entries = self.store.len(), "restored operator state");
        Ok(())
    }

    pub fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(&self.snapshot()?)?)
    }

    pub fn restore_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.restore(postcard::from_bytes(bytes)?)
    }
}

impl<K, V, WF> GroupByKeyOp<K, V, Vec<V>, Vec<V>, ToList<V>, WF>
where
    K: Clone + Debug + Eq + Hash + Send + 'static,
    V: Data,
    WF: WindowFn,
{
    /// Plain group-by-key: every value of a window, in arrival order.
    pub fn group_by_key(step_name: impl Into<String>, strategy: WindowingStrategy<WF>) -> Result<Self> {
        Self::new(step_name, strategy, ToList::new())
    }
}
