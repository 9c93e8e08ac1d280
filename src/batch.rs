//! Batch combining of windowed values.
//!
//! Without watermarks or triggers, a windowed combine is a plain fold: every key ends with one
//! accumulator per (possibly merged) window, emitted once as an on-time-and-only pane.
//! [`WindowedCombiner`] is that fold over accumulators tagged with their window;
//! [`CombinePhases`] runs it over a whole keyed batch in the two-phase style of a lifted
//! combine: precombine each partition, merge the per-key accumulators, extract.

use crate::combine::CombineFn;
use crate::error::{Error, Result};
use crate::executor::{ExecMode, build_thread_pool};
use crate::pane::PaneInfo;
use crate::reduce_fn::KeyedOutput;
use crate::strategy::WindowingStrategy;
use crate::time::TimestampMs;
use crate::windowed_value::WindowedValue;
use crate::windowing::{WindowFn, WindowMapping};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Window -> (accumulator, output timestamp).
type Accs<W, A> = BTreeMap<W, (A, TimestampMs)>;

/// Combines windowed values into one accumulator per window.
///
/// Accumulators are `WindowedValue<A, W>` carrying exactly one window and
/// [`PaneInfo::NO_FIRING`]. The timestamp of an accumulator is the combined output
/// timestamp of its inputs.
pub struct WindowedCombiner<V, A, O, C, WF> {
    strategy: Arc<WindowingStrategy<WF>>,
    combine_fn: Arc<C>,
    _m: PhantomData<fn(V) -> (A, O)>,
}

impl<V, A, O, C, WF> Clone for WindowedCombiner<V, A, O, C, WF> {
    fn clone(&self) -> Self {
        Self {
            strategy: Arc::clone(&self.strategy),
            combine_fn: Arc::clone(&self.combine_fn),
            _m: PhantomData,
        }
    }
}

impl<V, A, O, C, WF> WindowedCombiner<V, A, O, C, WF>
where
    V: Clone,
    C: CombineFn<V, A, O>,
    WF: WindowFn,
{
    pub fn new(strategy: WindowingStrategy<WF>, combine_fn: C) -> Self {
        Self::from_shared(Arc::new(strategy), Arc::new(combine_fn))
    }

    pub fn from_shared(strategy: Arc<WindowingStrategy<WF>>, combine_fn: Arc<C>) -> Self {
        Self { strategy, combine_fn, _m: PhantomData }
    }

    pub fn strategy(&self) -> &WindowingStrategy<WF> {
        &self.strategy
    }

    pub fn zero(&self) -> Vec<WindowedValue<A, WF::Window>> {
        Vec::new()
    }

    /// Fold `input` into `accs`. Windows are merged first, so `input` lands in the merged
    /// windows covering its own.
    pub fn reduce(
        &self,
        accs: Vec<WindowedValue<A, WF::Window>>,
        input: WindowedValue<V, WF::Window>,
    ) -> Result<Vec<WindowedValue<A, WF::Window>>> {
        let mut map = self.collect(accs)?;
        let (value, ts, windows, _) = input.into_parts();
        let windows = if windows.is_empty() {
            self.strategy.window_fn.assign_windows(ts)
        } else {
            windows
        };
        for w in &windows {
            let out_ts = self.output_time(w, ts);
            match map.get_mut(w) {
                Some((_, t)) => *t = self.strategy.timestamp_combiner.combine(*t, out_ts),
                None => {
                    map.insert(w.clone(), (self.combine_fn.create(), out_ts));
                }
            }
        }
        let mapping = self.strategy.window_fn.merge_windows(&map.keys().cloned().collect())?;
        let mut map = self.apply_merges(map, &mapping)?;
        let targets: BTreeSet<_> = windows.iter().map(|w| mapping.resolve(w)).collect();
        for w in targets {
            if let Some((acc, _)) = map.get_mut(&w) {
                self.combine_fn.add_input(acc, value.clone());
            }
        }
        Ok(into_accumulators(map))
    }

    /// Merge two accumulator sets, merging windows across them.
    pub fn merge(
        &self,
        accs1: Vec<WindowedValue<A, WF::Window>>,
        accs2: Vec<WindowedValue<A, WF::Window>>,
    ) -> Result<Vec<WindowedValue<A, WF::Window>>> {
        let map = self.collect(accs1.into_iter().chain(accs2))?;
        let mapping = self.strategy.window_fn.merge_windows(&map.keys().cloned().collect())?;
        Ok(into_accumulators(self.apply_merges(map, &mapping)?))
    }

    /// One on-time-and-only pane per accumulator.
    pub fn finish(&self, accs: Vec<WindowedValue<A, WF::Window>>) -> Vec<WindowedValue<O, WF::Window>> {
        accs.into_iter()
            .map(|acc| {
                let (a, ts, windows, _) = acc.into_parts();
                WindowedValue::new(self.combine_fn.finish(a), ts, windows, PaneInfo::ON_TIME_AND_ONLY_FIRING)
            })
            .collect()
    }

    fn output_time(&self, window: &WF::Window, ts: TimestampMs) -> TimestampMs {
        self.strategy
            .timestamp_combiner
            .assign(window, self.strategy.window_fn.output_time(ts, window))
    }

    /// Key accumulators by their single window, merging those that share one.
    fn collect<I>(&self, accs: I) -> Result<Accs<WF::Window, A>>
    where
        I: IntoIterator<Item = WindowedValue<A, WF::Window>>,
    {
        let mut map: Accs<WF::Window, A> = BTreeMap::new();
        for acc in accs {
            let (a, ts, mut windows, _) = acc.into_parts();
            if windows.len() != 1 {
                return Err(Error::IncompatibleAccumulators(format!(
                    "accumulator must carry exactly one window, found {}",
                    windows.len()
                )));
            }
            let Some(w) = windows.pop() else { continue };
            self.fold_into(&mut map, w, a, ts);
        }
        Ok(map)
    }

    fn fold_into(&self, map: &mut Accs<WF::Window, A>, window: WF::Window, acc: A, ts: TimestampMs) {
        match map.get_mut(&window) {
            Some((existing, t)) => {
                self.combine_fn.merge(existing, acc);
                *t = self.strategy.timestamp_combiner.combine(*t, ts);
            }
            None => {
                map.insert(window, (acc, ts));
            }
        }
    }

    fn apply_merges(
        &self,
        map: Accs<WF::Window, A>,
        mapping: &WindowMapping<WF::Window>,
    ) -> Result<Accs<WF::Window, A>> {
        if mapping.is_empty() {
            return Ok(map);
        }
        debug!(merged = mapping.len(), "merging accumulator windows");
        let mut sources: BTreeMap<WF::Window, Vec<TimestampMs>> = BTreeMap::new();
        let mut out: Accs<WF::Window, A> = BTreeMap::new();
        for (w, (acc, ts)) in map {
            let target = mapping.resolve(&w);
            if target != w {
                sources.entry(target.clone()).or_default().push(ts);
            }
            self.fold_into(&mut out, target, acc, ts);
        }
        for (target, mut timestamps) in sources {
            let Some((_, ts)) = out.get_mut(&target) else {
                return Err(Error::WindowMerge(format!("merge target {target:?} has no accumulator")));
            };
            timestamps.push(*ts);
            if let Some(merged) = self.strategy.timestamp_combiner.merge(&target, timestamps) {
                *ts = merged;
            }
        }
        Ok(out)
    }
}

fn into_accumulators<W, A>(map: Accs<W, A>) -> Vec<WindowedValue<A, W>> {
    map.into_iter()
        .map(|(w, (a, ts))| WindowedValue::new(a, ts, vec![w], PaneInfo::NO_FIRING))
        .collect()
}

/// Keyed batch combine in three phases over a [`WindowedCombiner`].
pub struct CombinePhases<K, V, A, O, C, WF> {
    combiner: WindowedCombiner<V, A, O, C, WF>,
    _k: PhantomData<fn(K)>,
}

impl<K, V, A, O, C, WF> CombinePhases<K, V, A, O, C, WF>
where
    K: Clone + Eq + Hash + Send,
    V: Clone + Send,
    A: Send,
    O: Send,
    C: CombineFn<V, A, O>,
    WF: WindowFn,
{
    pub fn new(strategy: WindowingStrategy<WF>, combine_fn: C) -> Self {
        Self { combiner: WindowedCombiner::new(strategy, combine_fn), _k: PhantomData }
    }

    pub fn combiner(&self) -> &WindowedCombiner<V, A, O, C, WF> {
        &self.combiner
    }

    /// Fold values into per-key, per-window accumulators.
    pub fn precombine<I>(&self, items: I) -> Result<HashMap<K, Vec<WindowedValue<A, WF::Window>>>>
    where
        I: IntoIterator<Item = (K, WindowedValue<V, WF::Window>)>,
    {
        let mut out: HashMap<K, Vec<WindowedValue<A, WF::Window>>> = HashMap::new();
        for (k, v) in items {
            let accs = out.remove(&k).unwrap_or_default();
            out.insert(k, self.combiner.reduce(accs, v)?);
        }
        Ok(out)
    }

    /// Merge the accumulator sets one key collected across partitions.
    pub fn merge_accumulators<I>(&self, key: K, accs: I) -> Result<(K, Vec<WindowedValue<A, WF::Window>>)>
    where
        I: IntoIterator<Item = Vec<WindowedValue<A, WF::Window>>>,
    {
        let mut merged = self.combiner.zero();
        for a in accs {
            merged = self.combiner.merge(merged, a)?;
        }
        Ok((key, merged))
    }

    /// Final outputs of one key, ordered by window.
    pub fn extract(&self, key: K, accs: Vec<WindowedValue<A, WF::Window>>) -> Vec<KeyedOutput<K, O, WF::Window>> {
        self.combiner
            .finish(accs)
            .into_iter()
            .map(|o| o.map_value(|v| (key.clone(), v)))
            .collect()
    }

    /// Combine a whole batch. Output is grouped by key with each key's windows in order.
    pub fn combine_per_key(
        &self,
        items: Vec<(K, WindowedValue<V, WF::Window>)>,
        mode: ExecMode,
    ) -> Result<Vec<KeyedOutput<K, O, WF::Window>>> {
        match mode {
            ExecMode::Sequential => {
                let pre = self.precombine(items)?;
                Ok(pre.into_iter().flat_map(|(k, accs)| self.extract(k, accs)).collect())
            }
            ExecMode::Parallel { threads: Some(t) } => {
                let pool = build_thread_pool(t)?;
                pool.install(|| self.combine_parallel(items, t))
            }
            ExecMode::Parallel { threads: None } => self.combine_parallel(items, rayon::current_num_threads()),
        }
    }

    fn combine_parallel(
        &self,
        items: Vec<(K, WindowedValue<V, WF::Window>)>,
        partitions: usize,
    ) -> Result<Vec<KeyedOutput<K, O, WF::Window>>> {
        let locals: Vec<HashMap<K, Vec<WindowedValue<A, WF::Window>>>> = split_vec(items, partitions)
            .into_par_iter()
            .map(|chunk| self.precombine(chunk))
            .collect::<Result<_>>()?;

        let mut by_key: HashMap<K, Vec<Vec<WindowedValue<A, WF::Window>>>> = HashMap::new();
        for local in locals {
            for (k, accs) in local {
                by_key.entry(k).or_default().push(accs);
            }
        }

        let per_key: Vec<Vec<KeyedOutput<K, O, WF::Window>>> = by_key
            .into_par_iter()
            .map(|(k, parts)| {
                let (k, accs) = self.merge_accumulators(k, parts)?;
                Ok(self.extract(k, accs))
            })
            .collect::<Result<_>>()?;
        Ok(per_key.into_iter().flatten().collect())
    }
}

/// Split `v` into at most `n` contiguous chunks.
fn split_vec<T>(v: Vec<T>, n: usize) -> Vec<Vec<T>> {
    let len = v.len();
    if n <= 1 || len <= 1 {
        return vec![v];
    }
    let chunk = len.div_ceil(n);
    let mut out = Vec::with_capacity(n);
    let mut it = v.into_iter().peekable();
    while it.peek().is_some() {
        out.push(it.by_ref().take(chunk).collect());
    }
    out
}
