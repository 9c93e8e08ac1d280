//! Group-also-by-window: per-key, per-window accumulation driven by elements and timers.
//!
//! [`ReduceFnRunner`] holds no state of its own. Every call receives the key being processed,
//! the [`StateStore`] holding that key's window state, and the [`TimerService`] of the
//! operator; the caller guarantees that only one call per key runs at a time.
//!
//! For each batch of elements the runner:
//!
//! 1. drops windows that already expired (`max_timestamp + allowed_lateness` behind the input
//!    watermark);
//! 2. for merging window functions, merges the key's active windows with the new ones and
//!    migrates accumulators, pane bookkeeping, trigger state, timers and holds into each
//!    merge result;
//! 3. folds every value into its (merged) window, combines output timestamps, sets the
//!    end-of-window and garbage-collection timers, holds the output watermark, and emits an
//!    early or late pane if the trigger asks for one.
//!
//! End-of-window timers emit the on-time pane; garbage-collection timers emit the final pane
//! (per [`ClosingBehavior`]) and purge everything stored for the window. Processing-time
//! triggers start a pane-delay timer on the first element of each pane and fire early panes
//! from it.

use crate::combine::{Accumulator, CombineFn};
use crate::error::{Error, Result};
use crate::pane::{PaneInfo, Timing};
use crate::state::{StateStore, WindowState};
use crate::strategy::{AccumulationMode, ClosingBehavior, OnTimeBehavior, WindowingStrategy};
use crate::time::{TIMESTAMP_MAX_VALUE, TIMESTAMP_MIN_VALUE, TimestampMs, saturating_add};
use crate::timers::{TimeDomain, TimerData, TimerKind, TimerService};
use crate::window::BoundedWindow;
use crate::windowed_value::WindowedValue;
use crate::windowing::{WindowFn, WindowMapping};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::{debug, trace};

/// Output of the runner: the key with the combined value, in the window that fired.
pub type KeyedOutput<K, O, W> = WindowedValue<(K, O), W>;

/// Counters produced by one runner call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceStats {
    pub elements_added: u64,
    /// `(element, window)` pairs dropped because the window had expired.
    pub late_elements_dropped: u64,
    /// `(element, window)` pairs dropped because the window's trigger had finished.
    pub closed_window_drops: u64,
    pub panes_emitted: u64,
    /// Source windows folded into a different merge result.
    pub windows_merged: u64,
    pub windows_purged: u64,
    pub timers_fired: u64,
}

impl AddAssign for ReduceStats {
    fn add_assign(&mut self, o: Self) {
        self.elements_added += o.elements_added;
        self.late_elements_dropped += o.late_elements_dropped;
        self.closed_window_drops += o.closed_window_drops;
        self.panes_emitted += o.panes_emitted;
        self.windows_merged += o.windows_merged;
        self.windows_purged += o.windows_purged;
        self.timers_fired += o.timers_fired;
    }
}

/// Applies a [`CombineFn`] per key and window under a [`WindowingStrategy`].
pub struct ReduceFnRunner<V, A, O, C, WF> {
    strategy: Arc<WindowingStrategy<WF>>,
    combine_fn: Arc<C>,
    _m: PhantomData<fn(V) -> (A, O)>,
}

impl<V, A, O, C, WF> Clone for ReduceFnRunner<V, A, O, C, WF> {
    fn clone(&self) -> Self {
        Self {
            strategy: Arc::clone(&self.strategy),
            combine_fn: Arc::clone(&self.combine_fn),
            _m: PhantomData,
        }
    }
}

impl<V, A, O, C, WF> ReduceFnRunner<V, A, O, C, WF>
where
    V: Clone,
    A: Clone,
    C: CombineFn<V, A, O>,
    WF: WindowFn,
{
    pub fn new(strategy: Arc<WindowingStrategy<WF>>, combine_fn: Arc<C>) -> Self {
        Self { strategy, combine_fn, _m: PhantomData }
    }

    pub fn strategy(&self) -> &WindowingStrategy<WF> {
        &self.strategy
    }

    /// Fold `elements` of `key` into window state, emitting any panes the trigger fires.
    ///
    /// Elements that carry no windows are assigned windows by the window function.
    pub fn process_elements<K, S, I>(
        &self,
        key: &K,
        elements: I,
        store: &mut S,
        timers: &mut TimerService<K, WF::Window>,
        out: &mut Vec<KeyedOutput<K, O, WF::Window>>,
    ) -> Result<ReduceStats>
    where
        K: Clone + Debug + Eq + Hash,
        S: StateStore<K, WF::Window, WindowState<A>> + ?Sized,
        I: IntoIterator<Item = WindowedValue<V, WF::Window>>,
    {
        let mut stats = ReduceStats::default();
        let input_watermark = timers.input_watermark();

        let mut inputs: Vec<(V, TimestampMs, WF::Window)> = Vec::new();
        for element in elements {
            let (value, timestamp, windows, _) = element.into_parts();
            if !(TIMESTAMP_MIN_VALUE..=TIMESTAMP_MAX_VALUE).contains(&timestamp) {
                return Err(Error::TimestampOutOfRange(timestamp));
            }
            let windows = if windows.is_empty() {
                self.strategy.window_fn.assign_windows(timestamp)
            } else {
                windows
            };
            let (live, expired): (Vec<_>, Vec<_>) = windows
                .into_iter()
                .partition(|w| !self.strategy.is_expired(w, input_watermark));
            if !expired.is_empty() {
                debug!(?key, timestamp, input_watermark, dropped = expired.len(), "dropping late element");
                stats.late_elements_dropped += expired.len() as u64;
            }
            let Some((last, rest)) = live.split_last() else { continue };
            for w in rest {
                inputs.push((value.clone(), timestamp, w.clone()));
            }
            inputs.push((value, timestamp, last.clone()));
        }
        if inputs.is_empty() {
            return Ok(stats);
        }

        let mapping = if self.strategy.is_merging() {
            let mut active: BTreeSet<WF::Window> = store.windows_for(key)?.into_iter().collect();
            active.extend(inputs.iter().map(|(_, _, w)| w.clone()));
            let mapping = self.strategy.window_fn.merge_windows(&active)?;
            self.merge_state(key, &mapping, store, timers, &mut stats)?;
            mapping
        } else {
            WindowMapping::identity()
        };

        for (value, timestamp, window) in inputs {
            let target = mapping.resolve(&window);
            self.add_to_window(key, value, timestamp, &target, store, timers, out, &mut stats)?;
        }
        Ok(stats)
    }

    /// Handle timers of `key` that became due.
    pub fn on_timers<K, S, I>(
        &self,
        key: &K,
        fired: I,
        store: &mut S,
        timers: &mut TimerService<K, WF::Window>,
        out: &mut Vec<KeyedOutput<K, O, WF::Window>>,
    ) -> Result<ReduceStats>
    where
        K: Clone + Debug + Eq + Hash,
        S: StateStore<K, WF::Window, WindowState<A>> + ?Sized,
        I: IntoIterator<Item = TimerData<WF::Window>>,
    {
        let mut stats = ReduceStats::default();
        for timer in fired {
            stats.timers_fired += 1;
            let window = timer.window;
            // merged away or already purged
            let Some(state) = store.remove(key, &window)? else {
                trace!(?key, ?window, kind = ?timer.kind, "timer for window without state");
                continue;
            };
            match timer.kind {
                TimerKind::EndOfWindow => {
                    self.on_end_of_window(key, window, state, store, timers, out, &mut stats)?
                }
                TimerKind::GarbageCollection => {
                    self.collect_garbage(key, &window, state, timers, out, &mut stats)?
                }
                TimerKind::PaneDelay => {
                    self.on_pane_delay(key, window, state, store, timers, out, &mut stats)?
                }
            }
        }
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_to_window<K, S>(
        &self,
        key: &K,
        value: V,
        timestamp: TimestampMs,
        window: &WF::Window,
        store: &mut S,
        timers: &mut TimerService<K, WF::Window>,
        out: &mut Vec<KeyedOutput<K, O, WF::Window>>,
        stats: &mut ReduceStats,
    ) -> Result<()>
    where
        K: Clone + Debug + Eq + Hash,
        S: StateStore<K, WF::Window, WindowState<A>> + ?Sized,
    {
        let strategy = &*self.strategy;
        let mut state = match store.remove(key, window)? {
            Some(s) => s,
            None => WindowState::new(self.combine_fn.create()),
        };
        if state.closed {
            trace!(?key, ?window, "dropping element for closed window");
            stats.closed_window_drops += 1;
            return store.put(key, window, state);
        }

        let combine_fn = &self.combine_fn;
        state.accumulator.add_with(|a| combine_fn.add_input(a, value))?;
        let output_time = strategy
            .timestamp_combiner
            .assign(window, strategy.window_fn.output_time(timestamp, window));
        state.timestamp = Some(match state.timestamp {
            Some(t) => strategy.timestamp_combiner.combine(t, output_time),
            None => output_time,
        });
        state.pending_elements += 1;
        strategy.trigger.on_element(&mut state.trigger);
        stats.elements_added += 1;

        let past_end = window.max_timestamp() < timers.input_watermark();
        self.set_window_timers(key, window, past_end, timers);
        self.set_pane_delay_timer(key, window, &state, timers);
        self.hold_output(key, window, output_time, timers);

        if strategy.trigger.should_fire(&state.trigger, past_end) {
            self.fire_pane(key, window, &mut state, past_end, timers, out, stats)?;
        }
        store.put(key, window, state)
    }

    /// The processing-time delay of a pane ran out.
    #[allow(clippy::too_many_arguments)]
    fn on_pane_delay<K, S>(
        &self,
        key: &K,
        window: WF::Window,
        mut state: WindowState<A>,
        store: &mut S,
        timers: &mut TimerService<K, WF::Window>,
        out: &mut Vec<KeyedOutput<K, O, WF::Window>>,
        stats: &mut ReduceStats,
    ) -> Result<()>
    where
        K: Clone + Debug + Eq + Hash,
        S: StateStore<K, WF::Window, WindowState<A>> + ?Sized,
    {
        if !state.closed && !state.trigger.finished && state.pending_elements > 0 {
            let past_end = window.max_timestamp() < timers.input_watermark();
            self.fire_pane(key, &window, &mut state, past_end, timers, out, stats)?;
        }
        store.put(key, &window, state)
    }

    /// Emit an element- or processing-time-driven pane, timed against the watermark.
    #[allow(clippy::too_many_arguments)]
    fn fire_pane<K>(
        &self,
        key: &K,
        window: &WF::Window,
        state: &mut WindowState<A>,
        past_end: bool,
        timers: &mut TimerService<K, WF::Window>,
        out: &mut Vec<KeyedOutput<K, O, WF::Window>>,
        stats: &mut ReduceStats,
    ) -> Result<()>
    where
        K: Clone + Debug + Eq + Hash,
    {
        let timing = if !past_end {
            Timing::Early
        } else if !state.fired_on_time {
            Timing::OnTime
        } else {
            Timing::Late
        };
        let is_last = self.strategy.trigger.finishes_after(timing);
        self.emit_pane(key, window, state, timing, is_last, out, stats)?;
        timers.clear_hold(key, window);
        timers.delete_timer(key, window, TimeDomain::ProcessingTime, TimerKind::PaneDelay);
        if is_last {
            self.close(key, window, state, timers);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn on_end_of_window<K, S>(
        &self,
        key: &K,
        window: WF::Window,
        mut state: WindowState<A>,
        store: &mut S,
        timers: &mut TimerService<K, WF::Window>,
        out: &mut Vec<KeyedOutput<K, O, WF::Window>>,
        stats: &mut ReduceStats,
    ) -> Result<()>
    where
        K: Clone + Debug + Eq + Hash,
        S: StateStore<K, WF::Window, WindowState<A>> + ?Sized,
    {
        let strategy = &*self.strategy;
        // no lateness: the end of the window is also its garbage collection
        let is_final = strategy.gc_time(&window) <= window.max_timestamp();
        let fires = !state.closed
            && !state.trigger.finished
            && !state.fired_on_time
            && strategy.trigger.fires_at_end_of_window()
            && (strategy.on_time_behavior == OnTimeBehavior::FireAlways || state.pending_elements > 0);
        if fires {
            let is_last = is_final || strategy.trigger.finishes_after(Timing::OnTime);
            self.emit_pane(key, &window, &mut state, Timing::OnTime, is_last, out, stats)?;
            timers.clear_hold(key, &window);
            timers.delete_timer(key, &window, TimeDomain::ProcessingTime, TimerKind::PaneDelay);
            if is_last {
                self.close(key, &window, &mut state, timers);
            }
        }
        if is_final {
            self.collect_garbage(key, &window, state, timers, out, stats)
        } else {
            store.put(key, &window, state)
        }
    }

    /// Emit the final pane if one is due and forget the window.
    fn collect_garbage<K>(
        &self,
        key: &K,
        window: &WF::Window,
        mut state: WindowState<A>,
        timers: &mut TimerService<K, WF::Window>,
        out: &mut Vec<KeyedOutput<K, O, WF::Window>>,
        stats: &mut ReduceStats,
    ) -> Result<()>
    where
        K: Clone + Debug + Eq + Hash,
    {
        let fire = !state.closed
            && (state.pending_elements > 0
                || self.strategy.closing_behavior == ClosingBehavior::FireAlways);
        if fire {
            let timing = if state.fired_on_time { Timing::Late } else { Timing::OnTime };
            self.emit_pane(key, window, &mut state, timing, true, out, stats)?;
        }
        timers.delete_window_timers(key, window);
        timers.clear_hold(key, window);
        stats.windows_purged += 1;
        debug!(?key, ?window, "purged window state");
        Ok(())
    }

    /// Migrate the state of every merged source window into its merge result.
    fn merge_state<K, S>(
        &self,
        key: &K,
        mapping: &WindowMapping<WF::Window>,
        store: &mut S,
        timers: &mut TimerService<K, WF::Window>,
        stats: &mut ReduceStats,
    ) -> Result<()>
    where
        K: Clone + Debug + Eq + Hash,
        S: StateStore<K, WF::Window, WindowState<A>> + ?Sized,
    {
        self.check_mergeable(key, mapping, store)?;
        let input_watermark = timers.input_watermark();
        for (target, sources) in mapping.merge_results() {
            let mut merged = store.remove(key, &target)?;
            timers.clear_hold(key, &target);
            for source in sources.iter().filter(|s| **s != target) {
                timers.delete_window_timers(key, source);
                timers.clear_hold(key, source);
                let Some(src) = store.remove(key, source)? else { continue };
                stats.windows_merged += 1;
                merged = Some(match merged {
                    None => src,
                    Some(mut acc) => {
                        self.merge_window_state(&mut acc, src)?;
                        acc
                    }
                });
            }
            let Some(mut state) = merged else { continue };
            debug!(?key, ?target, sources = sources.len(), "merged windows");

            state.timestamp = state
                .timestamp
                .and_then(|ts| self.strategy.timestamp_combiner.merge(&target, [ts]));
            state.trigger.finished = false;
            state.closed = false;
            let past_end = target.max_timestamp() < input_watermark;
            if !past_end {
                state.fired_on_time = false;
            }
            self.set_window_timers(key, &target, past_end, timers);
            self.set_pane_delay_timer(key, &target, &state, timers);
            if let Some(ts) = state.timestamp {
                self.hold_output(key, &target, ts, timers);
            }
            store.put(key, &target, state)?;
        }
        Ok(())
    }

    /// Fail before touching any state if a merge would fold in an extracted accumulator.
    fn check_mergeable<K, S>(&self, key: &K, mapping: &WindowMapping<WF::Window>, store: &S) -> Result<()>
    where
        K: Clone + Debug + Eq + Hash,
        S: StateStore<K, WF::Window, WindowState<A>> + ?Sized,
    {
        for (target, mut sources) in mapping.merge_results() {
            if !sources.contains(&target) {
                sources.push(target.clone());
            }
            let mut stateful = 0;
            let mut extracted = None;
            for w in &sources {
                if let Some(state) = store.get(key, w)? {
                    stateful += 1;
                    if state.accumulator.is_extracted() {
                        extracted = Some(w.clone());
                    }
                }
            }
            if let Some(w) = extracted.filter(|_| stateful > 1) {
                return Err(Error::IncompatibleAccumulators(format!(
                    "cannot merge {w:?} into {target:?}: accumulator already extracted"
                )));
            }
        }
        Ok(())
    }

    fn merge_window_state(&self, into: &mut WindowState<A>, other: WindowState<A>) -> Result<()> {
        let combine_fn = &self.combine_fn;
        into.accumulator.merge_with(other.accumulator, |a, b| combine_fn.merge(a, b))?;
        into.timestamp = match (into.timestamp, other.timestamp) {
            (Some(a), Some(b)) => Some(self.strategy.timestamp_combiner.combine(a, b)),
            (a, b) => a.or(b),
        };
        into.pending_elements += other.pending_elements;
        into.pane_index = into.pane_index.max(other.pane_index);
        into.non_speculative_index = into.non_speculative_index.max(other.non_speculative_index);
        into.fired_on_time |= other.fired_on_time;
        into.trigger.merge(&other.trigger);
        Ok(())
    }

    fn set_window_timers<K>(
        &self,
        key: &K,
        window: &WF::Window,
        past_end: bool,
        timers: &mut TimerService<K, WF::Window>,
    ) where
        K: Clone + Eq + Hash,
    {
        if !past_end {
            timers.set_timer(
                key.clone(),
                TimerData::event_time(window.max_timestamp(), TimerKind::EndOfWindow, window.clone()),
            );
        }
        timers.set_timer(
            key.clone(),
            TimerData::event_time(
                self.strategy.gc_time(window),
                TimerKind::GarbageCollection,
                window.clone(),
            ),
        );
    }

    /// Output that would land behind the output watermark is held at garbage-collection
    /// time instead, so it cannot stall the watermark past the window's lifetime.
    fn hold_output<K>(
        &self,
        key: &K,
        window: &WF::Window,
        timestamp: TimestampMs,
        timers: &mut TimerService<K, WF::Window>,
    ) where
        K: Clone + Eq + Hash,
    {
        let hold = if timestamp < timers.output_watermark() {
            self.strategy.gc_time(window)
        } else {
            timestamp
        };
        timers.add_hold(key.clone(), window.clone(), hold);
    }

    /// The trigger finished: keep a closed marker until garbage collection.
    fn close<K>(
        &self,
        key: &K,
        window: &WF::Window,
        state: &mut WindowState<A>,
        timers: &mut TimerService<K, WF::Window>,
    ) where
        K: Clone + Eq + Hash,
    {
        state.closed = true;
        timers.delete_timer(key, window, TimeDomain::EventTime, TimerKind::EndOfWindow);
        timers.delete_timer(key, window, TimeDomain::ProcessingTime, TimerKind::PaneDelay);
    }

    /// Start the processing-time delay of a pane on its first element. A delay already
    /// running is left alone.
    fn set_pane_delay_timer<K>(
        &self,
        key: &K,
        window: &WF::Window,
        state: &WindowState<A>,
        timers: &mut TimerService<K, WF::Window>,
    ) where
        K: Clone + Eq + Hash,
    {
        let Some(delay) = self.strategy.trigger.processing_delay() else { return };
        if state.closed
            || state.trigger.finished
            || state.pending_elements == 0
            || timers.is_set(key, window, TimeDomain::ProcessingTime, TimerKind::PaneDelay)
        {
            return;
        }
        let due = saturating_add(timers.processing_time(), delay);
        timers.set_timer(key.clone(), TimerData::processing_time(due, TimerKind::PaneDelay, window.clone()));
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_pane<K>(
        &self,
        key: &K,
        window: &WF::Window,
        state: &mut WindowState<A>,
        timing: Timing,
        is_last: bool,
        out: &mut Vec<KeyedOutput<K, O, WF::Window>>,
        stats: &mut ReduceStats,
    ) -> Result<()>
    where
        K: Clone + Debug,
    {
        let combine_fn = &self.combine_fn;
        let pane = PaneInfo::create_pane(
            state.pane_index == 0,
            is_last,
            timing,
            state.pane_index,
            state.non_speculative_index,
        );
        let output = if is_last || self.strategy.accumulation_mode == AccumulationMode::Discarding {
            let o = state.accumulator.extract_with(|a| combine_fn.finish(a))?;
            state.accumulator = Accumulator::new(combine_fn.create());
            o
        } else {
            combine_fn.finish(state.accumulator.peek()?.clone())
        };
        let timestamp = state.timestamp.unwrap_or_else(|| window.max_timestamp());

        debug!(?key, ?window, ?timing, index = pane.index, is_last, "emitting pane");
        out.push(WindowedValue::new((key.clone(), output), timestamp, vec![window.clone()], pane));

        state.pane_index += 1;
        if timing != Timing::Early {
            state.non_speculative_index += 1;
        }
        if timing == Timing::OnTime {
            state.fired_on_time = true;
        }
        state.pending_elements = 0;
        state.timestamp = None;
        self.strategy.trigger.on_fire(&mut state.trigger, timing);
        stats.panes_emitted += 1;
        Ok(())
    }
}
