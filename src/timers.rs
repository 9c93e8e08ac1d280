//! Timers and watermark holds for one operator.
//!
//! The [`TimerService`] owns the operator's view of time: the input watermark (advanced by
//! upstream), processing time, and the output watermark it may forward downstream. Timers
//! are keyed by `(key, window, domain, kind)`, so setting the same timer twice moves it
//! rather than duplicating it. Watermark holds keep the output watermark from passing
//! timestamps of output that has not been emitted yet.

use crate::time::{TIMESTAMP_MIN_VALUE, TimestampMs};
use crate::window::BoundedWindow;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tracing::trace;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeDomain {
    EventTime,
    ProcessingTime,
}

/// What a timer is for. End-of-window timers order before garbage-collection timers at the
/// same timestamp.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimerKind {
    EndOfWindow,
    GarbageCollection,
    /// Processing-time delay after the first element of a pane.
    PaneDelay,
}

impl TimerKind {
    pub const ALL: [TimerKind; 3] = [TimerKind::EndOfWindow, TimerKind::GarbageCollection, TimerKind::PaneDelay];
}

/// A timer scoped to a window.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerData<W> {
    pub timestamp: TimestampMs,
    pub domain: TimeDomain,
    pub kind: TimerKind,
    pub window: W,
}

impl<W> TimerData<W> {
    pub fn event_time(timestamp: TimestampMs, kind: TimerKind, window: W) -> Self {
        Self { timestamp, domain: TimeDomain::EventTime, kind, window }
    }

    pub fn processing_time(timestamp: TimestampMs, kind: TimerKind, window: W) -> Self {
        Self { timestamp, domain: TimeDomain::ProcessingTime, kind, window }
    }
}

/// A timer together with the key it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedTimer<K, W> {
    pub key: K,
    pub timer: TimerData<W>,
}

type TimerId<K, W> = (K, W, TimeDomain, TimerKind);
type QueuePos = (TimestampMs, TimerKind, u64);

/// Serializable view of a [`TimerService`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot<K, W> {
    pub input_watermark: TimestampMs,
    pub output_watermark: TimestampMs,
    pub processing_time: TimestampMs,
    pub timers: Vec<KeyedTimer<K, W>>,
    pub holds: Vec<(K, W, TimestampMs)>,
}

#[derive(Debug)]
pub struct TimerService<K, W> {
    input_watermark: TimestampMs,
    output_watermark: TimestampMs,
    processing_time: TimestampMs,
    seq: u64,
    event_queue: BTreeMap<QueuePos, KeyedTimer<K, W>>,
    processing_queue: BTreeMap<QueuePos, KeyedTimer<K, W>>,
    index: HashMap<TimerId<K, W>, QueuePos>,
    holds: HashMap<(K, W), TimestampMs>,
    hold_counts: BTreeMap<TimestampMs, usize>,
}

impl<K, W> Default for TimerService<K, W>
where
    K: Clone + Eq + Hash,
    W: BoundedWindow,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, W> TimerService<K, W>
where
    K: Clone + Eq + Hash,
    W: BoundedWindow,
{
    pub fn new() -> Self {
        Self {
            input_watermark: TIMESTAMP_MIN_VALUE,
            output_watermark: TIMESTAMP_MIN_VALUE,
            processing_time: TIMESTAMP_MIN_VALUE,
            seq: 0,
            event_queue: BTreeMap::new(),
            processing_queue: BTreeMap::new(),
            index: HashMap::new(),
            holds: HashMap::new(),
            hold_counts: BTreeMap::new(),
        }
    }

    pub fn input_watermark(&self) -> TimestampMs {
        self.input_watermark
    }

    pub fn output_watermark(&self) -> TimestampMs {
        self.output_watermark
    }

    pub fn processing_time(&self) -> TimestampMs {
        self.processing_time
    }

    /// Set (or move) the timer identified by `(key, window, domain, kind)`.
    pub fn set_timer(&mut self, key: K, timer: TimerData<W>) {
        let id = (key.clone(), timer.window.clone(), timer.domain, timer.kind);
        if let Some(pos) = self.index.get(&id) {
            if pos.0 == timer.timestamp {
                return;
            }
            let pos = *pos;
            self.queue_mut(timer.domain).remove(&pos);
        }
        self.seq += 1;
        let pos = (timer.timestamp, timer.kind, self.seq);
        self.index.insert(id, pos);
        self.queue_mut(timer.domain).insert(pos, KeyedTimer { key, timer });
    }

    /// Remove a timer if set. Returns whether it was.
    pub fn delete_timer(&mut self, key: &K, window: &W, domain: TimeDomain, kind: TimerKind) -> bool {
        let id = (key.clone(), window.clone(), domain, kind);
        match self.index.remove(&id) {
            Some(pos) => self.queue_mut(domain).remove(&pos).is_some(),
            None => false,
        }
    }

    pub fn is_set(&self, key: &K, window: &W, domain: TimeDomain, kind: TimerKind) -> bool {
        self.index.contains_key(&(key.clone(), window.clone(), domain, kind))
    }

    /// Delete every timer of `(key, window)`.
    pub fn delete_window_timers(&mut self, key: &K, window: &W) {
        for domain in [TimeDomain::EventTime, TimeDomain::ProcessingTime] {
            for kind in TimerKind::ALL {
                self.delete_timer(key, window, domain, kind);
            }
        }
    }

    /// Advance the input watermark and remove the event-time timers it passed, in timestamp
    /// order. A watermark behind the current one is ignored.
    pub fn advance_input_watermark(&mut self, watermark: TimestampMs) -> Vec<KeyedTimer<K, W>> {
        if watermark < self.input_watermark {
            trace!(current = self.input_watermark, watermark, "ignoring regressing input watermark");
        } else {
            self.input_watermark = watermark;
        }
        let limit = self.input_watermark;
        self.drain_queue(TimeDomain::EventTime, |ts| ts < limit)
    }

    /// Advance processing time and remove the processing-time timers now due.
    pub fn advance_processing_time(&mut self, now: TimestampMs) -> Vec<KeyedTimer<K, W>> {
        self.processing_time = self.processing_time.max(now);
        let limit = self.processing_time;
        self.drain_queue(TimeDomain::ProcessingTime, |ts| ts <= limit)
    }

    /// Hold the output watermark at or below `timestamp` for `(key, window)`. An existing
    /// earlier hold is kept.
    pub fn add_hold(&mut self, key: K, window: W, timestamp: TimestampMs) {
        match self.holds.entry((key, window)) {
            Entry::Occupied(mut e) => {
                if timestamp >= *e.get() {
                    return;
                }
                let old = e.insert(timestamp);
                Self::dec(&mut self.hold_counts, old);
            }
            Entry::Vacant(e) => {
                e.insert(timestamp);
            }
        }
        *self.hold_counts.entry(timestamp).or_insert(0) += 1;
    }

    /// Release the hold of `(key, window)`, returning it.
    pub fn clear_hold(&mut self, key: &K, window: &W) -> Option<TimestampMs> {
        let ts = self.holds.remove(&(key.clone(), window.clone()))?;
        Self::dec(&mut self.hold_counts, ts);
        Some(ts)
    }

    pub fn hold(&self, key: &K, window: &W) -> Option<TimestampMs> {
        self.holds.get(&(key.clone(), window.clone())).copied()
    }

    pub fn min_hold(&self) -> Option<TimestampMs> {
        self.hold_counts.keys().next().copied()
    }

    /// Recompute the output watermark as `min(input watermark, earliest hold)`. Returns the
    /// new value if it advanced; it never moves backwards.
    pub fn update_output_watermark(&mut self) -> Option<TimestampMs> {
        let candidate = self
            .min_hold()
            .map_or(self.input_watermark, |h| h.min(self.input_watermark));
        if candidate > self.output_watermark {
            self.output_watermark = candidate;
            Some(candidate)
        } else {
            None
        }
    }

    pub fn pending_timers(&self) -> usize {
        self.event_queue.len() + self.processing_queue.len()
    }

    /// Timestamp of the next event-time timer.
    pub fn next_event_timer(&self) -> Option<TimestampMs> {
        self.event_queue.keys().next().map(|(ts, _, _)| *ts)
    }

    pub fn snapshot(&self) -> TimerSnapshot<K, W> {
        TimerSnapshot {
            input_watermark: self.input_watermark,
            output_watermark: self.output_watermark,
            processing_time: self.processing_time,
            timers: self
                .event_queue
                .values()
                .chain(self.processing_queue.values())
                .cloned()
                .collect(),
            holds: self
                .holds
                .iter()
                .map(|((k, w), ts)| (k.clone(), w.clone(), *ts))
                .collect(),
        }
    }

    pub fn restore(snapshot: TimerSnapshot<K, W>) -> Self {
        let mut svc = Self::new();
        svc.input_watermark = snapshot.input_watermark;
        svc.output_watermark = snapshot.output_watermark;
        svc.processing_time = snapshot.processing_time;
        for KeyedTimer { key, timer } in snapshot.timers {
            svc.set_timer(key, timer);
        }
        for (k, w, ts) in snapshot.holds {
            svc.add_hold(k, w, ts);
        }
        svc
    }

    fn queue_mut(&mut self, domain: TimeDomain) -> &mut BTreeMap<QueuePos, KeyedTimer<K, W>> {
        match domain {
            TimeDomain::EventTime => &mut self.event_queue,
            TimeDomain::ProcessingTime => &mut self.processing_queue,
        }
    }

    fn drain_queue(
        &mut self,
        domain: TimeDomain,
        due: impl Fn(TimestampMs) -> bool,
    ) -> Vec<KeyedTimer<K, W>> {
        let mut fired = Vec::new();
        loop {
            let queue = self.queue_mut(domain);
            let Some((&pos, _)) = queue.first_key_value() else { break };
            if !due(pos.0) {
                break;
            }
            let Some(t) = queue.remove(&pos) else { break };
            self.index
                .remove(&(t.key.clone(), t.timer.window.clone(), t.timer.domain, t.timer.kind));
            fired.push(t);
        }
        fired
    }

    fn dec(counts: &mut BTreeMap<TimestampMs, usize>, ts: TimestampMs) {
        if let Some(n) = counts.get_mut(&ts) {
            *n -= 1;
            if *n == 0 {
                counts.remove(&ts);
            }
        }
    }
}
