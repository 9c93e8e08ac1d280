//! Window types.
//!
//! A window is a bounded slice of event time that elements are assigned to. Every window
//! knows its [`max_timestamp`](BoundedWindow::max_timestamp): the last instant that still
//! belongs to it. Watermark-driven firing and garbage collection are expressed in terms of
//! that instant.

use crate::time::{ONE_DAY_MS, TIMESTAMP_MAX_VALUE, TimestampMs, div_floor, saturating_add};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

/// Behavior shared by every window type.
///
/// Windows are used as map keys in per-key state, so they must be hashable, totally
/// ordered (for deterministic output order), and serializable (to cross process
/// boundaries through coders).
pub trait BoundedWindow:
    'static + Clone + Debug + Eq + Hash + Ord + Send + Sync + Serialize + DeserializeOwned
{
    /// The largest timestamp that belongs to this window.
    fn max_timestamp(&self) -> TimestampMs;
}

/// The single window that spans all of event time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalWindow;

impl BoundedWindow for GlobalWindow {
    /// One day before the end of time, so the end-of-window timer fires once the watermark
    /// reaches [`TIMESTAMP_MAX_VALUE`].
    fn max_timestamp(&self) -> TimestampMs {
        TIMESTAMP_MAX_VALUE - ONE_DAY_MS
    }
}

/// A closed-open time range: [start, end).
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq)]
pub struct IntervalWindow {
    pub start: TimestampMs,
    pub end: TimestampMs,
}

impl IntervalWindow {
    #[inline]
    pub fn new(start: TimestampMs, end: TimestampMs) -> Self {
        debug_assert!(end >= start);
        Self { start, end }
    }

    /// Compute the tumbling window [win_start, win_start + size) for a timestamp.
    /// `size_ms` > 0; `offset_ms` may be negative or positive.
    #[inline]
    pub fn tumble(ts: TimestampMs, size_ms: i64, offset_ms: i64) -> Self {
        debug_assert!(size_ms > 0);
        // floor division keeps negative timestamps in the right bucket
        let k = div_floor(ts.saturating_sub(offset_ms), size_ms);
        let win_start = k.saturating_mul(size_ms).saturating_add(offset_ms);
        Self { start: win_start, end: saturating_add(win_start, size_ms) }
    }

    #[inline]
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    #[inline]
    pub fn contains(&self, ts: TimestampMs) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Whether the two windows share at least one instant. Adjacent windows
    /// (`[0, 5)` and `[5, 9)`) do not intersect.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[inline]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        !self.intersects(other)
    }

    /// The smallest window covering both `self` and `other`.
    #[inline]
    pub fn span(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl BoundedWindow for IntervalWindow {
    fn max_timestamp(&self) -> TimestampMs {
        self.end - 1
    }
}

// Hash/Ord so windows can be used as keys and sorted deterministically.
impl PartialEq for IntervalWindow {
    #[inline] fn eq(&self, other: &Self) -> bool { self.start == other.start && self.end == other.end }
}
impl Hash for IntervalWindow {
    #[inline] fn hash<H: Hasher>(&self, state: &mut H) { self.start.hash(state); self.end.hash(state); }
}
impl Ord for IntervalWindow {
    #[inline] fn cmp(&self, o: &Self) -> Ordering {
        self.start.cmp(&o.start).then(self.end.cmp(&o.end))
    }
}
impl PartialOrd for IntervalWindow {
    #[inline] fn partial_cmp(&self, o: &Self) -> Option<Ordering> { Some(self.cmp(o)) }
}
