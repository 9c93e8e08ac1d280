//! Window functions: assigning elements to windows and merging windows.
//!
//! A [`WindowFn`] decides which windows an element belongs to from its event timestamp. Merging
//! window functions ([`Sessions`]) additionally collapse intersecting windows into a single
//! result window; the outcome is a [`WindowMapping`] from each original window to the window it
//! merged into. Non-merging window functions never merge, so callers skip merge resolution and
//! use [`WindowMapping::identity`].
//!
//! # Example
//! ```
//! use std::collections::BTreeSet;
//! use ironpane::{IntervalWindow, Sessions, WindowFn};
//!
//! let sessions = Sessions::with_gap(5)?;
//! let active: BTreeSet<_> = [IntervalWindow::new(0, 5), IntervalWindow::new(3, 9)].into();
//! let mapping = sessions.merge_windows(&active)?;
//! assert_eq!(mapping.resolve(&IntervalWindow::new(3, 9)), IntervalWindow::new(0, 9));
//! # Ok::<(), ironpane::Error>(())
//! ```

mod fixed;
mod global;
mod sessions;
mod sliding;

pub use fixed::FixedWindows;
pub use global::GlobalWindows;
pub use sessions::Sessions;
pub use sliding::SlidingWindows;

use crate::error::{Error, Result};
use crate::time::TimestampMs;
use crate::window::{BoundedWindow, IntervalWindow};
use std::collections::{BTreeMap, BTreeSet};

/// Assigns elements to windows and, for merging strategies, merges windows.
pub trait WindowFn: Send + Sync + 'static {
    type Window: BoundedWindow;

    /// Windows an element with event time `timestamp` belongs to. Sliding windows whose period
    /// exceeds their size leave gaps, so this can be empty.
    fn assign_windows(&self, timestamp: TimestampMs) -> Vec<Self::Window>;

    /// `true` if this window function never merges windows.
    fn is_non_merging(&self) -> bool {
        true
    }

    /// Compute the merge partition of `windows`.
    ///
    /// The returned mapping only lists windows that merged into something other than
    /// themselves.
    fn merge_windows(&self, windows: &BTreeSet<Self::Window>) -> Result<WindowMapping<Self::Window>> {
        let _ = windows;
        Ok(WindowMapping::identity())
    }

    /// The output timestamp of an element with event time `timestamp` in `window`, before the
    /// timestamp combiner is applied.
    fn output_time(&self, timestamp: TimestampMs, window: &Self::Window) -> TimestampMs {
        let _ = window;
        timestamp
    }

    /// Whether windows produced by `self` and `other` can be combined.
    fn is_compatible(&self, other: &Self) -> bool;

    /// Short human-readable description used in logs and errors.
    fn describe(&self) -> String;
}

/// The result of merging: original window -> merged window.
///
/// Windows absent from the mapping resolve to themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowMapping<W> {
    merged: BTreeMap<W, W>,
}

impl<W> Default for WindowMapping<W> {
    fn default() -> Self {
        Self { merged: BTreeMap::new() }
    }
}

impl<W: BoundedWindow> WindowMapping<W> {
    /// The mapping of a non-merging window function: every window maps to itself.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Record that `from` merged into `into`.
    ///
    /// A window can only merge into one result; a second, different target is an error.
    pub fn record(&mut self, from: W, into: W) -> Result<()> {
        match self.merged.get(&from) {
            Some(existing) if *existing != into => Err(Error::WindowMerge(format!(
                "window {from:?} merged into both {existing:?} and {into:?}"
            ))),
            _ => {
                self.merged.insert(from, into);
                Ok(())
            }
        }
    }

    /// The window `window` ends up in after merging.
    pub fn resolve(&self, window: &W) -> W {
        self.merged.get(window).cloned().unwrap_or_else(|| window.clone())
    }

    pub fn is_identity(&self) -> bool {
        self.merged.iter().all(|(from, into)| from == into)
    }

    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    /// Merge results with the source windows folded into each, in window order.
    ///
    /// A result window that was itself one of the sources appears in its own list.
    pub fn merge_results(&self) -> BTreeMap<W, Vec<W>> {
        let mut out: BTreeMap<W, Vec<W>> = BTreeMap::new();
        for (from, into) in &self.merged {
            out.entry(into.clone()).or_default().push(from.clone());
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&W, &W)> {
        self.merged.iter()
    }
}

/// Merge every group of intersecting windows into their span.
///
/// Windows are visited by start; a window that intersects the running span extends it.
pub(crate) fn merge_overlapping(
    windows: &BTreeSet<IntervalWindow>,
) -> Result<WindowMapping<IntervalWindow>> {
    fn flush(
        mapping: &mut WindowMapping<IntervalWindow>,
        group: &mut Vec<IntervalWindow>,
        span: Option<IntervalWindow>,
    ) -> Result<()> {
        match span {
            Some(span) if group.len() > 1 => {
                for w in group.drain(..) {
                    mapping.record(w, span)?;
                }
            }
            _ => group.clear(),
        }
        Ok(())
    }

    let mut mapping = WindowMapping::identity();
    let mut group: Vec<IntervalWindow> = Vec::new();
    let mut span: Option<IntervalWindow> = None;

    for w in windows {
        match span {
            Some(cur) if cur.intersects(w) => {
                span = Some(cur.span(w));
                group.push(*w);
            }
            _ => {
                flush(&mut mapping, &mut group, span)?;
                span = Some(*w);
                group.push(*w);
            }
        }
    }
    flush(&mut mapping, &mut group, span)?;
    Ok(mapping)
}
