//! Session windows: activity bursts separated by a gap.

use super::{WindowFn, WindowMapping, merge_overlapping};
use crate::error::{Error, Result};
use crate::time::{DurationMs, TimestampMs, saturating_add};
use crate::window::IntervalWindow;
use std::collections::BTreeSet;

/// Each element opens a proto-session `[ts, ts + gap)`; proto-sessions that intersect are
/// merged into one session spanning all of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sessions {
    gap: DurationMs,
}

impl Sessions {
    pub fn with_gap(gap: DurationMs) -> Result<Self> {
        if gap <= 0 {
            return Err(Error::InvalidWindowing(format!(
                "session gap must be positive, got {gap}"
            )));
        }
        Ok(Self { gap })
    }

    pub fn gap(&self) -> DurationMs {
        self.gap
    }
}

impl WindowFn for Sessions {
    type Window = IntervalWindow;

    fn assign_windows(&self, timestamp: TimestampMs) -> Vec<IntervalWindow> {
        vec![IntervalWindow::new(timestamp, saturating_add(timestamp, self.gap))]
    }

    fn is_non_merging(&self) -> bool {
        false
    }

    fn merge_windows(&self, windows: &BTreeSet<IntervalWindow>) -> Result<WindowMapping<IntervalWindow>> {
        merge_overlapping(windows)
    }

    // Sessions with different gaps still produce interval windows that merge the same way.
    fn is_compatible(&self, _other: &Self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("Sessions(gap={}ms)", self.gap)
    }
}
