//! Sliding (hopping) windows.

use super::WindowFn;
use crate::error::{Error, Result};
use crate::time::{DurationMs, TimestampMs, mod_floor, saturating_add};
use crate::window::{BoundedWindow, IntervalWindow};

/// Windows of `size` that start every `period`; an element belongs to `ceil(size / period)`
/// windows when `period <= size`, and possibly to none of them when `period > size`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlidingWindows {
    size: DurationMs,
    period: DurationMs,
    offset: DurationMs,
}

impl SlidingWindows {
    pub fn of(size: DurationMs, period: DurationMs) -> Result<Self> {
        Self::with_offset(size, period, 0)
    }

    pub fn with_offset(size: DurationMs, period: DurationMs, offset: DurationMs) -> Result<Self> {
        if size <= 0 || period <= 0 {
            return Err(Error::InvalidWindowing(format!(
                "sliding windows need a positive size and period, got size={size} period={period}"
            )));
        }
        Ok(Self { size, period, offset: mod_floor(offset, period) })
    }

    pub fn size(&self) -> DurationMs {
        self.size
    }

    pub fn period(&self) -> DurationMs {
        self.period
    }

    fn last_start_for(&self, timestamp: TimestampMs) -> TimestampMs {
        timestamp - mod_floor(timestamp - self.offset, self.period)
    }
}

impl WindowFn for SlidingWindows {
    type Window = IntervalWindow;

    /// Windows are returned newest first.
    fn assign_windows(&self, timestamp: TimestampMs) -> Vec<IntervalWindow> {
        let mut windows = Vec::with_capacity((self.size / self.period).max(1) as usize);
        let mut start = self.last_start_for(timestamp);
        while start > timestamp.saturating_sub(self.size) {
            windows.push(IntervalWindow::new(start, saturating_add(start, self.size)));
            start = start.saturating_sub(self.period);
        }
        windows
    }

    /// Shift the timestamp forward so it lands in the last period of the window; this keeps
    /// an element in several overlapping windows from holding the watermark back for all of
    /// them.
    fn output_time(&self, timestamp: TimestampMs, window: &IntervalWindow) -> TimestampMs {
        let start_of_last_segment = window.max_timestamp() - self.period;
        if start_of_last_segment < timestamp {
            timestamp
        } else {
            start_of_last_segment + 1
        }
    }

    fn is_compatible(&self, other: &Self) -> bool {
        self == other
    }

    fn describe(&self) -> String {
        format!(
            "SlidingWindows(size={}ms, period={}ms, offset={}ms)",
            self.size, self.period, self.offset
        )
    }
}
