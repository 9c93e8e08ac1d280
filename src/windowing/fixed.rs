//! Tumbling (fixed-size, non-overlapping) windows.

use super::WindowFn;
use crate::error::{Error, Result};
use crate::time::{DurationMs, TimestampMs, mod_floor};
use crate::window::IntervalWindow;

/// Fixed-size windows aligned to `offset`: `[offset + k * size, offset + (k + 1) * size)`.
///
/// Each element lands in exactly one window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedWindows {
    size: DurationMs,
    offset: DurationMs,
}

impl FixedWindows {
    /// Windows of `size` milliseconds starting at the epoch.
    pub fn of(size: DurationMs) -> Result<Self> {
        Self::with_offset(size, 0)
    }

    /// Windows of `size` milliseconds shifted by `offset`. The offset is normalized into
    /// `[0, size)`.
    pub fn with_offset(size: DurationMs, offset: DurationMs) -> Result<Self> {
        if size <= 0 {
            return Err(Error::InvalidWindowing(format!(
                "fixed window size must be positive, got {size}"
            )));
        }
        Ok(Self { size, offset: mod_floor(offset, size) })
    }

    pub fn size(&self) -> DurationMs {
        self.size
    }

    pub fn offset(&self) -> DurationMs {
        self.offset
    }
}

impl WindowFn for FixedWindows {
    type Window = IntervalWindow;

    fn assign_windows(&self, timestamp: TimestampMs) -> Vec<IntervalWindow> {
        vec![IntervalWindow::tumble(timestamp, self.size, self.offset)]
    }

    fn is_compatible(&self, other: &Self) -> bool {
        self == other
    }

    fn describe(&self) -> String {
        format!("FixedWindows(size={}ms, offset={}ms)", self.size, self.offset)
    }
}
