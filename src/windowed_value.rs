//! Values tagged with event time, windows and pane.

use crate::pane::PaneInfo;
use crate::time::{TIMESTAMP_MIN_VALUE, TimestampMs};
use crate::window::GlobalWindow;
use serde::{Deserialize, Serialize};

/// A value with its event-time timestamp, the windows it belongs to, and the pane that
/// produced it.
///
/// Immutable once created: transformations return a new value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowedValue<T, W> {
    value: T,
    timestamp: TimestampMs,
    windows: Vec<W>,
    pane: PaneInfo,
}

impl<T, W> WindowedValue<T, W> {
    /// A value in `windows`, produced by `pane`.
    pub fn new(value: T, timestamp: TimestampMs, windows: Vec<W>, pane: PaneInfo) -> Self {
        Self { value, timestamp, windows, pane }
    }

    /// A value in a single window that has not been produced by a firing.
    pub fn of(value: T, timestamp: TimestampMs, window: W) -> Self {
        Self::new(value, timestamp, vec![window], PaneInfo::NO_FIRING)
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }

    pub fn windows(&self) -> &[W] {
        &self.windows
    }

    pub fn pane(&self) -> PaneInfo {
        self.pane
    }

    /// Same timestamp, windows and pane, different value.
    pub fn with_value<U>(&self, value: U) -> WindowedValue<U, W>
    where
        W: Clone,
    {
        WindowedValue::new(value, self.timestamp, self.windows.clone(), self.pane)
    }

    pub fn map_value<U>(self, f: impl FnOnce(T) -> U) -> WindowedValue<U, W> {
        WindowedValue::new(f(self.value), self.timestamp, self.windows, self.pane)
    }

    /// One value per window, each carrying exactly that window.
    pub fn explode_windows(self) -> Vec<WindowedValue<T, W>>
    where
        T: Clone,
    {
        let Self { value, timestamp, windows, pane } = self;
        windows
            .into_iter()
            .map(|w| WindowedValue::new(value.clone(), timestamp, vec![w], pane))
            .collect()
    }

    /// The only window, or `None` if the value carries zero or several windows.
    pub fn single_window(&self) -> Option<&W> {
        match self.windows.as_slice() {
            [w] => Some(w),
            _ => None,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn into_parts(self) -> (T, TimestampMs, Vec<W>, PaneInfo) {
        (self.value, self.timestamp, self.windows, self.pane)
    }
}

impl<T> WindowedValue<T, GlobalWindow> {
    /// A value in the global window at the minimum timestamp.
    pub fn value_in_global_window(value: T) -> Self {
        Self::of(value, TIMESTAMP_MIN_VALUE, GlobalWindow)
    }

    pub fn timestamped_value_in_global_window(value: T, timestamp: TimestampMs) -> Self {
        Self::of(value, timestamp, GlobalWindow)
    }
}
