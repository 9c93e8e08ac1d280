//! Timestamp combiners: how the output timestamp of a pane is chosen from the timestamps of
//! the inputs that went into it.

use crate::time::TimestampMs;
use crate::window::BoundedWindow;
use serde::{Deserialize, Serialize};

/// Policy for combining input timestamps into an output timestamp.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimestampCombiner {
    /// The earliest input timestamp.
    Earliest,
    /// The latest input timestamp.
    Latest,
    /// The end of the window, regardless of the inputs.
    #[default]
    EndOfWindow,
}

impl TimestampCombiner {
    /// Combine two timestamps.
    ///
    /// `EndOfWindow` combines like `Earliest`: every input timestamp it sees has already been
    /// assigned to the end of its window, and the earliest one holds the watermark.
    pub fn combine(self, a: TimestampMs, b: TimestampMs) -> TimestampMs {
        match self {
            TimestampCombiner::Latest => a.max(b),
            TimestampCombiner::Earliest | TimestampCombiner::EndOfWindow => a.min(b),
        }
    }

    /// Fold all timestamps; `None` for an empty input.
    pub fn combine_all<I>(self, timestamps: I) -> Option<TimestampMs>
    where
        I: IntoIterator<Item = TimestampMs>,
    {
        timestamps.into_iter().reduce(|a, b| self.combine(a, b))
    }

    /// The timestamp an input with event time `timestamp` contributes to `window`.
    pub fn assign<W: BoundedWindow>(self, window: &W, timestamp: TimestampMs) -> TimestampMs {
        match self {
            TimestampCombiner::EndOfWindow => window.max_timestamp(),
            TimestampCombiner::Earliest | TimestampCombiner::Latest => timestamp,
        }
    }

    /// Combine timestamps that were assigned to windows which have now merged into `window`.
    pub fn merge<W, I>(self, window: &W, timestamps: I) -> Option<TimestampMs>
    where
        W: BoundedWindow,
        I: IntoIterator<Item = TimestampMs>,
    {
        match self {
            TimestampCombiner::EndOfWindow => {
                let mut it = timestamps.into_iter().peekable();
                it.peek().is_some().then(|| window.max_timestamp())
            }
            _ => self.combine_all(timestamps),
        }
    }

    /// `true` if the output timestamp only depends on the window.
    pub fn depends_only_on_window(self) -> bool {
        matches!(self, TimestampCombiner::EndOfWindow)
    }
}
