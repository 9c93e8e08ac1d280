//! Pane descriptors: which firing of a window produced an output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// When a pane fired relative to the watermark.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timing {
    /// Before the watermark passed the end of the window.
    Early,
    /// The first pane after the watermark passed the end of the window.
    OnTime,
    /// Any pane after the on-time pane.
    Late,
    /// Not produced by a trigger firing (e.g. batch outputs before windowing completes).
    Unknown,
}

/// Describes one firing of a window.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaneInfo {
    pub is_first: bool,
    pub is_last: bool,
    pub timing: Timing,
    /// Index of this pane among all panes of the window, starting at 0.
    pub index: u64,
    /// Index among non-early panes; `-1` for early panes.
    pub non_speculative_index: i64,
}

impl PaneInfo {
    /// Values that have not been produced by a firing.
    pub const NO_FIRING: PaneInfo = PaneInfo {
        is_first: true,
        is_last: true,
        timing: Timing::Unknown,
        index: 0,
        non_speculative_index: 0,
    };

    /// The one and only pane of a window, fired when the watermark passed its end.
    pub const ON_TIME_AND_ONLY_FIRING: PaneInfo = PaneInfo {
        is_first: true,
        is_last: true,
        timing: Timing::OnTime,
        index: 0,
        non_speculative_index: 0,
    };

    /// Build the descriptor of pane number `index`.
    ///
    /// Early panes never carry a non-speculative index.
    pub fn create_pane(
        is_first: bool,
        is_last: bool,
        timing: Timing,
        index: u64,
        non_speculative_index: i64,
    ) -> PaneInfo {
        let non_speculative_index = if timing == Timing::Early { -1 } else { non_speculative_index };
        PaneInfo { is_first, is_last, timing, index, non_speculative_index }
    }

    /// Shorthand for the first pane.
    pub fn first(is_last: bool, timing: Timing) -> PaneInfo {
        Self::create_pane(true, is_last, timing, 0, 0)
    }
}

impl Default for PaneInfo {
    fn default() -> Self {
        PaneInfo::NO_FIRING
    }
}

impl fmt::Display for PaneInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PaneInfo{{timing={:?}, index={}, onTimeIndex={}{}{}}}",
            self.timing,
            self.index,
            self.non_speculative_index,
            if self.is_first { ", first" } else { "" },
            if self.is_last { ", last" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_panes_have_no_non_speculative_index() {
        let p = PaneInfo::create_pane(false, false, Timing::Early, 3, 7);
        assert_eq!(p.non_speculative_index, -1);
        let p = PaneInfo::create_pane(false, true, Timing::Late, 3, 1);
        assert_eq!(p.non_speculative_index, 1);
    }

    #[test]
    fn display_mentions_flags() {
        let s = PaneInfo::ON_TIME_AND_ONLY_FIRING.to_string();
        assert!(s.contains("OnTime") && s.contains("first") && s.contains("last"));
    }
}
