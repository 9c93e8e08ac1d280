//! Triggers: when a window emits a pane.
//!
//! Firing is decided here, independently of the combine contract: the runner asks the
//! trigger whether to fire after each element and at the end of the window, and tells it
//! when a pane was emitted so it can reset or finish.

use crate::pane::Timing;
use crate::time::{DurationMs, TIMESTAMP_MAX_VALUE, TimestampMs};
use crate::window::BoundedWindow;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trigger configuration of a windowing strategy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// Fire once when the watermark passes the end of the window, then once per late element
    /// until the window expires.
    #[default]
    Default,
    /// Fire when the watermark passes the end of the window, optionally after every `early`
    /// elements before that and every `late` elements after it. Without late firings the
    /// trigger finishes after the on-time pane.
    AfterWatermark { early: Option<u64>, late: Option<u64> },
    /// Fire once after at least `n` elements.
    ElementCount(u64),
    /// Fire once, `delay` of processing time after the first element of the pane arrived.
    AfterProcessingTime { delay: DurationMs },
    /// Run the inner trigger forever, resetting it instead of finishing.
    Repeatedly(Box<Trigger>),
    /// Never fire; the window only emits its final pane when it is garbage collected.
    Never,
}

/// Per-window trigger bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerState {
    pub elements_since_fire: u64,
    pub finished: bool,
}

impl TriggerState {
    /// Combine the states of windows that merged. A merged window is open again.
    pub fn merge(&mut self, other: &TriggerState) {
        self.elements_since_fire += other.elements_since_fire;
        self.finished = false;
    }
}

impl Trigger {
    pub fn after_watermark() -> Self {
        Trigger::AfterWatermark { early: None, late: None }
    }

    pub fn element_count_at_least(n: u64) -> Self {
        Trigger::ElementCount(n)
    }

    pub fn after_processing_time(delay: DurationMs) -> Self {
        Trigger::AfterProcessingTime { delay }
    }

    pub fn repeatedly(inner: Trigger) -> Self {
        Trigger::Repeatedly(Box::new(inner))
    }

    pub fn on_element(&self, state: &mut TriggerState) {
        state.elements_since_fire += 1;
    }

    /// Whether an element-driven firing is due. `past_end_of_window` is true once the input
    /// watermark passed the window's max timestamp.
    pub fn should_fire(&self, state: &TriggerState, past_end_of_window: bool) -> bool {
        if state.finished {
            return false;
        }
        let count = state.elements_since_fire;
        match self {
            Trigger::Default => past_end_of_window && count >= 1,
            Trigger::AfterWatermark { early, late } => {
                let threshold = if past_end_of_window { late } else { early };
                threshold.is_some_and(|n| count >= n.max(1))
            }
            Trigger::ElementCount(n) => count >= (*n).max(1),
            Trigger::Repeatedly(inner) => inner.should_fire(state, past_end_of_window),
            Trigger::AfterProcessingTime { .. } | Trigger::Never => false,
        }
    }

    /// Processing-time delay after which a pane fires, if this trigger fires on processing
    /// time at all.
    pub fn processing_delay(&self) -> Option<DurationMs> {
        match self {
            Trigger::AfterProcessingTime { delay } => Some((*delay).max(0)),
            Trigger::Repeatedly(inner) => inner.processing_delay(),
            Trigger::Default
            | Trigger::AfterWatermark { .. }
            | Trigger::ElementCount(_)
            | Trigger::Never => None,
        }
    }

    /// Whether the watermark passing the end of the window fires a pane.
    pub fn fires_at_end_of_window(&self) -> bool {
        match self {
            Trigger::Default | Trigger::AfterWatermark { .. } => true,
            Trigger::ElementCount(_) | Trigger::AfterProcessingTime { .. } | Trigger::Never => false,
            Trigger::Repeatedly(inner) => inner.fires_at_end_of_window(),
        }
    }

    /// Record that a pane with `timing` fired.
    pub fn on_fire(&self, state: &mut TriggerState, timing: Timing) {
        state.elements_since_fire = 0;
        state.finished = self.finishes_after(timing);
    }

    /// Whether firing a pane with `timing` finishes this trigger.
    pub fn finishes_after(&self, timing: Timing) -> bool {
        match self {
            Trigger::ElementCount(_) | Trigger::AfterProcessingTime { .. } => true,
            Trigger::AfterWatermark { late: None, .. } => {
                matches!(timing, Timing::OnTime | Timing::Late)
            }
            Trigger::Default
            | Trigger::AfterWatermark { late: Some(_), .. }
            | Trigger::Repeatedly(_)
            | Trigger::Never => false,
        }
    }

    pub fn is_finished(&self, state: &TriggerState) -> bool {
        state.finished
    }

    /// The trigger to use after a combine lifts this one past a grouping: element counts
    /// collapse to one since upstream already counted.
    pub fn continuation(&self) -> Trigger {
        match self {
            Trigger::ElementCount(_) => Trigger::ElementCount(1),
            Trigger::AfterWatermark { early, late } => Trigger::AfterWatermark {
                early: early.map(|_| 1),
                late: late.map(|_| 1),
            },
            Trigger::Repeatedly(inner) => Trigger::Repeatedly(Box::new(inner.continuation())),
            Trigger::AfterProcessingTime { delay } => Trigger::AfterProcessingTime { delay: *delay },
            Trigger::Default => Trigger::Default,
            Trigger::Never => Trigger::Never,
        }
    }

    /// A watermark at which this trigger is certain to have fired for `window`.
    pub fn watermark_that_guarantees_firing<W: BoundedWindow>(&self, window: &W) -> TimestampMs {
        match self {
            Trigger::Default | Trigger::AfterWatermark { .. } => window.max_timestamp(),
            Trigger::ElementCount(_) | Trigger::AfterProcessingTime { .. } | Trigger::Never => {
                TIMESTAMP_MAX_VALUE
            }
            Trigger::Repeatedly(inner) => inner.watermark_that_guarantees_firing(window),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Default => write!(f, "DefaultTrigger"),
            Trigger::AfterWatermark { early, late } => {
                write!(f, "AfterWatermark.pastEndOfWindow()")?;
                if let Some(n) = early {
                    write!(f, ".withEarlyFirings({})", Trigger::ElementCount(*n))?;
                }
                if let Some(n) = late {
                    write!(f, ".withLateFirings({})", Trigger::ElementCount(*n))?;
                }
                Ok(())
            }
            Trigger::ElementCount(n) => write!(f, "AfterPane.elementCountAtLeast({n})"),
            Trigger::AfterProcessingTime { delay } => {
                write!(f, "AfterProcessingTime.pastFirstElementInPane().plusDelayOf({delay}ms)")
            }
            Trigger::Repeatedly(inner) => write!(f, "Repeatedly.forever({inner})"),
            Trigger::Never => write!(f, "Never"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{GlobalWindow, IntervalWindow};

    #[test]
    fn element_count_fires_once() {
        let t = Trigger::element_count_at_least(2);
        let mut s = TriggerState::default();
        t.on_element(&mut s);
        assert!(!t.should_fire(&s, false));
        t.on_element(&mut s);
        assert!(t.should_fire(&s, false));
        t.on_fire(&mut s, Timing::Early);
        assert!(t.is_finished(&s));
        t.on_element(&mut s);
        t.on_element(&mut s);
        assert!(!t.should_fire(&s, false));
    }

    #[test]
    fn repeatedly_resets_instead_of_finishing() {
        let t = Trigger::repeatedly(Trigger::element_count_at_least(1));
        let mut s = TriggerState::default();
        t.on_element(&mut s);
        t.on_fire(&mut s, Timing::Early);
        assert!(!t.is_finished(&s));
        t.on_element(&mut s);
        assert!(t.should_fire(&s, true));
    }

    #[test]
    fn after_watermark_without_late_firings_finishes_on_time() {
        let t = Trigger::AfterWatermark { early: Some(3), late: None };
        let mut s = TriggerState::default();
        for _ in 0..3 {
            t.on_element(&mut s);
        }
        assert!(t.should_fire(&s, false));
        t.on_fire(&mut s, Timing::Early);
        assert!(!s.finished);
        t.on_fire(&mut s, Timing::OnTime);
        assert!(s.finished);
    }

    #[test]
    fn default_fires_per_late_element() {
        let t = Trigger::Default;
        let mut s = TriggerState::default();
        t.on_element(&mut s);
        assert!(!t.should_fire(&s, false));
        assert!(t.should_fire(&s, true));
    }

    #[test]
    fn continuation_and_display() {
        let t = Trigger::element_count_at_least(100);
        assert_eq!(t.continuation(), Trigger::element_count_at_least(1));
        assert_eq!(Trigger::element_count_at_least(5).to_string(), "AfterPane.elementCountAtLeast(5)");
        assert_eq!(
            Trigger::AfterWatermark { early: Some(2), late: None }.to_string(),
            "AfterWatermark.pastEndOfWindow().withEarlyFirings(AfterPane.elementCountAtLeast(2))"
        );
    }

    #[test]
    fn processing_time_trigger_fires_only_from_timers() {
        let t = Trigger::repeatedly(Trigger::after_processing_time(30));
        let mut s = TriggerState::default();
        t.on_element(&mut s);
        assert!(!t.should_fire(&s, true));
        assert!(!t.fires_at_end_of_window());
        assert_eq!(t.processing_delay(), Some(30));
        assert_eq!(Trigger::Default.processing_delay(), None);
        assert!(Trigger::after_processing_time(30).finishes_after(Timing::Early));
        assert_eq!(
            t.to_string(),
            "Repeatedly.forever(AfterProcessingTime.pastFirstElementInPane().plusDelayOf(30ms))"
        );
    }

    #[test]
    fn guaranteed_firing_watermark() {
        let w = IntervalWindow::new(0, 10);
        assert_eq!(Trigger::Default.watermark_that_guarantees_firing(&w), 9);
        assert_eq!(
            Trigger::element_count_at_least(5).watermark_that_guarantees_firing(&GlobalWindow),
            TIMESTAMP_MAX_VALUE
        );
    }
}
