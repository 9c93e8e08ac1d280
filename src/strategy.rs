//! Windowing strategy: window function plus the firing and lateness policy around it.

use crate::error::{Error, Result};
use crate::time::{DurationMs, TimestampMs, saturating_add};
use crate::timestamp::TimestampCombiner;
use crate::trigger::Trigger;
use crate::window::BoundedWindow;
use crate::windowing::{GlobalWindows, WindowFn};
use serde::{Deserialize, Serialize};

/// Whether a window's accumulator is reset after each pane.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccumulationMode {
    /// Each pane only contains the inputs since the previous pane.
    #[default]
    Discarding,
    /// Each pane contains every input seen so far.
    Accumulating,
}

/// Whether the final pane at garbage-collection time is emitted when nothing is pending.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClosingBehavior {
    #[default]
    FireIfNonEmpty,
    FireAlways,
}

/// Whether the on-time pane is emitted when nothing is pending.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnTimeBehavior {
    #[default]
    FireAlways,
    FireIfNonEmpty,
}

/// Everything that decides how elements are windowed, combined over time, and when state
/// expires.
///
/// ```
/// use ironpane::{AccumulationMode, FixedWindows, TimestampCombiner, WindowingStrategy};
///
/// let strategy = WindowingStrategy::of(FixedWindows::of(60_000)?)
///     .with_allowed_lateness(5_000)
///     .with_timestamp_combiner(TimestampCombiner::Earliest)
///     .with_accumulation_mode(AccumulationMode::Accumulating);
/// strategy.validate()?;
/// # Ok::<(), ironpane::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct WindowingStrategy<WF> {
    pub window_fn: WF,
    pub timestamp_combiner: TimestampCombiner,
    pub allowed_lateness: DurationMs,
    pub trigger: Trigger,
    pub accumulation_mode: AccumulationMode,
    pub closing_behavior: ClosingBehavior,
    pub on_time_behavior: OnTimeBehavior,
}

impl Default for WindowingStrategy<GlobalWindows> {
    fn default() -> Self {
        Self::of(GlobalWindows)
    }
}

impl<WF: WindowFn> WindowingStrategy<WF> {
    /// `window_fn` with default policy: end-of-window timestamps, no allowed lateness, the
    /// default trigger, discarding panes.
    pub fn of(window_fn: WF) -> Self {
        Self {
            window_fn,
            timestamp_combiner: TimestampCombiner::default(),
            allowed_lateness: 0,
            trigger: Trigger::default(),
            accumulation_mode: AccumulationMode::default(),
            closing_behavior: ClosingBehavior::default(),
            on_time_behavior: OnTimeBehavior::default(),
        }
    }

    pub fn with_timestamp_combiner(mut self, combiner: TimestampCombiner) -> Self {
        self.timestamp_combiner = combiner;
        self
    }

    pub fn with_allowed_lateness(mut self, lateness: DurationMs) -> Self {
        self.allowed_lateness = lateness;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_accumulation_mode(mut self, mode: AccumulationMode) -> Self {
        self.accumulation_mode = mode;
        self
    }

    pub fn with_closing_behavior(mut self, behavior: ClosingBehavior) -> Self {
        self.closing_behavior = behavior;
        self
    }

    pub fn with_on_time_behavior(mut self, behavior: OnTimeBehavior) -> Self {
        self.on_time_behavior = behavior;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.allowed_lateness < 0 {
            return Err(Error::InvalidWindowing(format!(
                "allowed lateness must not be negative, got {}",
                self.allowed_lateness
            )));
        }
        Ok(())
    }

    /// When state for `window` is garbage collected: its max timestamp plus allowed
    /// lateness, clamped to the end of time.
    pub fn gc_time(&self, window: &WF::Window) -> TimestampMs {
        saturating_add(window.max_timestamp(), self.allowed_lateness)
    }

    /// Whether `window` has expired relative to `input_watermark`.
    pub fn is_expired(&self, window: &WF::Window, input_watermark: TimestampMs) -> bool {
        self.gc_time(window) < input_watermark
    }

    pub fn is_merging(&self) -> bool {
        !self.window_fn.is_non_merging()
    }
}
