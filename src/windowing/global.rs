use super::WindowFn;
use crate::time::TimestampMs;
use crate::window::GlobalWindow;

/// Every element goes to the single [`GlobalWindow`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GlobalWindows;

impl WindowFn for GlobalWindows {
    type Window = GlobalWindow;

    fn assign_windows(&self, _timestamp: TimestampMs) -> Vec<GlobalWindow> {
        vec![GlobalWindow]
    }

    fn is_compatible(&self, _other: &Self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "GlobalWindows".to_string()
    }
}
