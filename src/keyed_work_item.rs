//! The unit of work consumed by the group-by-key stage.

use crate::timers::TimerData;
use crate::windowed_value::WindowedValue;
use serde::{Deserialize, Serialize};

/// A key with new elements and/or timers that became ready for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyedWorkItem<K, V, W> {
    key: K,
    timers: Vec<TimerData<W>>,
    elements: Vec<WindowedValue<V, W>>,
}

impl<K, V, W> KeyedWorkItem<K, V, W> {
    pub fn new(
        key: K,
        timers: impl IntoIterator<Item = TimerData<W>>,
        elements: impl IntoIterator<Item = WindowedValue<V, W>>,
    ) -> Self {
        Self {
            key,
            timers: timers.into_iter().collect(),
            elements: elements.into_iter().collect(),
        }
    }

    pub fn elements(key: K, elements: impl IntoIterator<Item = WindowedValue<V, W>>) -> Self {
        Self::new(key, [], elements)
    }

    pub fn timers(key: K, timers: impl IntoIterator<Item = TimerData<W>>) -> Self {
        Self::new(key, timers, [])
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn element_values(&self) -> &[WindowedValue<V, W>] {
        &self.elements
    }

    pub fn timer_values(&self) -> &[TimerData<W>] {
        &self.timers
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.timers.is_empty()
    }

    pub fn into_parts(self) -> (K, Vec<TimerData<W>>, Vec<WindowedValue<V, W>>) {
        (self.key, self.timers, self.elements)
    }
}
