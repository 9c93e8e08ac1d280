//! Scripted input for operator tests.

use crate::combine::CombineFn;
use crate::error::Result;
use crate::group_by_key::{CollectingEmitter, GroupByKeyOp};
use crate::keyed_work_item::KeyedWorkItem;
use crate::pane::PaneInfo;
use crate::reduce_fn::KeyedOutput;
use crate::time::{TIMESTAMP_MAX_VALUE, TimestampMs};
use crate::windowed_value::WindowedValue;
use crate::windowing::WindowFn;
use std::fmt::Debug;
use std::hash::Hash;

/// One step of a [`TestStream`].
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent<K, V> {
    Element { key: K, value: V, timestamp: TimestampMs },
    Watermark(TimestampMs),
    ProcessingTime(TimestampMs),
}

/// An ordered script of elements, watermark advances and processing-time advances.
///
/// Elements are delivered without windows, so the operator assigns them with its own
/// window function.
///
/// # Example
///
/// ```
/// use ironpane::testing::TestStream;
/// use ironpane::{FixedWindows, GroupByKeyOp, Sum, WindowingStrategy};
///
/// let strategy = WindowingStrategy::of(FixedWindows::of(10)?);
/// let mut op = GroupByKeyOp::new("sum", strategy, Sum::<u64>::new())?;
/// let out = TestStream::new()
///     .add_element("a", 1, 2)
///     .add_element("a", 2, 7)
///     .advance_watermark_to(10)
///     .run(&mut op)?;
/// assert_eq!(out.elements[0].value(), &("a", 3));
/// # Ok::<(), ironpane::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct TestStream<K, V> {
    events: Vec<StreamEvent<K, V>>,
}

impl<K, V> Default for TestStream<K, V> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<K, V> TestStream<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add_element(mut self, key: K, value: V, timestamp: TimestampMs) -> Self {
        self.events.push(StreamEvent::Element { key, value, timestamp });
        self
    }

    #[must_use]
    pub fn add_elements(mut self, elements: impl IntoIterator<Item = (K, V, TimestampMs)>) -> Self {
        self.events.extend(
            elements
                .into_iter()
                .map(|(key, value, timestamp)| StreamEvent::Element { key, value, timestamp }),
        );
        self
    }

    #[must_use]
    pub fn advance_watermark_to(mut self, watermark: TimestampMs) -> Self {
        self.events.push(StreamEvent::Watermark(watermark));
        self
    }

    /// Advance to the end of time, flushing every window.
    #[must_use]
    pub fn advance_watermark_to_infinity(self) -> Self {
        self.advance_watermark_to(TIMESTAMP_MAX_VALUE)
    }

    #[must_use]
    pub fn advance_processing_time(mut self, now: TimestampMs) -> Self {
        self.events.push(StreamEvent::ProcessingTime(now));
        self
    }

    pub fn events(&self) -> &[StreamEvent<K, V>] {
        &self.events
    }

    /// Feed every event to `op` in order and collect what it emits.
    pub fn run<A, O, C, WF>(
        self,
        op: &mut GroupByKeyOp<K, V, A, O, C, WF>,
    ) -> Result<CollectingEmitter<KeyedOutput<K, O, WF::Window>>>
    where
        K: Clone + Debug + Eq + Hash + Send + 'static,
        V: Clone,
        A: Clone + Send + 'static,
        C: CombineFn<V, A, O>,
        WF: WindowFn,
    {
        let mut emitter = CollectingEmitter::default();
        for event in self.events {
            match event {
                StreamEvent::Element { key, value, timestamp } => {
                    let element = WindowedValue::new(value, timestamp, Vec::new(), PaneInfo::NO_FIRING);
                    op.process_element(KeyedWorkItem::elements(key, [element]), &mut emitter)?;
                }
                StreamEvent::Watermark(wm) => op.process_watermark(wm, &mut emitter)?,
                StreamEvent::ProcessingTime(now) => op.advance_processing_time(now, &mut emitter)?,
            }
        }
        Ok(emitter)
    }
}
