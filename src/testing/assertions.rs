//! Assertions over operator output.
//!
//! Operators emit [`KeyedOutput`]s whose order across keys is not guaranteed (shards run in
//! parallel, hash maps iterate in arbitrary order). These helpers normalize output into
//! sorted `(key, window, value)` triples before comparing.

use crate::pane::Timing;
use crate::reduce_fn::KeyedOutput;
use crate::time::TimestampMs;
use std::fmt::Debug;

/// Sorted `(key, window, value)` triples of `outputs`.
pub fn pane_values<K, O, W>(outputs: &[KeyedOutput<K, O, W>]) -> Vec<(K, W, O)>
where
    K: Clone + Ord,
    O: Clone,
    W: Clone + Ord,
{
    let mut v: Vec<_> = outputs
        .iter()
        .map(|o| {
            let (k, v) = o.value().clone();
            let w = o.windows().first().cloned();
            (k, w, v)
        })
        .filter_map(|(k, w, v)| w.map(|w| (k, w, v)))
        .collect();
    v.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    v
}

/// Assert that `outputs` hold exactly the `(key, window, value)` panes in `expected`, in any
/// order.
///
/// # Panics
///
/// Panics if the panes differ.
///
/// # Example
///
/// ```
/// use ironpane::testing::assert_panes_equal;
/// use ironpane::{IntervalWindow, WindowedValue};
///
/// let w = IntervalWindow::new(0, 10);
/// let out = vec![WindowedValue::of(("b", 2), 9, w), WindowedValue::of(("a", 1), 9, w)];
/// assert_panes_equal(&out, vec![("a", w, 1), ("b", w, 2)]);
/// ```
pub fn assert_panes_equal<K, O, W>(outputs: &[KeyedOutput<K, O, W>], mut expected: Vec<(K, W, O)>)
where
    K: Clone + Debug + Ord,
    O: Clone + Debug + PartialEq,
    W: Clone + Debug + Ord,
{
    let actual = pane_values(outputs);
    expected.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    assert_eq!(
        actual.len(),
        expected.len(),
        "Pane count mismatch:\n  Expected: {expected:?}\n  Actual: {actual:?}"
    );
    for (i, (a, e)) in actual.iter().zip(&expected).enumerate() {
        assert!(
            a == e,
            "Pane mismatch at index {i}:\n  Expected: {e:?}\n  Actual: {a:?}\n  Full expected: {expected:?}\n  Full actual: {actual:?}"
        );
    }
}

/// Assert the timing of each pane, in emission order.
///
/// # Panics
///
/// Panics if the timings differ.
pub fn assert_pane_timings<K: Debug, O: Debug, W: Debug>(outputs: &[KeyedOutput<K, O, W>], expected: &[Timing]) {
    let actual: Vec<Timing> = outputs.iter().map(|o| o.pane().timing).collect();
    assert_eq!(
        actual, expected,
        "Pane timing mismatch for outputs {outputs:?}"
    );
}

/// Assert that a sequence of emitted watermarks strictly increases.
///
/// # Panics
///
/// Panics on the first watermark that does not advance.
pub fn assert_watermarks_advance(watermarks: &[TimestampMs]) {
    for (i, pair) in watermarks.windows(2).enumerate() {
        assert!(
            pair[0] < pair[1],
            "Watermark regressed or stalled at index {}: {} -> {} in {watermarks:?}",
            i + 1,
            pair[0],
            pair[1]
        );
    }
}

/// Assert that all elements satisfy `predicate`.
///
/// # Panics
///
/// Panics naming the first element that fails.
pub fn assert_all<T: Debug>(collection: &[T], predicate: impl Fn(&T) -> bool) {
    if let Some((i, item)) = collection.iter().enumerate().find(|(_, item)| !predicate(item)) {
        panic!("Element at index {i} failed predicate: {item:?}\n  Collection: {collection:?}");
    }
}

/// Assert that no element satisfies `predicate`.
///
/// # Panics
///
/// Panics naming the first element that matches.
pub fn assert_none<T: Debug>(collection: &[T], predicate: impl Fn(&T) -> bool) {
    if let Some((i, item)) = collection.iter().enumerate().find(|(_, item)| predicate(item)) {
        panic!("Element at index {i} unexpectedly matched predicate: {item:?}\n  Collection: {collection:?}");
    }
}
