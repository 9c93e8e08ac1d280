//! Buffering combiner used by plain group-by-key.

use crate::combine::{CombineFn, Data};
use std::marker::PhantomData;

/// Collects every value.
///
/// - Accumulator: `Vec<T>`
/// - Output: `Vec<T>` in arrival order within each partition; merge appends.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToList<T>(pub PhantomData<T>);
impl<T> ToList<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: Data> CombineFn<T, Vec<T>, Vec<T>> for ToList<T> {
    fn create(&self) -> Vec<T> {
        Vec::new()
    }

    fn add_input(&self, acc: &mut Vec<T>, v: T) {
        acc.push(v);
    }

    fn merge(&self, acc: &mut Vec<T>, mut other: Vec<T>) {
        acc.append(&mut other);
    }

    fn finish(&self, acc: Vec<T>) -> Vec<T> {
        acc
    }
}
