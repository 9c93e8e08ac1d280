//! Top-K combiner for selecting the largest values

use crate::combine::{CombineFn, Data};
use std::marker::PhantomData;

/* ===================== TopK<T> ===================== */

/// The **K** largest values (requires `Ord`).
///
/// The accumulator is a vector kept sorted descending and truncated to `k`, so memory is
/// bounded by `k` and the accumulator serializes as a plain sequence.
///
/// - Accumulator: `Vec<T>` (descending)
/// - Output: `Vec<T>` sorted descending.
///
/// `k == 0` always produces an empty vector.
#[derive(Clone, Debug)]
pub struct TopK<T> {
    /// Number of largest elements to keep.
    pub k: usize,
    _m: PhantomData<T>,
}
impl<T> TopK<T> {
    #[must_use]
    pub const fn new(k: usize) -> Self {
        Self { k, _m: PhantomData }
    }
}

impl<T> CombineFn<T, Vec<T>, Vec<T>> for TopK<T>
where
    T: Data + Ord,
{
    fn create(&self) -> Vec<T> {
        Vec::with_capacity(self.k)
    }

    fn add_input(&self, acc: &mut Vec<T>, v: T) {
        // first index whose value is smaller than v
        let pos = acc.partition_point(|x| *x >= v);
        if pos < self.k {
            acc.insert(pos, v);
            acc.truncate(self.k);
        }
    }

    fn merge(&self, acc: &mut Vec<T>, other: Vec<T>) {
        if other.is_empty() {
            return;
        }
        let mine = std::mem::take(acc);
        let mut a = mine.into_iter().peekable();
        let mut b = other.into_iter().peekable();
        while acc.len() < self.k {
            let next = match (a.peek(), b.peek()) {
                (Some(x), Some(y)) if x >= y => a.next(),
                (Some(_), Some(_)) => b.next(),
                (Some(_), None) => a.next(),
                (None, _) => b.next(),
            };
            match next {
                Some(v) => acc.push(v),
                None => break,
            }
        }
    }

    fn finish(&self, acc: Vec<T>) -> Vec<T> {
        acc
    }
}
