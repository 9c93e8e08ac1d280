//! The combine contract and the accumulator lifecycle.
//!
//! A [`CombineFn`] describes an associative, commutative aggregation through four
//! operations: `create` a zero accumulator, `add_input` into it, `merge` two accumulators,
//! and `finish` an accumulator into the output. The engine calls these in whatever order
//! partitioning and window merging dictate, so implementations must not depend on input
//! order.
//!
//! An [`Accumulator`] wraps a combine accumulator with its lifecycle phase:
//!
//! ```text
//! Created --add--> Accumulating --merge--> Merged --extract--> Extracted
//! ```
//!
//! Once extracted, an accumulator is spent; further `add`/`merge`/`extract` calls fail with
//! [`Error::AccumulatorExtracted`].

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Bound for values that flow through the engine: cloneable, thread-safe, and serializable
/// so they can cross process boundaries through coders.
pub trait Data: 'static + Send + Sync + Clone + Debug + Serialize + DeserializeOwned {}
impl<T> Data for T where T: 'static + Send + Sync + Clone + Debug + Serialize + DeserializeOwned {}

/// An associative, commutative aggregation `V* -> O` through accumulator `A`.
pub trait CombineFn<V, A, O>: Send + Sync + 'static {
    fn create(&self) -> A;
    fn add_input(&self, acc: &mut A, v: V);
    fn merge(&self, acc: &mut A, other: A);
    fn finish(&self, acc: A) -> O;

    /// Merge any number of accumulators into a fresh one.
    fn merge_accumulators<I>(&self, accs: I) -> A
    where
        I: IntoIterator<Item = A>,
        Self: Sized,
    {
        let mut out = self.create();
        for a in accs {
            self.merge(&mut out, a);
        }
        out
    }
}

/// Counts inputs.
#[derive(Clone, Copy, Debug, Default)]
pub struct Count;

impl<V> CombineFn<V, u64, u64> for Count {
    fn create(&self) -> u64 {
        0
    }
    fn add_input(&self, acc: &mut u64, _v: V) {
        *acc += 1;
    }
    fn merge(&self, acc: &mut u64, other: u64) {
        *acc += other;
    }
    fn finish(&self, acc: u64) -> u64 {
        acc
    }
}

/// Lifecycle phase of an [`Accumulator`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccumulatorPhase {
    Created,
    Accumulating,
    Merged,
    Extracted,
}

/// A combine accumulator together with its lifecycle phase.
///
/// The operations take closures rather than a combine fn so that callers holding a generic
/// `C: CombineFn<V, A, O>` drive them without extra type annotations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Accumulator<A> {
    phase: AccumulatorPhase,
    value: Option<A>,
}

impl<A> Accumulator<A> {
    /// Wrap a zero accumulator.
    pub fn new(zero: A) -> Self {
        Self { phase: AccumulatorPhase::Created, value: Some(zero) }
    }

    pub fn phase(&self) -> AccumulatorPhase {
        self.phase
    }

    pub fn is_extracted(&self) -> bool {
        self.phase == AccumulatorPhase::Extracted
    }

    /// Fold one input in.
    pub fn add_with(&mut self, f: impl FnOnce(&mut A)) -> Result<()> {
        let acc = self.value.as_mut().ok_or(Error::AccumulatorExtracted)?;
        f(acc);
        if self.phase == AccumulatorPhase::Created {
            self.phase = AccumulatorPhase::Accumulating;
        }
        Ok(())
    }

    /// Merge `other` into `self`. Both must still hold a value.
    pub fn merge_with(&mut self, other: Accumulator<A>, f: impl FnOnce(&mut A, A)) -> Result<()> {
        let other = other.value.ok_or(Error::AccumulatorExtracted)?;
        let acc = self.value.as_mut().ok_or(Error::AccumulatorExtracted)?;
        f(acc, other);
        self.phase = AccumulatorPhase::Merged;
        Ok(())
    }

    /// Produce the output and retire the accumulator.
    pub fn extract_with<O>(&mut self, f: impl FnOnce(A) -> O) -> Result<O> {
        let acc = self.value.take().ok_or(Error::AccumulatorExtracted)?;
        self.phase = AccumulatorPhase::Extracted;
        Ok(f(acc))
    }

    /// Borrow the current value without changing the phase.
    pub fn peek(&self) -> Result<&A> {
        self.value.as_ref().ok_or(Error::AccumulatorExtracted)
    }

    pub fn into_inner(self) -> Result<A> {
        self.value.ok_or(Error::AccumulatorExtracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_forward() -> Result<()> {
        let c = Count;
        let mut acc = Accumulator::new(CombineFn::<&str, _, _>::create(&c));
        assert_eq!(acc.phase(), AccumulatorPhase::Created);
        acc.add_with(|a| c.add_input(a, "x"))?;
        assert_eq!(acc.phase(), AccumulatorPhase::Accumulating);

        let mut other = Accumulator::new(0u64);
        other.add_with(|a| c.add_input(a, "y"))?;
        acc.merge_with(other, |a, b| CombineFn::<&str, _, _>::merge(&c, a, b))?;
        assert_eq!(acc.phase(), AccumulatorPhase::Merged);

        let out = acc.extract_with(|a| CombineFn::<&str, _, _>::finish(&c, a))?;
        assert_eq!(out, 2);
        assert!(acc.is_extracted());
        Ok(())
    }

    #[test]
    fn extracted_accumulator_rejects_further_use() {
        let mut acc = Accumulator::new(1u64);
        acc.extract_with(|a| a).unwrap();
        assert!(matches!(acc.add_with(|a| *a += 1), Err(Error::AccumulatorExtracted)));
        assert!(matches!(acc.extract_with(|a| a), Err(Error::AccumulatorExtracted)));
        assert!(matches!(
            Accumulator::new(0u64).merge_with(acc, |a, b| *a += b),
            Err(Error::AccumulatorExtracted)
        ));
    }

    #[test]
    fn merge_accumulators_folds_all() {
        let total = CombineFn::<u8, u64, u64>::merge_accumulators(&Count, [1, 2, 3]);
        assert_eq!(total, 6);
    }
}
