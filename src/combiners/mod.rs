//! Built-in combine functions.
//!
//! Reusable [`CombineFn`](crate::CombineFn) implementations usable both in the batch
//! [`WindowedCombiner`](crate::WindowedCombiner) path and in the streaming
//! [`GroupByKeyOp`](crate::GroupByKeyOp):
//!
//! - [`Sum<T>`] -- sum of values.
//! - [`Min<T>`] / [`Max<T>`] -- smallest / largest value (`None` for an empty window).
//! - [`AverageF64`] -- mean as `f64`.
//! - [`DistinctCount<T>`] -- number of distinct values.
//! - [`TopK<T>`] -- the K largest values, descending.
//! - [`ToList<T>`] -- every value, for plain group-by-key.
//!
//! Each combiner documents its accumulator type (`A`) and output type (`O`). All
//! accumulators are serializable so window state can be encoded.
//!
//! # Example
//! ```
//! use ironpane::CombineFn;
//! use ironpane::combiners::TopK;
//!
//! let top = TopK::<u32>::new(2);
//! let mut a = top.create();
//! for v in [3, 7, 5] {
//!     top.add_input(&mut a, v);
//! }
//! assert_eq!(top.finish(a), vec![7, 5]);
//! ```

mod basic;
mod collect;
mod distinct;
mod statistical;
mod topk;

pub use basic::{Max, Min, Sum};
pub use collect::ToList;
pub use distinct::DistinctCount;
pub use statistical::AverageF64;
pub use topk::TopK;
