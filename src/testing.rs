//! Testing utilities for windowed operators.
//!
//! - [`TestStream`]: a script of elements and watermark advances replayed against a
//!   [`GroupByKeyOp`](crate::GroupByKeyOp)
//! - assertions that compare emitted panes independent of key order
//!
//! # Quick Start
//!
//! ```no_run
//! use ironpane::testing::*;
//! use ironpane::{FixedWindows, GroupByKeyOp, IntervalWindow, Sum, WindowingStrategy};
//!
//! #[test]
//! fn sums_per_window() -> anyhow::Result<()> {
//!     let strategy = WindowingStrategy::of(FixedWindows::of(10)?);
//!     let mut op = GroupByKeyOp::new("sum", strategy, Sum::<u64>::new())?;
//!
//!     let out = TestStream::new()
//!         .add_element("a", 1, 1)
//!         .add_element("a", 2, 12)
//!         .advance_watermark_to_infinity()
//!         .run(&mut op)?;
//!
//!     assert_panes_equal(
//!         &out.elements,
//!         vec![("a", IntervalWindow::new(0, 10), 1), ("a", IntervalWindow::new(10, 20), 2)],
//!     );
//!     assert_watermarks_advance(&out.watermarks);
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod stream;

pub use assertions::*;
pub use stream::*;
