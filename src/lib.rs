//! # Ironpane
//!
//! The **windowed group-by-key and combine core** of a Beam-style data processing engine.
//! Ironpane takes keyed, timestamped elements, assigns them to event-time windows, folds
//! them through a [`CombineFn`], and emits panes when triggers and watermarks say so.
//!
//! ## Key Features
//!
//! - **Window functions** - fixed, sliding, sessions (merging) and the global window
//! - **Combine contract** - `create` / `add_input` / `merge` / `finish`, with built-in
//!   combiners (Sum, Min, Max, Count, Average, DistinctCount, TopK, ToList)
//! - **Streaming operator** - per-key window state, event-time and processing-time timers,
//!   watermark holds, allowed lateness, and garbage collection of expired windows
//! - **Triggers and panes** - early, on-time and late firings with accumulating or
//!   discarding panes and full [`PaneInfo`] bookkeeping
//! - **Batch path** - the same combine over a bounded keyed batch, sequential or parallel
//! - **Sharded execution** - keys hashed onto operator shards run in parallel with rayon
//! - **Coders** - compact, order-preserving encodings for instants, windows and values
//! - **Checkpointing and metrics** - optional via feature flags
//!
//! ## Quick Start
//!
//! ```
//! use ironpane::*;
//!
//! # fn main() -> Result<()> {
//! let strategy = WindowingStrategy::of(Sessions::with_gap(10)?)
//!     .with_allowed_lateness(5)
//!     .with_timestamp_combiner(TimestampCombiner::Earliest);
//! let mut op = GroupByKeyOp::new("clicks", strategy, Count)?;
//! let mut out = CollectingEmitter::default();
//!
//! for ts in [0, 4, 30] {
//!     let click = WindowedValue::new("click", ts, Vec::new(), PaneInfo::NO_FIRING);
//!     op.process_element(KeyedWorkItem::elements("user-1", [click]), &mut out)?;
//! }
//! op.process_watermark(100, &mut out)?;
//!
//! let counts: Vec<_> = out.elements.iter().map(|o| (o.windows()[0], o.value().1)).collect();
//! assert_eq!(counts, vec![(IntervalWindow::new(0, 14), 2), (IntervalWindow::new(30, 40), 1)]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Windows and window functions
//!
//! A [`BoundedWindow`] is a slice of event time with a maximum timestamp. A [`WindowFn`]
//! assigns elements to windows and, for [`Sessions`], merges intersecting windows.
//!
//! ### Windowing strategy
//!
//! [`WindowingStrategy`] bundles the window function with everything that decides *when*
//! and *how* results come out: the [`Trigger`], [`AccumulationMode`], [`TimestampCombiner`],
//! allowed lateness, and closing behavior.
//!
//! ### Operators
//!
//! - [`GroupByKeyOp`] - streaming group-by-key/combine for the keys routed to it
//! - [`ShardedExecutor`] - many operators over disjoint key sets, in parallel
//! - [`WindowedCombiner`] / [`CombinePhases`] - the batch combine
//!
//! ## Execution
//!
//! An operator is driven by three inputs: [`KeyedWorkItem`]s, watermarks, and timers. Its
//! output is `WindowedValue<(K, O), W>` carrying a [`PaneInfo`], plus an output watermark
//! that never passes a pending result.

pub mod batch;
pub mod coder;
pub mod combine;
pub mod combiners;
pub mod error;
pub mod executor;
pub mod group_by_key;
pub mod keyed_work_item;
pub mod pane;
pub mod reduce_fn;
pub mod state;
pub mod strategy;
pub mod testing;
pub mod time;
pub mod timers;
pub mod timestamp;
pub mod trigger;
pub mod watermark;
pub mod window;
pub mod windowed_value;
pub mod windowing;

#[cfg(feature = "checkpointing")]
pub mod checkpoint;
#[cfg(feature = "metrics")]
pub mod metrics;

pub use batch::{CombinePhases, WindowedCombiner};
pub use coder::{Coder, InstantCoder, IntervalWindowCoder, PostcardCoder, WindowedValueCoder};
pub use combine::{Accumulator, AccumulatorPhase, CombineFn, Count, Data};
pub use combiners::{AverageF64, DistinctCount, Max, Min, Sum, ToList, TopK};
pub use error::{Error, Result};
pub use executor::{ExecMode, ExecutorConfig, ShardOutput, ShardedExecutor};
pub use group_by_key::{CollectingEmitter, GroupByKeyOp, OpEmitter, OperatorSnapshot};
pub use keyed_work_item::KeyedWorkItem;
pub use pane::{PaneInfo, Timing};
pub use reduce_fn::{KeyedOutput, ReduceFnRunner, ReduceStats};
pub use state::{EncodedStateStore, InMemoryStateStore, StateStore, WindowState};
pub use strategy::{AccumulationMode, ClosingBehavior, OnTimeBehavior, WindowingStrategy};
pub use time::{DurationMs, TIMESTAMP_MAX_VALUE, TIMESTAMP_MIN_VALUE, TimestampMs};
pub use timers::{KeyedTimer, TimeDomain, TimerData, TimerKind, TimerService};
pub use timestamp::TimestampCombiner;
pub use trigger::{Trigger, TriggerState};
pub use watermark::{SourceWatermarks, WatermarkTracker};
pub use window::{BoundedWindow, GlobalWindow, IntervalWindow};
pub use windowed_value::WindowedValue;
pub use windowing::{FixedWindows, GlobalWindows, Sessions, SlidingWindows, WindowFn, WindowMapping};
