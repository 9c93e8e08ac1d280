//! Watermarks coming from several upstream sources.

use crate::error::{Error, Result};
use crate::time::{TIMESTAMP_MIN_VALUE, TimestampMs};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::trace;

/// Combines per-source watermarks into one input watermark.
///
/// Each source's watermark only moves forward; the combined watermark is the minimum over
/// all registered sources, so it only moves forward too.
#[derive(Clone, Debug)]
pub struct WatermarkTracker<S> {
    sources: HashMap<S, TimestampMs>,
    combined: TimestampMs,
}

impl<S: Clone + Debug + Eq + Hash> Default for WatermarkTracker<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Clone + Debug + Eq + Hash> WatermarkTracker<S> {
    pub fn new() -> Self {
        Self { sources: HashMap::new(), combined: TIMESTAMP_MIN_VALUE }
    }

    /// Track `sources`, each starting at the minimum timestamp.
    pub fn with_sources(sources: impl IntoIterator<Item = S>) -> Self {
        let mut t = Self::new();
        for s in sources {
            t.register(s);
        }
        t
    }

    pub fn register(&mut self, source: S) {
        self.sources.entry(source).or_insert(TIMESTAMP_MIN_VALUE);
    }

    /// Record `watermark` for `source`; returns the combined watermark if it advanced.
    ///
    /// Unknown sources are an error: a watermark from a source that was never registered
    /// would otherwise let the combined watermark skip past data still in flight.
    pub fn update(&mut self, source: &S, watermark: TimestampMs) -> Result<Option<TimestampMs>> {
        let current = self.sources.get_mut(source).ok_or_else(|| {
            Error::WatermarkInvariant(format!("watermark from unregistered source {source:?}"))
        })?;
        if watermark <= *current {
            trace!(?source, current = *current, watermark, "stale source watermark");
            return Ok(None);
        }
        *current = watermark;
        let combined = self.sources.values().copied().min().unwrap_or(TIMESTAMP_MIN_VALUE);
        if combined > self.combined {
            self.combined = combined;
            Ok(Some(combined))
        } else {
            Ok(None)
        }
    }

    pub fn combined(&self) -> TimestampMs {
        self.combined
    }

    pub fn source(&self, source: &S) -> Option<TimestampMs> {
        self.sources.get(source).copied()
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Every source with its last watermark, in no particular order.
    pub fn snapshot(&self) -> Vec<(S, TimestampMs)> {
        self.sources.iter().map(|(s, wm)| (s.clone(), *wm)).collect()
    }

    /// Rebuild a tracker from [`snapshot`](Self::snapshot) output.
    pub fn restore(sources: impl IntoIterator<Item = (S, TimestampMs)>) -> Self {
        let sources: HashMap<S, TimestampMs> = sources.into_iter().collect();
        let combined = sources.values().copied().min().unwrap_or(TIMESTAMP_MIN_VALUE);
        Self { sources, combined }
    }
}

/// Low and high watermarks of a set of workers plus their synchronized processing time.
///
/// `low` is the slowest worker, `high` the fastest; `low <= high` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceWatermarks {
    low: TimestampMs,
    high: TimestampMs,
    synchronized_processing_time: Option<TimestampMs>,
}

impl Default for SourceWatermarks {
    fn default() -> Self {
        Self {
            low: TIMESTAMP_MIN_VALUE,
            high: TIMESTAMP_MIN_VALUE,
            synchronized_processing_time: None,
        }
    }
}

impl SourceWatermarks {
    pub fn new(low: TimestampMs, high: TimestampMs) -> Result<Self> {
        check_order(low, high)?;
        Ok(Self { low, high, synchronized_processing_time: None })
    }

    pub fn low(&self) -> TimestampMs {
        self.low
    }

    pub fn high(&self) -> TimestampMs {
        self.high
    }

    pub fn synchronized_processing_time(&self) -> Option<TimestampMs> {
        self.synchronized_processing_time
    }

    /// Move both watermarks forward; each keeps its previous value if the new one is behind.
    pub fn advance(&mut self, low: TimestampMs, high: TimestampMs) -> Result<()> {
        let low = self.low.max(low);
        let high = self.high.max(high);
        check_order(low, high)?;
        self.low = low;
        self.high = high;
        Ok(())
    }

    /// Synchronized processing time must strictly increase.
    pub fn advance_processing_time(&mut self, now: TimestampMs) -> Result<()> {
        if let Some(prev) = self.synchronized_processing_time.filter(|prev| now <= *prev) {
            return Err(Error::WatermarkInvariant(format!(
                "synchronized processing time must advance: {now} after {prev}"
            )));
        }
        self.synchronized_processing_time = Some(now);
        Ok(())
    }
}

fn check_order(low: TimestampMs, high: TimestampMs) -> Result<()> {
    if low > high {
        return Err(Error::WatermarkInvariant(format!(
            "low watermark {low} is ahead of high watermark {high}"
        )));
    }
    Ok(())
}
