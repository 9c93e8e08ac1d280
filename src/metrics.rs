//! Execution metrics for the windowing operators.
//!
//! Operators report what happened to their input through a shared [`MetricsCollector`]:
//! how many elements were folded into windows, how many arrived too late, how many panes
//! fired, and how much window state was merged or purged. Custom metrics can be registered
//! next to the built-in counters.
//!
//! # Example
//!
//! ```no_run
//! use ironpane::metrics::{MetricsCollector, ELEMENTS_ADDED};
//!
//! # fn main() -> anyhow::Result<()> {
//! let metrics = MetricsCollector::new();
//! metrics.increment_counter(ELEMENTS_ADDED, 3);
//! assert_eq!(metrics.counter(ELEMENTS_ADDED), 3);
//! metrics.save_to_file("metrics.json")?;
//! # Ok(())
//! # }
//! ```

use crate::reduce_fn::ReduceStats;
use crate::time::TimestampMs;
use anyhow::Result;
use serde_json::{Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const ELEMENTS_ADDED: &str = "elements_added";
pub const LATE_ELEMENTS_DROPPED: &str = "late_elements_dropped";
pub const CLOSED_WINDOW_DROPS: &str = "closed_window_drops";
pub const PANES_EMITTED: &str = "panes_emitted";
pub const WINDOWS_MERGED: &str = "windows_merged";
pub const WINDOWS_PURGED: &str = "windows_purged";
pub const TIMERS_FIRED: &str = "timers_fired";
pub const OUTPUT_WATERMARK: &str = "output_watermark";

/// Trait for custom metrics.
pub trait Metric: Send + Sync + Any {
    /// The name of this metric (e.g., `elements_added`).
    fn name(&self) -> &str;

    /// The current value of this metric as a JSON value.
    fn value(&self) -> Value;

    /// Optional description of what this metric measures.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Cast to Any for downcasting.
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Thread-safe container of named metrics. Clones share the same metrics, so one
/// collector can be handed to every shard of an executor.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<HashMap<String, Box<dyn Metric>>>>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Box<dyn Metric>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a custom metric, replacing any metric with the same name.
    pub fn register(&self, metric: Box<dyn Metric>) {
        self.lock().insert(metric.name().to_string(), metric);
    }

    /// Add `value` to a counter, creating it on first use.
    ///
    /// A metric of another type registered under `name` is left untouched.
    pub fn increment_counter(&self, name: &str, value: u64) {
        let mut metrics = self.lock();
        let metric = metrics
            .entry(name.to_string())
            .or_insert_with(|| Box::new(CounterMetric::new(name)));
        if let Some(counter) = metric.as_any_mut().downcast_mut::<CounterMetric>() {
            counter.count += value;
        }
    }

    pub fn set_counter(&self, name: &str, value: u64) {
        self.lock()
            .insert(name.to_string(), Box::new(CounterMetric::with_value(name, value)));
    }

    /// Current value of a counter; 0 if it was never incremented.
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.lock()
            .get(name)
            .and_then(|m| m.as_any().downcast_ref::<CounterMetric>())
            .map_or(0, |c| c.count)
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.lock()
            .insert(name.to_string(), Box::new(GaugeMetric::new(name, value)));
    }

    /// Fold the counters of one operator call into the built-in metrics.
    pub fn record_stats(&self, stats: &ReduceStats) {
        for (name, value) in [
            (ELEMENTS_ADDED, stats.elements_added),
            (LATE_ELEMENTS_DROPPED, stats.late_elements_dropped),
            (CLOSED_WINDOW_DROPS, stats.closed_window_drops),
            (PANES_EMITTED, stats.panes_emitted),
            (WINDOWS_MERGED, stats.windows_merged),
            (WINDOWS_PURGED, stats.windows_purged),
            (TIMERS_FIRED, stats.timers_fired),
        ] {
            if value > 0 {
                self.increment_counter(name, value);
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_output_watermark(&self, watermark: TimestampMs) {
        self.set_gauge(OUTPUT_WATERMARK, watermark as f64);
    }

    /// Get all metrics as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let metrics = self.lock();
        let mut metrics_json = serde_json::Map::new();
        for (name, metric) in metrics.iter() {
            let mut metric_obj = serde_json::Map::new();
            metric_obj.insert("value".to_string(), metric.value());
            if let Some(desc) = metric.description() {
                metric_obj.insert("description".to_string(), json!(desc));
            }
            metrics_json.insert(name.clone(), Value::Object(metric_obj));
        }
        drop(metrics);
        json!(metrics_json)
    }

    /// Save all metrics to a JSON file.
    ///
    /// # Errors
    ///
    /// If the file cannot be created or written to.
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let json = self.to_json();
        let mut file = File::create(path)?;
        let formatted = serde_json::to_string_pretty(&json)?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }

    /// Get a snapshot of all metric names and values.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock()
            .iter()
            .map(|(name, metric)| (name.clone(), metric.value()))
            .collect()
    }
}

// ========== Built-in Metrics ==========

/// A monotonically increasing count.
pub struct CounterMetric {
    name: String,
    count: u64,
}

impl CounterMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), count: 0 }
    }

    pub fn with_value(name: impl Into<String>, count: u64) -> Self {
        Self { name: name.into(), count }
    }
}

impl Metric for CounterMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.count)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A gauge metric that holds a single numeric value.
pub struct GaugeMetric {
    name: String,
    value: f64,
    description: Option<String>,
}

impl GaugeMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self { name: name.into(), value, description: None }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Metric for GaugeMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.value)
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
