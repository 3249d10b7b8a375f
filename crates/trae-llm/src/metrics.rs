//! Injectable metrics sink
//!
//! Counters and value summaries are recorded through [`MetricsSink`] so that
//! callers choose where numbers go. Nothing here is global.

use std::collections::BTreeMap;

use parking_lot::Mutex;

pub trait MetricsSink: Send + Sync {
    /// Add `by` to the counter `name`
    fn increment(&self, name: &str, by: u64);

    /// Record one observation (e.g. a latency in milliseconds)
    fn observe(&self, name: &str, value: f64);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _by: u64) {}
    fn observe(&self, _name: &str, _value: f64) {}
}

/// Running summary of observed values
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    counters: BTreeMap<String, u64>,
    summaries: BTreeMap<String, Summary>,
}

/// Keeps counters and summaries in memory
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<Inner>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn summary(&self, name: &str) -> Option<Summary> {
        self.inner.lock().summaries.get(name).copied()
    }

    /// Snapshot of all counters, sorted by name
    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.inner.lock().counters.clone()
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.counters.clear();
        inner.summaries.clear();
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &str, by: u64) {
        *self.inner.lock().counters.entry(name.to_string()).or_insert(0) += by;
    }

    fn observe(&self, name: &str, value: f64) {
        self.inner
            .lock()
            .summaries
            .entry(name.to_string())
            .or_default()
            .record(value);
    }
}
