//! Per-tool execution statistics for a run

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

/// A single tracked tool execution
#[derive(Debug, Clone)]
pub struct ToolExecutionRecord {
    pub tool_name: String,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolStats {
    pub calls: usize,
    pub failures: usize,
    pub total_ms: u64,
    pub last_error: Option<String>,
}

/// Aggregate view over all tracked executions
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackerStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub average_duration_ms: u64,
    pub per_tool: BTreeMap<String, ToolStats>,
}

#[derive(Debug, Default)]
pub struct ExecutionTracker {
    records: Vec<ToolExecutionRecord>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one execution that began at `started`
    pub fn track(&mut self, tool_name: &str, started: Instant, success: bool, error: Option<&str>) {
        self.push(ToolExecutionRecord {
            tool_name: tool_name.to_string(),
            duration: started.elapsed(),
            success,
            error: error.map(str::to_string),
        });
    }

    pub fn push(&mut self, record: ToolExecutionRecord) {
        self.records.push(record);
    }

    /// Fraction of successful executions; 0.0 when nothing ran
    pub fn success_rate(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let ok = self.records.iter().filter(|r| r.success).count();
        ok as f64 / self.records.len() as f64
    }

    pub fn average_duration(&self) -> Duration {
        if self.records.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.records.iter().map(|r| r.duration).sum();
        total / self.records.len() as u32
    }

    pub fn stats(&self) -> TrackerStats {
        let mut per_tool: BTreeMap<String, ToolStats> = BTreeMap::new();
        for record in &self.records {
            let entry = per_tool.entry(record.tool_name.clone()).or_default();
            entry.calls += 1;
            entry.total_ms += record.duration.as_millis() as u64;
            if !record.success {
                entry.failures += 1;
                entry.last_error = record.error.clone();
            }
        }

        let succeeded = self.records.iter().filter(|r| r.success).count();
        TrackerStats {
            total: self.records.len(),
            succeeded,
            failed: self.records.len() - succeeded,
            success_rate: self.success_rate(),
            average_duration_ms: self.average_duration().as_millis() as u64,
            per_tool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, ms: u64, success: bool) -> ToolExecutionRecord {
        ToolExecutionRecord {
            tool_name: name.to_string(),
            duration: Duration::from_millis(ms),
            success,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn test_empty_tracker() {
        let tracker = ExecutionTracker::new();
        assert_eq!(tracker.success_rate(), 0.0);
        assert_eq!(tracker.average_duration(), Duration::ZERO);
        assert_eq!(tracker.stats().total, 0);
    }

    #[test]
    fn test_rate_and_average() {
        let mut tracker = ExecutionTracker::new();
        tracker.push(record("bash", 100, true));
        tracker.push(record("bash", 300, false));
        tracker.push(record("edit_file", 200, true));
        tracker.push(record("edit_file", 200, true));

        assert!((tracker.success_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(tracker.average_duration(), Duration::from_millis(200));

        let stats = tracker.stats();
        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.per_tool["bash"].calls, 2);
        assert_eq!(stats.per_tool["bash"].failures, 1);
        assert_eq!(stats.per_tool["bash"].last_error.as_deref(), Some("boom"));
        assert_eq!(stats.per_tool["edit_file"].total_ms, 400);
        assert_eq!(stats.per_tool["edit_file"].last_error, None);
    }

    #[test]
    fn test_track_measures_elapsed() {
        let mut tracker = ExecutionTracker::new();
        tracker.track("bash", Instant::now(), false, Some("exit 1"));
        let stats = tracker.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.per_tool["bash"].last_error.as_deref(), Some("exit 1"));
    }
}
