use crate::logging::{LogEvent, LogFields, LogLevel};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type SharedMetrics = Arc<Mutex<ConsoleMetrics>>;

#[derive(Debug, Default, Clone)]
pub struct ConsoleMetrics {
    writes: u64,
    bytes_written: u64,
    flushes: u64,
    runs_flushed: u64,
    prompts: u64,
    lines_accepted: u64,
    beeps: u64,
    tasks_run: u64,
    task_failures: u64,
}

impl ConsoleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedMetrics {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn record_write(&mut self, bytes: usize) {
        self.writes = self.writes.saturating_add(1);
        self.bytes_written = self.bytes_written.saturating_add(bytes as u64);
    }

    pub fn record_flush(&mut self, runs: usize) {
        self.flushes = self.flushes.saturating_add(1);
        self.runs_flushed = self.runs_flushed.saturating_add(runs as u64);
    }

    pub fn record_prompt(&mut self) {
        self.prompts = self.prompts.saturating_add(1);
    }

    pub fn record_line(&mut self) {
        self.lines_accepted = self.lines_accepted.saturating_add(1);
    }

    pub fn record_beep(&mut self) {
        self.beeps = self.beeps.saturating_add(1);
    }

    pub fn record_task(&mut self, failed: bool) {
        self.tasks_run = self.tasks_run.saturating_add(1);
        if failed {
            self.task_failures = self.task_failures.saturating_add(1);
        }
    }

    pub fn snapshot(&self, uptime: Duration) -> MetricSnapshot {
        MetricSnapshot {
            uptime_ms: uptime.as_millis() as u64,
            writes: self.writes,
            bytes_written: self.bytes_written,
            flushes: self.flushes,
            runs_flushed: self.runs_flushed,
            prompts: self.prompts,
            lines_accepted: self.lines_accepted,
            beeps: self.beeps,
            tasks_run: self.tasks_run,
            task_failures: self.task_failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub uptime_ms: u64,
    pub writes: u64,
    pub bytes_written: u64,
    pub flushes: u64,
    pub runs_flushed: u64,
    pub prompts: u64,
    pub lines_accepted: u64,
    pub beeps: u64,
    pub tasks_run: u64,
    pub task_failures: u64,
}

impl MetricSnapshot {
    pub fn to_log_event(&self, target: &str) -> LogEvent {
        LogEvent::with_fields(
            LogLevel::Info,
            target.to_string(),
            "console_metrics".to_string(),
            self.as_fields(),
        )
    }

    pub fn as_fields(&self) -> LogFields {
        let mut map = LogFields::new();
        map.insert("uptime_ms".to_string(), json!(self.uptime_ms));
        map.insert("writes".to_string(), json!(self.writes));
        map.insert("bytes_written".to_string(), json!(self.bytes_written));
        map.insert("flushes".to_string(), json!(self.flushes));
        map.insert("runs_flushed".to_string(), json!(self.runs_flushed));
        map.insert("prompts".to_string(), json!(self.prompts));
        map.insert("lines_accepted".to_string(), json!(self.lines_accepted));
        map.insert("beeps".to_string(), json!(self.beeps));
        map.insert("tasks_run".to_string(), json!(self.tasks_run));
        map.insert("task_failures".to_string(), json!(self.task_failures));
        map
    }
}

/// Apply `update` to shared metrics if present; a poisoned handle is skipped.
pub(crate) fn record(metrics: Option<&SharedMetrics>, update: impl FnOnce(&mut ConsoleMetrics)) {
    if let Some(metrics) = metrics {
        if let Ok(mut guard) = metrics.lock() {
            update(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_carries_counters() {
        let mut metrics = ConsoleMetrics::new();
        metrics.record_write(4);
        metrics.record_write(6);
        metrics.record_flush(2);
        metrics.record_task(true);
        metrics.record_task(false);

        let snap = metrics.snapshot(Duration::from_millis(1500));
        assert_eq!(snap.writes, 2);
        assert_eq!(snap.bytes_written, 10);
        assert_eq!(snap.runs_flushed, 2);
        assert_eq!(snap.tasks_run, 2);
        assert_eq!(snap.task_failures, 1);

        let event = snap.to_log_event("console::metrics");
        assert_eq!(event.message, "console_metrics");
        assert_eq!(event.fields["uptime_ms"], json!(1500));
    }
}
