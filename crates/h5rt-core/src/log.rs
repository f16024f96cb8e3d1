//! Structured lifecycle log and diagnostic sinks.
//!
//! Every state transition, subsystem init/term step, callback invocation and
//! shutdown outcome is recorded as a [`LifecycleLogRecord`]. Records carry a
//! monotonic decision id and a correlation `trace_id` of the form
//! `h5rt::<event>::<id:016x>`, and serialize to one JSON object per line.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Retained records before the oldest are evicted.
pub const LOG_CAPACITY: usize = 1024;

/// Lifecycle log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    /// Severity level.
    pub level: LogLevel,
    /// Event kind (`open`, `init_subsystem`, `sweep`, `atclose`, ...).
    pub event: &'static str,
    /// Subsystem short name, when the event concerns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsystem: Option<&'static str>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
}

impl LifecycleLogRecord {
    /// Serialize as a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Bounded in-memory lifecycle log.
#[derive(Debug)]
pub struct LifecycleLog {
    next_decision_id: u64,
    records: VecDeque<LifecycleLogRecord>,
    dropped: u64,
}

impl Default for LifecycleLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_decision_id: 1,
            records: VecDeque::new(),
            dropped: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    /// Append a record and return its decision id.
    pub fn record(
        &mut self,
        level: LogLevel,
        event: &'static str,
        subsystem: Option<&'static str>,
        outcome: &'static str,
        details: impl Into<String>,
    ) -> u64 {
        let decision_id = self.next_id();
        let trace_id = format!("h5rt::{}::{:016x}", event, decision_id);
        if self.records.len() == LOG_CAPACITY {
            self.records.pop_front();
            self.dropped = self.dropped.saturating_add(1);
        }
        self.records.push_back(LifecycleLogRecord {
            decision_id,
            trace_id,
            level,
            event,
            subsystem,
            outcome,
            details: details.into(),
        });
        decision_id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records evicted because the log was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<LifecycleLogRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<LifecycleLogRecord> {
        self.records.drain(..).collect()
    }

    /// Write every retained record as JSONL.
    pub fn write_jsonl(&self, out: &mut dyn Write) -> io::Result<()> {
        for record in &self.records {
            let line = record.to_jsonl().map_err(io::Error::other)?;
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// Destination for human-readable diagnostics (version warnings, shutdown
/// divergence reports, ignored debug flags).
#[derive(Debug, Clone, Default)]
pub enum Diagnostics {
    /// Process standard error.
    #[default]
    Stderr,
    /// In-memory capture, for tests and embedders.
    Capture(Arc<Mutex<Vec<u8>>>),
}

impl Diagnostics {
    /// Create a capturing sink and return the shared buffer alongside it.
    #[must_use]
    pub fn capture() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        (Self::Capture(Arc::clone(&buf)), buf)
    }

    /// Run `f` against the sink. Write errors on diagnostics are dropped.
    pub fn with_writer<R>(&self, f: impl FnOnce(&mut dyn Write) -> R) -> R {
        match self {
            Self::Stderr => {
                let stderr = io::stderr();
                let mut lock = stderr.lock();
                f(&mut lock)
            }
            Self::Capture(buf) => {
                let mut guard = buf.lock();
                f(&mut *guard)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_carry_trace_and_decision_ids() {
        let mut log = LifecycleLog::new();
        let a = log.record(LogLevel::Info, "open", None, "ok", "");
        let b = log.record(LogLevel::Debug, "init_subsystem", Some("T"), "ok", "phase=full");
        assert_eq!(a + 1, b);
        let records = log.snapshot();
        assert_eq!(records[0].trace_id, format!("h5rt::open::{:016x}", a));
        assert_eq!(records[1].subsystem, Some("T"));
        assert!(records.iter().all(|r| r.trace_id.starts_with("h5rt::")));
    }

    #[test]
    fn log_is_bounded() {
        let mut log = LifecycleLog::new();
        for _ in 0..LOG_CAPACITY + 5 {
            log.record(LogLevel::Trace, "sweep", None, "pending", "");
        }
        assert_eq!(log.len(), LOG_CAPACITY);
        assert_eq!(log.dropped(), 5);
        assert_eq!(log.snapshot()[0].decision_id, 6);
    }

    #[test]
    fn jsonl_lines_parse_back() {
        let mut log = LifecycleLog::new();
        log.record(LogLevel::Warn, "shutdown", None, "diverged", "sweeps=100");
        log.record(LogLevel::Info, "close", Some("FL"), "ok", "");
        let mut out = Vec::new();
        log.write_jsonl(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["level"], "warn");
        assert_eq!(first["outcome"], "diverged");
        assert!(first.get("subsystem").is_none());
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["subsystem"], "FL");
    }

    #[test]
    fn drain_empties_log() {
        let mut log = LifecycleLog::new();
        log.record(LogLevel::Info, "open", None, "ok", "");
        assert_eq!(log.drain().len(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn capture_sink_collects_output() {
        let (diag, buf) = Diagnostics::capture();
        diag.with_writer(|w| writeln!(w, "hello").unwrap());
        assert_eq!(&*buf.lock(), b"hello\n");
    }
}
