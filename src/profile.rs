//! Chrome Tracing collector for tick visualization.
//!
//! When enabled, every tick that switches into a context records a span into a
//! thread-local buffer. Buffers are collected and exported as JSON loadable in
//! chrome://tracing or ui.perfetto.dev.

use serde::Serialize;
use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A single complete ("ph": "X") trace event.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub name: &'static str,
    pub ph: &'static str,
    #[serde(rename = "ts")]
    pub start_us: u64,
    #[serde(rename = "dur")]
    pub duration_us: u64,
    pub pid: u32,
    pub tid: usize,
}

static ENABLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static TRACE_BUFFER: RefCell<Vec<TraceEvent>> = RefCell::new(Vec::with_capacity(1024));
}

lazy_static::lazy_static! {
    static ref GLOBAL_START: Instant = Instant::now();
    static ref EPOCH_START_US: u64 = chrono::Utc::now().timestamp_micros().max(0) as u64;
    static ref ALL_BUFFERS: Mutex<Vec<Vec<TraceEvent>>> = Mutex::new(Vec::new());
}

/// Starts recording tick spans.
pub fn enable() {
    // Pin the time base before the first event.
    lazy_static::initialize(&GLOBAL_START);
    lazy_static::initialize(&EPOCH_START_US);
    ENABLED.store(true, Ordering::Relaxed);
}

pub fn disable() {
    ENABLED.store(false, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Records a span of work. `tid` is the context id.
pub fn record_event(name: &'static str, tid: usize, start: Instant, duration: Duration) {
    let start_us = start.saturating_duration_since(*GLOBAL_START).as_micros() as u64 + *EPOCH_START_US;

    TRACE_BUFFER.with(|buf| {
        buf.borrow_mut().push(TraceEvent {
            name,
            ph: "X",
            start_us,
            duration_us: duration.as_micros() as u64,
            pid: 1,
            tid,
        });
    });
}

/// Moves this thread's buffer into the global list.
pub fn collect_local_trace() {
    TRACE_BUFFER.with(|buf| {
        let mut local_buf = buf.borrow_mut();
        if !local_buf.is_empty() {
            let mut global = ALL_BUFFERS.lock().unwrap_or_else(|e| e.into_inner());
            global.push(std::mem::take(&mut *local_buf));
        }
    });
}

/// Number of events collected so far (excluding uncollected thread buffers).
pub fn collected_events() -> usize {
    let buffers = ALL_BUFFERS.lock().unwrap_or_else(|e| e.into_inner());
    buffers.iter().map(Vec::len).sum()
}

/// Exports all collected trace events to a JSON array file.
///
/// Collects the calling thread's buffer first.
pub fn export_to_file(path: impl AsRef<Path>) -> std::io::Result<()> {
    collect_local_trace();

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let buffers = ALL_BUFFERS.lock().unwrap_or_else(|e| e.into_inner());
    let events: Vec<&TraceEvent> = buffers.iter().flatten().collect();
    serde_json::to_writer(&mut writer, &events)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// RAII span that records itself on drop, including on unwind.
pub struct TraceGuard {
    name: &'static str,
    tid: usize,
    start: Instant,
}

impl TraceGuard {
    pub fn new(name: &'static str, tid: usize) -> Self {
        Self {
            name,
            tid,
            start: Instant::now(),
        }
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        record_event(self.name, self.tid, self.start, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_records_and_exports() {
        {
            let _guard = TraceGuard::new("unit", 3);
        }
        collect_local_trace();
        assert!(collected_events() >= 1);

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trace.json");
        export_to_file(&path).expect("export");

        let text = std::fs::read_to_string(&path).expect("read trace");
        let events: Vec<serde_json::Value> = serde_json::from_str(&text).expect("json array");
        assert!(events.iter().any(|e| e["name"] == "unit" && e["tid"] == 3 && e["ph"] == "X"));
    }
}
