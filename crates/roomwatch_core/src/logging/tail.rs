//! Bounded tail buffer for external process output.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Keeps the last N lines written by a child process.
///
/// Cloning shares the same buffer, so reader tasks and the registry can
/// hold it at the same time.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    /// Append a line, dropping the oldest one when full.
    pub fn push(&self, line: &str, is_stderr: bool) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        let entry = if is_stderr {
            format!("[stderr] {}", line)
        } else {
            line.to_string()
        };
        lines.push_back(entry);
    }

    /// Snapshot of the buffered lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}
