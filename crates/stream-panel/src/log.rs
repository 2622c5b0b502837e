//! Bounded, in-memory activity log shown by the control panel.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
pub use stream_proto::phase::Severity;

pub const LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub severity: Severity,
    pub message: String,
}

impl LogEntry {
    pub fn time_label(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

/// FIFO of the most recent [`LOG_CAPACITY`] entries.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl LogBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("panel log [{:?}] {}", severity, message);
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: Local::now(),
            severity,
            message,
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogEntry> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_most_recent_entries() {
        let mut log = LogBuffer::default();
        for i in 0..130 {
            log.push(Severity::Info, format!("line {}", i));
        }
        assert_eq!(log.len(), LOG_CAPACITY);
        assert_eq!(log.iter().next().unwrap().message, "line 30");
        assert_eq!(log.last().unwrap().message, "line 129");
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut log = LogBuffer::with_capacity(2);
        log.push(Severity::Error, "a");
        log.push(Severity::Success, "b");
        log.push(Severity::Warning, "c");
        assert_eq!(
            log.iter().map(|e| e.message.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
        log.clear();
        assert!(log.is_empty());
    }
}
