use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use kubetap_types::{LogEntry, LogLevel};

use crate::classifier::LogClassifier;

/// Thread-safe ring buffer for log entries
#[derive(Clone)]
pub struct LogBuffer {
    /// Internal storage
    entries: Arc<RwLock<VecDeque<LogEntry>>>,

    /// Maximum capacity
    capacity: usize,

    /// Entries pushed since creation or the last clear
    pushed: Arc<AtomicU64>,
}

impl LogBuffer {
    /// Create a new log buffer with the given capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
            pushed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Push a new entry, evicting oldest if at capacity
    pub fn push(&self, entry: LogEntry) {
        self.pushed.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Get all entries
    pub fn all(&self) -> Vec<LogEntry> {
        self.entries.read().iter().cloned().collect()
    }

    /// Get entry count per classified level
    pub fn level_counts(&self) -> LevelCounts {
        let entries = self.entries.read();
        let mut counts = LevelCounts::default();

        for entry in entries.iter() {
            match LogClassifier::classify(&entry.message).level {
                LogLevel::Trace => counts.trace += 1,
                LogLevel::Debug => counts.debug += 1,
                LogLevel::Info => counts.info += 1,
                LogLevel::Warn => counts.warn += 1,
                LogLevel::Error => counts.error += 1,
                LogLevel::Unknown => counts.unknown += 1,
            }
        }

        counts
    }

    /// Total entry count
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Entries evicted because the buffer was full
    pub fn evicted(&self) -> u64 {
        self.pushed
            .load(Ordering::SeqCst)
            .saturating_sub(self.len() as u64)
    }

    /// Export all entries as `[label] message` lines
    pub fn export_raw(&self) -> String {
        self.entries
            .read()
            .iter()
            .map(|e| match &e.timestamp {
                Some(ts) => format!("{} [{}] {}", ts, e.label(), e.message),
                None => format!("[{}] {}", e.label(), e.message),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.write().clear();
        self.pushed.store(0, Ordering::SeqCst);
    }

    /// Get the last N entries
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let entries = self.entries.read();
        let start = entries.len().saturating_sub(n);
        entries.iter().skip(start).cloned().collect()
    }
}

/// Counts per log level
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LevelCounts {
    pub trace: usize,
    pub debug: usize,
    pub info: usize,
    pub warn: usize,
    pub error: usize,
    pub unknown: usize,
}

impl LevelCounts {
    pub fn total(&self) -> usize {
        self.trace + self.debug + self.info + self.warn + self.error + self.unknown
    }
}
