use chrono::{DateTime, Local};
use std::collections::VecDeque;

use crate::protocol::LogLevel;

/// One line in the panel's console view
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub content: String,
}

impl LogEntry {
    /// `[HH:MM:SS] content`
    pub fn render(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.content)
    }
}

/// Bounded, in-memory console view. Oldest entries go first once full.
#[derive(Debug, Clone)]
pub struct LogView {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
}

impl LogView {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn push(&mut self, level: LogLevel, content: impl Into<String>) {
        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            content: content.into(),
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn with_level(&self, level: LogLevel) -> Vec<&LogEntry> {
        self.entries.iter().filter(|e| e.level == level).collect()
    }
}

impl Default for LogView {
    fn default() -> Self {
        Self::new(500)
    }
}
