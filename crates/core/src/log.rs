use crate::types::{LogEntry, LogLevel};
use std::collections::VecDeque;
use std::io::{self, Write};

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    pub source: Option<String>,
    pub text: Option<String>,
}

impl LogFilter {
    pub fn level(level: LogLevel) -> Self {
        Self {
            level: Some(level),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.level.is_none() && self.source.is_none() && self.text.is_none()
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(level) = self.level {
            if entry.level != level {
                return false;
            }
        }
        if let Some(ref source) = self.source {
            if !entry.source.eq_ignore_ascii_case(source) {
                return false;
            }
        }
        match self.text.as_deref().filter(|t| !t.is_empty()) {
            Some(text) => {
                let needle = text.to_lowercase();
                entry.message.to_lowercase().contains(&needle)
                    || entry.source.to_lowercase().contains(&needle)
            }
            None => true,
        }
    }
}

/// Eviction is strict FIFO regardless of level.
#[derive(Debug, Clone)]
pub struct NotificationLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    next_id: u64,
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl NotificationLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
            next_id: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends `entry`, assigning its id. Timestamps are clamped so append
    /// order and timestamp order agree.
    pub fn append(&mut self, mut entry: LogEntry) -> u64 {
        entry.id = self.next_id;
        self.next_id += 1;
        if let Some(last) = self.entries.back() {
            if entry.timestamp < last.timestamp {
                entry.timestamp = last.timestamp;
            }
        }
        let id = entry.id;
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        id
    }

    pub fn push(
        &mut self,
        level: LogLevel,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> u64 {
        self.append(LogEntry::new(level, source, message))
    }

    pub fn info(&mut self, source: &str, message: impl Into<String>) -> u64 {
        self.push(LogLevel::Info, source, message)
    }

    pub fn warn(&mut self, source: &str, message: impl Into<String>) -> u64 {
        self.push(LogLevel::Warning, source, message)
    }

    pub fn error(&mut self, source: &str, message: impl Into<String>) -> u64 {
        self.push(LogLevel::Error, source, message)
    }

    pub fn debug(&mut self, source: &str, message: impl Into<String>) -> u64 {
        self.push(LogLevel::Debug, source, message)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogEntry> + '_ {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn filter<'a>(&'a self, filter: &'a LogFilter) -> impl Iterator<Item = &'a LogEntry> + 'a {
        self.entries.iter().filter(move |entry| filter.matches(entry))
    }

    pub fn filter_by<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a LogEntry> + 'a
    where
        P: Fn(&LogEntry) -> bool + 'a,
    {
        self.entries.iter().filter(move |entry| predicate(entry))
    }

    pub fn count_level(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn export<W: Write>(&self, filter: &LogFilter, mut writer: W) -> io::Result<usize> {
        let mut written = 0;
        for entry in self.filter(filter) {
            writeln!(writer, "{}", entry.format_line())?;
            written += 1;
        }
        writer.flush()?;
        Ok(written)
    }
}
