//! Log sinks for channel diagnostics
//!
//! The channel never reaches for a process-wide logger. It writes to a
//! [`LogSink`] handed in at construction:
//! - [`TracingSink`] forwards every record to `tracing` (the default)
//! - [`LogStore`] keeps a bounded in-memory history for display or
//!   inspection and forwards to `tracing` as well

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default number of entries retained by a [`LogStore`]
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single stored log record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Module or component that produced the record
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Destination for diagnostic records
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, source: &str, message: &str, details: Option<Value>);

    fn debug(&self, source: &str, message: &str) {
        self.log(LogLevel::Debug, source, message, None);
    }

    fn info(&self, source: &str, message: &str) {
        self.log(LogLevel::Info, source, message, None);
    }

    fn warn(&self, source: &str, message: &str) {
        self.log(LogLevel::Warn, source, message, None);
    }

    fn error(&self, source: &str, message: &str, details: Option<Value>) {
        self.log(LogLevel::Error, source, message, details);
    }
}

/// Sink that forwards records to the `tracing` subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, source: &str, message: &str, details: Option<Value>) {
        emit_tracing(level, source, message, details.as_ref());
    }
}

fn emit_tracing(level: LogLevel, source: &str, message: &str, details: Option<&Value>) {
    let details = details.map(|d| d.to_string()).unwrap_or_default();
    match level {
        LogLevel::Debug => tracing::debug!(source, details = %details, "{}", message),
        LogLevel::Info => tracing::info!(source, details = %details, "{}", message),
        LogLevel::Warn => tracing::warn!(source, details = %details, "{}", message),
        LogLevel::Error | LogLevel::Fatal => {
            tracing::error!(source, level = %level, details = %details, "{}", message)
        }
    }
}

/// Bounded in-memory log history
///
/// Oldest entries are evicted once `max_entries` is exceeded.
pub struct LogStore {
    inner: RwLock<StoreInner>,
    forward: bool,
}

struct StoreInner {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
}

impl LogStore {
    /// Create a store that also forwards every record to `tracing`
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                entries: VecDeque::new(),
                max_entries,
            }),
            forward: true,
        }
    }

    /// Create a store that only records, without forwarding
    pub fn silent(max_entries: usize) -> Self {
        Self {
            forward: false,
            ..Self::new(max_entries)
        }
    }

    pub fn add(&self, level: LogLevel, source: &str, message: &str, details: Option<Value>) {
        let entry = LogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            source: source.to_string(),
            message: message.to_string(),
            details,
        };

        let mut inner = self.inner.write();
        inner.entries.push_back(entry);
        while inner.entries.len() > inner.max_entries {
            inner.entries.pop_front();
        }
    }

    /// Snapshot of the retained entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.read().entries.iter().cloned().collect()
    }

    /// Entries at or above `level`
    pub fn entries_at_least(&self, level: LogLevel) -> Vec<LogEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|e| e.level >= level)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn clear(&self) {
        self.inner.write().entries.clear();
    }

    /// Change the retention limit, evicting immediately if needed
    pub fn set_max_entries(&self, max: usize) {
        let mut inner = self.inner.write();
        inner.max_entries = max;
        while inner.entries.len() > max {
            inner.entries.pop_front();
        }
    }

    pub fn max_entries(&self) -> usize {
        self.inner.read().max_entries
    }
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl LogSink for LogStore {
    fn log(&self, level: LogLevel, source: &str, message: &str, details: Option<Value>) {
        if self.forward {
            emit_tracing(level, source, message, details.as_ref());
        }
        self.add(level, source, message, details);
    }
}
