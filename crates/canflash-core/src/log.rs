//! User-facing log sink
//!
//! Sessions report progress and notable events through a [`LogSink`] passed
//! to their constructor. The default sink forwards to `tracing`.

use parking_lot::Mutex;

pub trait LogSink: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);

    /// Progress of a long-running operation, `done` of `total` units
    fn progress(&self, _done: usize, _total: usize) {}
}

/// Forwards every line to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }

    fn progress(&self, done: usize, total: usize) {
        tracing::trace!(done, total, "progress");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(LogLevel, String)>>,
    progress: Mutex<Vec<(usize, usize)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().clone()
    }

    pub fn progress_updates(&self) -> Vec<(usize, usize)> {
        self.progress.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|(_, line)| line.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn info(&self, message: &str) {
        self.lines.lock().push((LogLevel::Info, message.to_string()));
    }

    fn warn(&self, message: &str) {
        self.lines.lock().push((LogLevel::Warn, message.to_string()));
    }

    fn error(&self, message: &str) {
        self.lines.lock().push((LogLevel::Error, message.to_string()));
    }

    fn progress(&self, done: usize, total: usize) {
        self.progress.lock().push((done, total));
    }
}
