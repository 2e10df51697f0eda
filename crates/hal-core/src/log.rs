use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Receives `(level, message)` pairs from a backend module. User data is
/// whatever the closure captures.
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Per-module log destination.
///
/// Messages go to the installed callback when there is one, and to
/// `tracing` otherwise.
#[derive(Default)]
pub struct LogSink {
    callback: RwLock<Option<LogCallback>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or with `None`, remove) the callback.
    pub fn set_callback(&self, callback: Option<LogCallback>) {
        *self.callback.write() = callback;
    }

    pub fn has_callback(&self) -> bool {
        self.callback.read().is_some()
    }

    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        let callback = self.callback.read().clone();
        match callback {
            Some(cb) => cb(level, &message.to_string()),
            None => match level {
                LogLevel::Debug => tracing::debug!("{message}"),
                LogLevel::Info => tracing::info!("{message}"),
                LogLevel::Warn => tracing::warn!("{message}"),
                LogLevel::Error => tracing::error!("{message}"),
            },
        }
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message)
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("callback", &self.has_callback())
            .finish()
    }
}
