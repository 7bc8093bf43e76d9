//! Pluggable logging for the engine.
//!
//! The loops report what they do through a [`Logger`] so the library never
//! decides on an output format itself. [`TracingLogger`] (the default) hands
//! every message to `tracing`; [`NoOpLogger`] drops everything.

/// Log levels for engine events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Logger trait for engine events
///
/// Library users can implement this trait to handle logging however they prefer.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Default no-op logger that discards all messages
#[derive(Debug, Default, Clone)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Forwards engine messages to the `tracing` macros under the `gothic` target.
#[derive(Debug, Default, Clone)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "gothic", "{message}"),
            LogLevel::Info => tracing::info!(target: "gothic", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "gothic", "{message}"),
            LogLevel::Error => tracing::error!(target: "gothic", "{message}"),
        }
    }
}
