//! Session log levels and message tracing.
//!
//! Structured logging goes through `tracing` throughout; the session-level
//! [`LogLevel`] only gates the expensive full-payload message traces.

use std::sync::atomic::{AtomicU8, Ordering};

use bayeux_protocol::Message;
use tracing::debug;

/// How chatty the session's own diagnostics are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Failures only.
    Error = 0,
    /// Warnings and failures.
    Warn = 1,
    /// Lifecycle events.
    Info = 2,
    /// Full message tracing on every incoming and outgoing message.
    Debug = 3,
}

#[derive(Debug)]
pub(crate) struct Diagnostics {
    level: AtomicU8,
}

impl Diagnostics {
    pub(crate) fn new() -> Self {
        Self {
            level: AtomicU8::new(LogLevel::Info as u8),
        }
    }

    pub(crate) fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    pub(crate) fn level(&self) -> LogLevel {
        match self.level.load(Ordering::Relaxed) {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }

    /// Emit the full message payload, only at [`LogLevel::Debug`].
    pub(crate) fn trace_message(&self, direction: &'static str, message: &Message) {
        if self.level() >= LogLevel::Debug {
            match serde_json::to_string(message) {
                Ok(json) => debug!(direction, message = %json, "bayeux message"),
                Err(_) => debug!(direction, channel = %message.channel, "bayeux message"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Debug > LogLevel::Info);
        assert!(LogLevel::Info > LogLevel::Warn);
        assert!(LogLevel::Warn > LogLevel::Error);
    }

    #[test]
    fn level_round_trips_through_the_atomic() {
        let diagnostics = Diagnostics::new();
        assert_eq!(diagnostics.level(), LogLevel::Info);
        diagnostics.set_level(LogLevel::Debug);
        assert_eq!(diagnostics.level(), LogLevel::Debug);
        diagnostics.set_level(LogLevel::Error);
        assert_eq!(diagnostics.level(), LogLevel::Error);
    }
}
