//! Run events
//!
//! Every lifecycle line a run produces is a [`RunEvent`] carrying the severity
//! chosen by the component that raised it. Markers are only added when an
//! event is rendered for humans.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Severity attached by the raiser of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Success,
    Warn,
    Error,
    /// Data loss or other damage the operator must act on
    Critical,
}

impl Severity {
    /// Marker used when rendering for humans
    pub fn marker(&self) -> &'static str {
        match self {
            Severity::Debug => "·",
            Severity::Info => "ℹ️",
            Severity::Success => "✅",
            Severity::Warn => "⚠️",
            Severity::Error => "❌",
            Severity::Critical => "🔥",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Info => write!(f, "info"),
            Severity::Success => write!(f, "success"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One line of the run's log stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Offset of this event within its log
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

impl RunEvent {
    /// Human-readable line with a severity marker
    pub fn render(&self) -> String {
        format!(
            "{} {} {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.severity.marker(),
            self.message
        )
    }
}

/// Append-only, offset-addressable event log shared between a run and its readers.
///
/// Cloning is cheap; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<RwLock<Vec<RunEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and mirror it to `tracing`
    pub fn emit(&self, severity: Severity, message: impl Into<String>) -> u64 {
        let message = message.into();
        match severity {
            Severity::Debug => tracing::debug!("{}", message),
            Severity::Info | Severity::Success => tracing::info!("{}", message),
            Severity::Warn => tracing::warn!("{}", message),
            Severity::Error | Severity::Critical => tracing::error!("{}", message),
        }

        let mut events = self.inner.write();
        let seq = events.len() as u64;
        events.push(RunEvent {
            seq,
            timestamp: Utc::now(),
            severity,
            message,
        });
        seq
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(Severity::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(Severity::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(Severity::Success, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(Severity::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(Severity::Error, message);
    }

    pub fn critical(&self, message: impl Into<String>) {
        self.emit(Severity::Critical, message);
    }

    /// Events at or after `offset`
    pub fn since(&self, offset: u64) -> Vec<RunEvent> {
        let events = self.inner.read();
        let start = (offset as usize).min(events.len());
        events[start..].to_vec()
    }

    /// Offset the next event will receive
    pub fn len(&self) -> u64 {
        self.inner.read().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
