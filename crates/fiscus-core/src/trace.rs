//! Out-of-band error and check-in capture.
//!
//! The queue core reports structured failures and cron tick outcomes through
//! this sink rather than panicking or returning them to callers. The default
//! implementation forwards to `tracing`; deployments wire a real APM client
//! behind the same trait.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Event severity, mirroring the worker's retry-level semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Outcome marker for a scheduled tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    InProgress,
    Ok,
    Error,
}

/// Structured observability event marking the start or outcome of a
/// scheduled tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    /// Schedule identifier, stable across ticks.
    pub monitor_slug: String,

    /// Tick phase/outcome.
    pub status: CheckInStatus,

    /// Tick duration, present on completion check-ins.
    pub duration: Option<Duration>,

    /// Cron expression of the schedule, for monitor registration.
    pub schedule_expr: Option<String>,
}

impl CheckIn {
    /// Start-of-tick marker.
    pub fn in_progress(slug: impl Into<String>, schedule_expr: impl Into<String>) -> Self {
        Self {
            monitor_slug: slug.into(),
            status: CheckInStatus::InProgress,
            duration: None,
            schedule_expr: Some(schedule_expr.into()),
        }
    }

    /// Completion marker.
    pub fn finished(
        slug: impl Into<String>,
        status: CheckInStatus,
        duration: Duration,
    ) -> Self {
        Self {
            monitor_slug: slug.into(),
            status,
            duration: Some(duration),
            schedule_expr: None,
        }
    }
}

/// Captured exception record, kept for test assertions.
#[derive(Debug, Clone)]
pub struct CapturedException {
    pub message: String,
    pub tags: BTreeMap<String, String>,
    pub level: Severity,
}

/// Sink contract for structured error capture with job/queue tags.
pub trait TraceSink: Send + Sync {
    /// Record an exception with tags and severity.
    fn capture_exception(&self, message: &str, tags: &[(&str, String)], level: Severity);

    /// Record a scheduled-tick check-in.
    fn capture_check_in(&self, check_in: CheckIn);

    /// Record a free-form message.
    fn capture_message(&self, message: &str, level: Severity) {
        let _ = (message, level);
    }
}

/// Default sink backed by `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn capture_exception(&self, message: &str, tags: &[(&str, String)], level: Severity) {
        match level {
            Severity::Error => {
                tracing::error!(tags = ?tags, "{message}");
            }
            Severity::Warning => {
                tracing::warn!(tags = ?tags, "{message}");
            }
            Severity::Info => {
                tracing::info!(tags = ?tags, "{message}");
            }
            Severity::Debug => {
                tracing::debug!(tags = ?tags, "{message}");
            }
        }
    }

    fn capture_check_in(&self, check_in: CheckIn) {
        tracing::info!(
            monitor = %check_in.monitor_slug,
            status = ?check_in.status,
            duration = ?check_in.duration,
            "check-in"
        );
    }

    fn capture_message(&self, message: &str, level: Severity) {
        tracing::info!(level = %level, "{message}");
    }
}

/// Capturing sink for tests.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    exceptions: Mutex<Vec<CapturedException>>,
    check_ins: Mutex<Vec<CheckIn>>,
    messages: Mutex<Vec<(String, Severity)>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All exceptions captured so far.
    pub fn exceptions(&self) -> Vec<CapturedException> {
        self.exceptions.lock().clone()
    }

    /// All check-ins captured so far.
    pub fn check_ins(&self) -> Vec<CheckIn> {
        self.check_ins.lock().clone()
    }

    /// Check-ins for one monitor slug, in capture order.
    pub fn check_ins_for(&self, slug: &str) -> Vec<CheckIn> {
        self.check_ins
            .lock()
            .iter()
            .filter(|c| c.monitor_slug == slug)
            .cloned()
            .collect()
    }

    /// All free-form messages captured so far.
    pub fn messages(&self) -> Vec<(String, Severity)> {
        self.messages.lock().clone()
    }
}

impl TraceSink for MemoryTraceSink {
    fn capture_exception(&self, message: &str, tags: &[(&str, String)], level: Severity) {
        self.exceptions.lock().push(CapturedException {
            message: message.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            level,
        });
    }

    fn capture_check_in(&self, check_in: CheckIn) {
        self.check_ins.lock().push(check_in);
    }

    fn capture_message(&self, message: &str, level: Severity) {
        self.messages.lock().push((message.to_string(), level));
    }
}
