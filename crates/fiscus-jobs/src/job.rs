//! Job envelope and payload definitions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{JobError, JobResult};

/// Unique job identifier.
///
/// Ids are deterministic strings built from the queue's discriminant rules
/// (user, space, symbol list, timestamp) so that re-submission inside the
/// dedup TTL window collapses. Uniqueness is advisory, not enforced globally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Discriminated tag indicating payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    SyncTransactions,
    CategorizeTransactions,
    EsgUpdate,
    ValuationSnapshot,
    SendEmail,
    PropertyValuation,
    // Recurring bulk tags produced only by the cron scheduler.
    PatternRetrain,
    ConnectionHealth,
    ReportGeneration,
}

impl JobKind {
    /// Tag string matching the wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::SyncTransactions => "sync-transactions",
            JobKind::CategorizeTransactions => "categorize-transactions",
            JobKind::EsgUpdate => "esg-update",
            JobKind::ValuationSnapshot => "valuation-snapshot",
            JobKind::SendEmail => "send-email",
            JobKind::PropertyValuation => "property-valuation",
            JobKind::PatternRetrain => "pattern-retrain",
            JobKind::ConnectionHealth => "connection-health",
            JobKind::ReportGeneration => "report-generation",
        }
    }

    /// The queue this kind is routed to.
    pub fn home_queue(self) -> &'static str {
        match self {
            JobKind::SyncTransactions => "sync-transactions",
            JobKind::CategorizeTransactions => "categorize-transactions",
            JobKind::EsgUpdate => "esg-updates",
            JobKind::ValuationSnapshot => "valuation-snapshots",
            JobKind::SendEmail => "email-notifications",
            JobKind::PropertyValuation => "property-valuation",
            JobKind::PatternRetrain
            | JobKind::ConnectionHealth
            | JobKind::ReportGeneration => "system-maintenance",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Email priority levels, remapped to numeric priority at enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailPriority {
    High,
    Normal,
    Low,
}

impl EmailPriority {
    /// Numeric queue priority for this level.
    pub fn queue_priority(self) -> i32 {
        match self {
            EmailPriority::High => 80,
            EmailPriority::Normal => 40,
            EmailPriority::Low => 10,
        }
    }
}

/// Property-valuation request subtypes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "kebab-case")]
pub enum PropertyValuationRequest {
    RefreshSingle { property_id: String },
    RefreshSpace { space_id: String },
    RefreshAll,
}

/// Typed payload, discriminated by kind on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobPayload {
    SyncTransactions {
        provider: String,
        user_id: String,
        connection_id: String,
        #[serde(default)]
        full_sync: bool,
    },
    CategorizeTransactions {
        space_id: String,
        #[serde(default)]
        transaction_ids: Vec<String>,
    },
    EsgUpdate {
        symbols: Vec<String>,
        #[serde(default)]
        force_refresh: bool,
    },
    ValuationSnapshot {
        space_id: String,
        #[serde(default)]
        date: Option<NaiveDate>,
    },
    SendEmail {
        to: String,
        template: String,
        data: serde_json::Value,
        #[serde(default)]
        priority: Option<EmailPriority>,
    },
    PropertyValuation {
        #[serde(flatten)]
        request: PropertyValuationRequest,
    },
    PatternRetrain {},
    ConnectionHealth {},
    ReportGeneration {
        cadence: String,
    },
}

impl JobPayload {
    /// The payload's kind tag.
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::SyncTransactions { .. } => JobKind::SyncTransactions,
            JobPayload::CategorizeTransactions { .. } => JobKind::CategorizeTransactions,
            JobPayload::EsgUpdate { .. } => JobKind::EsgUpdate,
            JobPayload::ValuationSnapshot { .. } => JobKind::ValuationSnapshot,
            JobPayload::SendEmail { .. } => JobKind::SendEmail,
            JobPayload::PropertyValuation { .. } => JobKind::PropertyValuation,
            JobPayload::PatternRetrain {} => JobKind::PatternRetrain,
            JobPayload::ConnectionHealth {} => JobKind::ConnectionHealth,
            JobPayload::ReportGeneration { .. } => JobKind::ReportGeneration,
        }
    }

    /// User the payload concerns, when it names one.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            JobPayload::SyncTransactions { user_id, .. } => Some(user_id),
            _ => None,
        }
    }

    /// Producer-side required-field validation.
    pub fn validate(&self) -> JobResult<()> {
        let missing = |field: &str| {
            Err(JobError::Validation(format!(
                "{}: missing required field {field}",
                self.kind()
            )))
        };
        match self {
            JobPayload::SyncTransactions {
                provider,
                user_id,
                connection_id,
                ..
            } => {
                if provider.is_empty() {
                    return missing("provider");
                }
                if user_id.is_empty() {
                    return missing("userId");
                }
                if connection_id.is_empty() {
                    return missing("connectionId");
                }
            }
            JobPayload::CategorizeTransactions { space_id, .. } => {
                if space_id.is_empty() {
                    return missing("spaceId");
                }
            }
            JobPayload::EsgUpdate { symbols, .. } => {
                if symbols.is_empty() {
                    return missing("symbols");
                }
            }
            JobPayload::ValuationSnapshot { space_id, .. } => {
                if space_id.is_empty() {
                    return missing("spaceId");
                }
            }
            JobPayload::SendEmail { to, template, .. } => {
                if to.is_empty() {
                    return missing("to");
                }
                if template.is_empty() {
                    return missing("template");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Short structured record of a job's most recent failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_kind: Option<String>,
}

impl LastError {
    /// Capture a job error.
    pub fn from_error(err: &JobError) -> Self {
        Self {
            message: err.to_string(),
            stack: None,
            domain_kind: Some(err.domain_kind().to_string()),
        }
    }
}

/// The unit of work stored in a queue.
///
/// Immutable at enqueue; only the attempt counters and failure fields
/// mutate during retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Job ID.
    pub id: JobId,

    /// Queue name.
    pub queue: String,

    /// Typed payload; the wire tag doubles as the Kind.
    pub payload: JobPayload,

    /// Priority, higher is picked earlier.
    pub priority: i32,

    /// Milliseconds from enqueue to first eligibility.
    #[serde(default)]
    pub delay_ms: u64,

    /// Completed attempts so far.
    pub attempts_made: u32,

    /// Maximum attempts allowed, set at enqueue from queue policy.
    pub max_attempts: u32,

    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,

    /// When a worker first picked the job up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_picked_at: Option<DateTime<Utc>>,

    /// When the job last failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_at: Option<DateTime<Utc>>,

    /// Most recent failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
}

impl JobEnvelope {
    /// Create a fresh envelope.
    pub fn new(
        id: JobId,
        queue: impl Into<String>,
        payload: JobPayload,
        priority: i32,
        delay: Duration,
        max_attempts: u32,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            queue: queue.into(),
            payload,
            priority,
            delay_ms: delay.as_millis() as u64,
            attempts_made: 0,
            max_attempts,
            enqueued_at,
            first_picked_at: None,
            last_failed_at: None,
            last_error: None,
        }
    }

    /// The payload's kind tag.
    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// Instant the job becomes visible to workers.
    pub fn eligible_at(&self) -> DateTime<Utc> {
        self.enqueued_at + chrono::Duration::milliseconds(self.delay_ms as i64)
    }

    /// Check if max attempts reached.
    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, err: &JobError, failed_at: DateTime<Utc>) {
        self.attempts_made += 1;
        self.last_failed_at = Some(failed_at);
        self.last_error = Some(LastError::from_error(err));
    }

    /// Create the context handed to a processor (attempt is 1-based).
    pub fn to_context(&self) -> JobContext {
        JobContext {
            job_id: self.id.clone(),
            queue: self.queue.clone(),
            attempt: self.attempts_made + 1,
            max_attempts: self.max_attempts,
            user_id: self.payload.user_id().map(str::to_string),
            payload: self.payload.clone(),
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> JobResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Execution context exposed to processors.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job ID.
    pub job_id: JobId,

    /// Queue name.
    pub queue: String,

    /// Current attempt number (1-based).
    pub attempt: u32,

    /// Maximum attempts allowed.
    pub max_attempts: u32,

    /// User the job concerns, when the payload names one.
    pub user_id: Option<String>,

    /// Typed payload.
    pub payload: JobPayload,
}

impl JobContext {
    /// Returns true if this is the last allowed attempt.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
