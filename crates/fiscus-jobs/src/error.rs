//! Job error types.

use fiscus_core::{CoreError, Severity};
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
///
/// The taxonomy is closed: producers fail synchronously on `Validation`,
/// the worker path treats everything a processor returns as a job failure,
/// and `PolicyExhausted` marks the transition to the dead-letter store.
#[derive(Debug, Error)]
pub enum JobError {
    /// Producer supplied a payload missing required fields.
    #[error("Validation error: {0}")]
    Validation(String),

    /// KV store unreachable or a persistence mutation failed.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// Application-layer precondition violation surfaced by a processor.
    #[error("Domain error: {0}")]
    Domain(String),

    /// External-service failure raised by a provider adapter.
    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    /// All allowed attempts consumed; the job belongs to the DLQ now.
    #[error("Retry policy exhausted for job {job_id} after {attempts} attempts")]
    PolicyExhausted { job_id: String, attempts: u32 },

    /// Unknown queue or job referenced by an admin operation.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Misconfiguration (bad cron expression, missing processor, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}

impl JobError {
    /// Shorthand for a provider failure.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// True when the failure came from our own plumbing rather than the
    /// domain or an external provider.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            JobError::Infrastructure(_)
                | JobError::Redis(_)
                | JobError::Pool(_)
                | JobError::Serialization(_)
        )
    }

    /// Domain tag attached to trace-sink reports.
    pub fn domain_kind(&self) -> &'static str {
        match self {
            JobError::Validation(_) => "validation",
            JobError::Domain(_) => "domain",
            JobError::Provider { .. } => "provider",
            JobError::PolicyExhausted { .. } => "policy_exhausted",
            JobError::NotFound(_) => "not_found",
            JobError::Configuration(_) => "configuration",
            JobError::Infrastructure(_)
            | JobError::Redis(_)
            | JobError::Pool(_)
            | JobError::Serialization(_) => "infrastructure",
        }
    }

    /// Severity for a failure at the given 1-based attempt: the last
    /// allowed attempt reports `error`, earlier attempts `warning`.
    pub fn severity_for_attempt(attempt: u32, max_attempts: u32) -> Severity {
        if attempt >= max_attempts {
            Severity::Error
        } else {
            Severity::Warning
        }
    }
}

impl From<CoreError> for JobError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => JobError::Validation(msg),
            CoreError::NotFound { resource_type, id } => {
                JobError::Domain(format!("{resource_type} not found: {id}"))
            }
            CoreError::Domain(msg) => JobError::Domain(msg),
            CoreError::Provider { provider, message } => {
                JobError::Provider { provider, message }
            }
            CoreError::Infrastructure(msg) => JobError::Infrastructure(msg),
            CoreError::Configuration(msg) => JobError::Configuration(msg),
        }
    }
}
