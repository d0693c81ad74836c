//! Unified error types for the background-work platform.

use thiserror::Error;

/// Result alias used across collaborator interfaces.
pub type CoreResult<T> = Result<T, CoreError>;

/// Unified error type spoken by domain collaborators.
///
/// Processors map these into job-level errors; the variants form a closed
/// taxonomy so the worker path can decide retryability and severity without
/// inspecting message strings.
#[derive(Error, Debug)]
pub enum CoreError {
    // ============ Domain Errors ============
    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Application-layer precondition violation (ownership mismatch,
    /// unusable connection state, and the like)
    #[error("Domain error: {0}")]
    Domain(String),

    // ============ External Errors ============
    /// External provider/adapter failure
    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    // ============ Infrastructure Errors ============
    /// Storage, network, or serialization failure in our own plumbing
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// Misconfiguration detected at runtime
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    /// Shorthand for a provider failure.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// True for errors caused by our own plumbing rather than the domain.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            CoreError::Infrastructure(_) | CoreError::Configuration(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::NotFound {
            resource_type: "connection",
            id: "c-1".to_string(),
        };
        assert_eq!(err.to_string(), "Resource not found: connection with id c-1");

        let err = CoreError::provider("bitso", "rate limited");
        assert_eq!(err.to_string(), "Provider error (bitso): rate limited");
    }

    #[test]
    fn test_infrastructure_classification() {
        assert!(CoreError::Infrastructure("redis down".into()).is_infrastructure());
        assert!(!CoreError::Domain("ownership mismatch".into()).is_infrastructure());
    }
}
