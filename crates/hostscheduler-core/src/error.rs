//! Scheduler error types.

use thiserror::Error;

use crate::types::{ErrorClass, ErrorCode, ProviderError};

/// Errors surfaced by the registry and by every backend.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("backend registered twice: {0}")]
    DuplicateBackend(String),

    #[error("not found: {resource}: {message}")]
    NotFound { resource: String, message: String },

    #[error("conflicting operation on {resource}: {message}")]
    Conflict { resource: String, message: String },

    #[error("cluster already hibernated: {0}")]
    AlreadyHibernated(String),

    #[error("cluster not hibernated: {0}")]
    NotHibernated(String),

    #[error("provider error on {resource}: {source}")]
    Provider {
        resource: String,
        #[source]
        source: ProviderError,
    },

    #[error("deadline exceeded while {0}")]
    DeadlineExceeded(String),

    #[error("hibernation record for {cluster}: {message}")]
    State { cluster: String, message: String },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    /// Precondition violations an idempotent control loop treats as no-ops.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            SchedulerError::AlreadyHibernated(_) | SchedulerError::NotHibernated(_)
        )
    }

    /// Whether re-invoking the whole call later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::Conflict { .. } | SchedulerError::DeadlineExceeded(_) => true,
            SchedulerError::Provider { source, .. } => source.class() == ErrorClass::Retryable,
            _ => false,
        }
    }

    /// Attach a resource name to a provider error, routing not-found and
    /// conflict codes to their dedicated variants.
    pub fn from_provider(resource: impl Into<String>, err: ProviderError) -> Self {
        let resource = resource.into();
        match (err.code, err.class()) {
            (ErrorCode::NotFound, _) => SchedulerError::NotFound {
                resource,
                message: err.message,
            },
            (_, ErrorClass::Conflict) => SchedulerError::Conflict {
                resource,
                message: err.message,
            },
            _ => SchedulerError::Provider {
                resource,
                source: err,
            },
        }
    }
}
