//! Errors - エラー型と分類の材料
//!
//! `ServiceError` の variant がそのまま障害分類（`FailureKind`）の入力になります。
//! 分類は catch した場所で一度だけ行います（`failure.rs`）。

use std::time::Duration;

use thiserror::Error;

/// Boxed error used for opaque work-logic failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a storage collaborator (queue or blob backend).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage operation `{operation}` failed: {message}")]
    OperationFailed {
        operation: &'static str,
        message: String,
    },

    #[error("payload encode: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("payload decode: {0}")]
    Decode(#[source] serde_json::Error),
}

impl StorageError {
    pub fn operation(operation: &'static str, message: impl Into<String>) -> Self {
        StorageError::OperationFailed {
            operation,
            message: message.into(),
        }
    }
}

/// Failure of the distributed counter.
#[derive(Debug, Error)]
pub enum CounterError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("counter `{name}` still conflicting after {attempts} attempts")]
    Contention { name: String, attempts: u32 },

    #[error("counter `{name}` holds a non-decimal value: {message}")]
    Corrupted { name: String, message: String },
}

/// Everything that can escape a service execution.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The execution is being torn down from the outside (shutdown).
    #[error("execution cancelled")]
    Cancelled,

    /// The execution exceeded the service's execution timeout.
    #[error("execution timed out after {0:?}")]
    TimedOut(Duration),

    /// Control signal: rebuild the worker to pick up newly deployed code.
    #[error("restart requested: {reason}")]
    RestartRequested { reason: String },

    #[error("type `{type_name}` could not be loaded")]
    TypeLoad { type_name: String },

    #[error("dependency `{dependency}` is missing or failed to load")]
    MissingDependency { dependency: String },

    #[error("access to `{resource}` denied by the isolation boundary")]
    SecurityDenied { resource: String },

    #[error("service implements neither `start` nor `start_range`")]
    NotImplemented,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Counter(#[from] CounterError),

    #[error("{0}")]
    Failed(#[source] BoxError),
}

impl ServiceError {
    /// Wrap an arbitrary work-logic failure.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        ServiceError::Failed(error.into())
    }

    pub fn restart(reason: impl Into<String>) -> Self {
        ServiceError::RestartRequested {
            reason: reason.into(),
        }
    }

    /// Cancellation and timeouts resume messages instead of abandoning them.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ServiceError::Cancelled | ServiceError::TimedOut(_))
    }
}
