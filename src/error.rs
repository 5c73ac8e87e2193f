use std::time::Duration;
use thiserror::Error;

/// Boxed transport error coming out of a storage backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum GuardError {
    /// Every acquisition attempt found the lock already held.
    #[error("lock {key} still contended after {attempts} attempts")]
    LockUnavailable { key: String, attempts: u32 },

    /// The lock record is gone or carries another acquisition's token.
    #[error("lock {key} is no longer held by this acquisition")]
    LockNotHeld { key: String },

    /// The ledger or the lock backend could not be reached.
    #[error("{backend} unavailable: {source}")]
    StoreUnavailable {
        backend: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{operation} did not finish within {after:?}")]
    DeadlineExceeded {
        operation: &'static str,
        after: Duration,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl GuardError {
    pub fn ledger(source: impl Into<BoxError>) -> Self {
        Self::StoreUnavailable {
            backend: "ledger store",
            source: source.into(),
        }
    }

    pub fn lock_service(source: impl Into<BoxError>) -> Self {
        Self::StoreUnavailable {
            backend: "lock service",
            source: source.into(),
        }
    }

    /// Whether the caller may resubmit the whole request later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LockUnavailable { .. } | Self::StoreUnavailable { .. } | Self::DeadlineExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;
