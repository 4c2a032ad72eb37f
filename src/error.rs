//! Error types shared across the sync engine, the event consumer and the
//! webhook workflow.
use thiserror::Error;

/// Failure reported by an external collaborator (command API, read model,
/// tenant directory).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Only `Unavailable` is worth retrying; everything else is surfaced as is.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Batch-level errors returned by a sync orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("tenant is not valid")]
    TenantNotValid,
    #[error("missing external system")]
    MissingExternalSystem,
    #[error("external system not accepted: {0}")]
    ExternalSystemNotAccepted(String),
    #[error("sync cancelled")]
    Cancelled,
    #[error("sync deadline exceeded")]
    DeadlineExceeded,
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl SyncError {
    /// Errors caused by the request itself; callers map these to a 4xx.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            SyncError::TenantNotValid
                | SyncError::MissingExternalSystem
                | SyncError::ExternalSystemNotAccepted(_)
        )
    }
}

/// A single failed webhook delivery attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("endpoint answered with status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The transport dropped the subscription. Fatal for the whole group.
    #[error("subscription dropped: {0}")]
    Dropped(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_classification() {
        assert!(SyncError::TenantNotValid.is_bad_request());
        assert!(SyncError::MissingExternalSystem.is_bad_request());
        assert!(SyncError::ExternalSystemNotAccepted("x".into()).is_bad_request());
        assert!(!SyncError::Cancelled.is_bad_request());
        assert!(!SyncError::DeadlineExceeded.is_bad_request());
        assert!(!SyncError::Backend(BackendError::Unavailable("down".into())).is_bad_request());
    }

    #[test]
    fn only_unavailable_is_transient() {
        assert!(BackendError::Unavailable("x".into()).is_transient());
        assert!(!BackendError::NotFound.is_transient());
        assert!(!BackendError::Conflict("dup".into()).is_transient());
        assert!(!BackendError::Other("boom".into()).is_transient());
    }
}
