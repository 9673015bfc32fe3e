//! Error types for the service.

use rdbsync_ipc::{IpcError, ParcelError};
use rdbsync_protocol::RdbStatus;
use rdbsync_store::{DbStatus, StoreError};
use thiserror::Error;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors that can occur in the service.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The caller may not access the store.
    #[error("access denied for bundle {0}")]
    AccessDenied(String),

    /// No syncer can be created for the store.
    #[error("syncer capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// The store could not be prepared for syncing.
    #[error("syncer initialization failed: {0}")]
    InitFailed(String),

    /// Existing metadata disagrees with the request.
    #[error("metadata conflict for store {0}")]
    MetaConflict(String),

    /// The predicates cannot be translated.
    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    /// A device id could not be translated.
    #[error("unknown device {0}")]
    UnknownDevice(String),

    /// The notifier object is missing or dead.
    #[error("notifier unavailable: {0}")]
    NotifierUnavailable(String),

    /// The operation is not supported.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A storage collaborator failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The transport failed.
    #[error("ipc error: {0}")]
    Ipc(#[from] IpcError),

    /// A parcel could not be read or written.
    #[error("parcel error: {0}")]
    Parcel(#[from] ParcelError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// The status reported to clients.
    pub fn status(&self) -> RdbStatus {
        match self {
            Self::NotSupported(_) => RdbStatus::NotSupported,
            _ => RdbStatus::Error,
        }
    }

    /// The engine status behind this error, if the engine reported one.
    pub fn engine_status(&self) -> Option<DbStatus> {
        match self {
            Self::Store(err) => Some(err.db_status()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ServiceError::AccessDenied("b".into()).status(), RdbStatus::Error);
        assert_eq!(
            ServiceError::CapacityExhausted("pid 1".into()).status(),
            RdbStatus::Error
        );
        assert_eq!(
            ServiceError::NotSupported("local".into()).status(),
            RdbStatus::NotSupported
        );
    }

    #[test]
    fn engine_status_passthrough() {
        let err = ServiceError::from(StoreError::Engine(DbStatus::TimeOut));
        assert_eq!(err.engine_status(), Some(DbStatus::TimeOut));
        assert_eq!(err.status(), RdbStatus::Error);
        assert_eq!(ServiceError::InvalidPredicate("x".into()).engine_status(), None);
    }

    #[test]
    fn error_display() {
        let msg = ServiceError::MetaConflict("notes".into()).to_string();
        assert!(msg.contains("notes"));
    }
}
