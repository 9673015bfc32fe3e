//! Error types for the client.

use rdbsync_ipc::{IpcError, ParcelError};
use rdbsync_protocol::RdbStatus;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by the service proxy.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The transport failed.
    #[error("ipc error: {0}")]
    Ipc(#[from] IpcError),

    /// A parcel could not be built or read.
    #[error("parcel error: {0}")]
    Parcel(#[from] ParcelError),

    /// The service rejected the request.
    #[error("service returned {0}")]
    Status(RdbStatus),

    /// A remote query failed.
    #[error("remote query failed with {status}, engine status {engine}")]
    RemoteQuery {
        /// Service status.
        status: RdbStatus,
        /// Engine status code.
        engine: i32,
    },

    /// The operation is not supported.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The notifier could not be created or registered.
    #[error("notifier unavailable")]
    NotifierUnavailable,

    /// A sync sequence number is still waiting for its result.
    #[error("sequence number {0} already pending")]
    DuplicateSequence(u32),

    /// The service went away before answering.
    #[error("request cancelled")]
    Cancelled,

    /// The reply did not carry the expected remote object.
    #[error("reply carried no remote object")]
    MissingObject,

    /// A remote result-set call failed with an engine status.
    #[error("result set call failed with engine status {0}")]
    ResultSet(i32),
}

impl ClientError {
    /// The service status this error corresponds to.
    pub fn status(&self) -> RdbStatus {
        match self {
            Self::Status(status) | Self::RemoteQuery { status, .. } => *status,
            Self::NotSupported(_) => RdbStatus::NotSupported,
            _ => RdbStatus::Error,
        }
    }
}
