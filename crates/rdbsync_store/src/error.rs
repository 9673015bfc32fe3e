//! Error types for the storage collaborators.

use std::io;

use thiserror::Error;

/// Result type for storage collaborator operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Status codes reported by the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DbStatus {
    /// Success.
    Ok = 0,
    /// Generic engine failure.
    DbError = 1,
    /// The engine is busy.
    Busy = 2,
    /// The requested object does not exist.
    NotFound = 3,
    /// An argument was rejected.
    InvalidArgs = 4,
    /// The operation timed out.
    TimeOut = 5,
    /// The operation is not supported.
    NotSupport = 6,
    /// Communication with a peer failed.
    CommError = 7,
    /// Local and remote schemas differ.
    SchemaMismatch = 8,
    /// The caller lacks permission.
    NoPermission = 9,
}

impl DbStatus {
    /// Numeric code of this status.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps a numeric code; unknown codes become [`DbStatus::DbError`].
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            2 => Self::Busy,
            3 => Self::NotFound,
            4 => Self::InvalidArgs,
            5 => Self::TimeOut,
            6 => Self::NotSupport,
            7 => Self::CommError,
            8 => Self::SchemaMismatch,
            9 => Self::NoPermission,
            _ => Self::DbError,
        }
    }

    /// Returns true for [`DbStatus::Ok`].
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

/// Errors raised by storage collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The engine reported a non-OK status.
    #[error("engine error: {0:?}")]
    Engine(DbStatus),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Metadata could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another process holds the metadata directory lock.
    #[error("metadata directory is locked by another process")]
    Locked,

    /// Encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// An argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The result set was closed.
    #[error("result set is closed")]
    Closed,
}

impl StoreError {
    /// Creates a crypto error.
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto(message.into())
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// The engine status this error maps to.
    pub fn db_status(&self) -> DbStatus {
        match self {
            Self::Engine(status) => *status,
            Self::InvalidArgument(_) => DbStatus::InvalidArgs,
            Self::Locked => DbStatus::Busy,
            _ => DbStatus::DbError,
        }
    }
}

impl From<DbStatus> for StoreError {
    fn from(status: DbStatus) -> Self {
        Self::Engine(status)
    }
}
