//! Error types for parcels and IPC transactions.

use thiserror::Error;

/// Result type for parcel reads and writes.
pub type ParcelResult<T> = Result<T, ParcelError>;

/// Result type for IPC transactions.
pub type IpcResult<T> = Result<T, IpcError>;

/// Errors raised while writing or reading a [`Parcel`](crate::Parcel).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParcelError {
    /// The parcel has no more items to read.
    #[error("unexpected end of parcel")]
    UnexpectedEof,

    /// The next item has a different type than the one requested.
    #[error("type mismatch: expected {expected}, found major type {found}")]
    TypeMismatch {
        /// The requested item type.
        expected: &'static str,
        /// The CBOR major type actually found.
        found: u8,
    },

    /// An integer does not fit the requested width.
    #[error("value {value} out of range for {target}")]
    OutOfRange {
        /// The requested integer type.
        target: &'static str,
        /// The decoded value.
        value: i64,
    },

    /// An item was not encoded in its shortest form.
    #[error("non-canonical item encoding")]
    NonCanonical,

    /// Indefinite-length items are not accepted.
    #[error("indefinite-length items are forbidden")]
    IndefiniteLength,

    /// A text item is not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A length prefix claims more than the allowed maximum.
    #[error("length {claimed} exceeds limit {max_allowed}")]
    SizeLimitExceeded {
        /// The length claimed by the item header.
        claimed: u64,
        /// The maximum accepted length.
        max_allowed: u64,
    },

    /// Writing would grow the parcel past [`MAX_PARCEL_SIZE`](crate::MAX_PARCEL_SIZE).
    #[error("parcel capacity exceeded: {size} > {max}")]
    CapacityExceeded {
        /// Size the parcel would reach.
        size: usize,
        /// Maximum parcel size.
        max: usize,
    },

    /// The interface token at the head of a request does not match.
    #[error("interface token mismatch: expected {expected:?}, found {found:?}")]
    InterfaceMismatch {
        /// Descriptor of the receiving stub.
        expected: String,
        /// Descriptor carried by the request.
        found: String,
    },

    /// A remote-object reference points outside the parcel's object table.
    #[error("unknown remote object index {0}")]
    UnknownObject(u64),

    /// A decoded value is not valid for its field.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl ParcelError {
    /// Creates an invalid value error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue(message.into())
    }
}

/// Errors raised by an IPC transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    /// The remote end is gone.
    #[error("remote object is dead")]
    DeadObject,

    /// The remote stub rejected the transaction with a non-zero code.
    #[error("transaction failed with code {0}")]
    TransactionFailed(i32),

    /// The request or reply could not be (un)marshalled.
    #[error("parcel error: {0}")]
    Parcel(#[from] ParcelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parcel_error_display() {
        let err = ParcelError::TypeMismatch {
            expected: "text",
            found: 0,
        };
        assert!(err.to_string().contains("text"));

        let err = ParcelError::OutOfRange {
            target: "i32",
            value: i64::MAX,
        };
        assert!(err.to_string().contains("i32"));
    }

    #[test]
    fn ipc_error_from_parcel() {
        let err: IpcError = ParcelError::UnexpectedEof.into();
        assert!(matches!(err, IpcError::Parcel(ParcelError::UnexpectedEof)));
        assert_eq!(IpcError::DeadObject.to_string(), "remote object is dead");
    }
}
