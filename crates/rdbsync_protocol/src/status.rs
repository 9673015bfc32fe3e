//! Service status codes.

use serde::{Deserialize, Serialize};

/// Status returned by every service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum RdbStatus {
    /// The operation succeeded.
    Ok = 0,
    /// The operation failed.
    Error = 1,
    /// The operation is not supported.
    NotSupported = 2,
}

impl RdbStatus {
    /// Wire code of this status.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps a wire code. Unknown codes are treated as [`RdbStatus::Error`].
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            2 => Self::NotSupported,
            _ => Self::Error,
        }
    }

    /// Returns true for [`RdbStatus::Ok`].
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl From<RdbStatus> for i32 {
    fn from(status: RdbStatus) -> Self {
        status.code()
    }
}

impl std::fmt::Display for RdbStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ok => "RDB_OK",
            Self::Error => "RDB_ERROR",
            Self::NotSupported => "RDB_NOT_SUPPORTED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(RdbStatus::Ok.code(), 0);
        assert_eq!(i32::from(RdbStatus::NotSupported), 2);
        assert_eq!(RdbStatus::from_code(1), RdbStatus::Error);
        assert_eq!(RdbStatus::from_code(-14), RdbStatus::Error);
        assert!(RdbStatus::from_code(0).is_ok());
        assert_eq!(RdbStatus::Error.to_string(), "RDB_ERROR");
    }
}
