//! Sync and subscribe options.

use rdbsync_ipc::{Marshal, Parcel, ParcelError, ParcelResult, Unmarshal};
use serde::{Deserialize, Serialize};

/// Direction of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum SyncMode {
    /// Send local changes to peers.
    #[default]
    Push = 0,
    /// Fetch peer changes.
    Pull = 1,
    /// Both directions.
    PushPull = 2,
}

impl SyncMode {
    /// Wire code of this mode.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps a wire code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Push),
            1 => Some(Self::Pull),
            2 => Some(Self::PushPull),
            _ => None,
        }
    }
}

/// How a sync is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncOption {
    /// Sync direction.
    pub mode: SyncMode,
    /// Wait for completion when true.
    pub is_block: bool,
}

impl SyncOption {
    /// Creates an option.
    pub fn new(mode: SyncMode, is_block: bool) -> Self {
        Self { mode, is_block }
    }

    /// A blocking sync in `mode`.
    pub fn blocking(mode: SyncMode) -> Self {
        Self::new(mode, true)
    }

    /// An asynchronous sync in `mode`.
    pub fn asynchronous(mode: SyncMode) -> Self {
        Self::new(mode, false)
    }
}

impl Marshal for SyncOption {
    fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()> {
        parcel.write_i32(self.mode.code())?;
        parcel.write_bool(self.is_block)
    }
}

impl Unmarshal for SyncOption {
    fn unmarshal(parcel: &mut Parcel) -> ParcelResult<Self> {
        let code = parcel.read_i32()?;
        let mode = SyncMode::from_code(code)
            .ok_or_else(|| ParcelError::invalid_value(format!("unknown sync mode {code}")))?;
        Ok(Self {
            mode,
            is_block: parcel.read_bool()?,
        })
    }
}

/// Which changes a subscriber observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubscribeMode {
    /// Changes synced in from remote devices.
    #[default]
    Remote,
    /// Local changes.
    Local,
}

/// Subscription options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscribeOption {
    /// Subscription mode.
    pub mode: SubscribeMode,
}

impl SubscribeOption {
    /// Subscribes to remote changes.
    pub fn remote() -> Self {
        Self {
            mode: SubscribeMode::Remote,
        }
    }

    /// Subscribes to local changes.
    pub fn local() -> Self {
        Self {
            mode: SubscribeMode::Local,
        }
    }
}
