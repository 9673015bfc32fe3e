//! Per-device sync outcome.

use std::collections::HashMap;

use rdbsync_ipc::{Marshal, Parcel, ParcelError, ParcelResult, Unmarshal};
use serde::{Deserialize, Serialize};

/// Map from device id to that device's status code (0 is success).
///
/// Partial failures are reported here while the call itself succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncResult(HashMap<String, i32>);

impl SyncResult {
    /// Creates an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the status of a device.
    pub fn insert(&mut self, device: impl Into<String>, status: i32) -> Option<i32> {
        self.0.insert(device.into(), status)
    }

    /// Returns the status of a device.
    pub fn get(&self, device: &str) -> Option<i32> {
        self.0.get(device).copied()
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no device is recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(device, status)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Returns true if every device succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.0.values().all(|status| *status == 0)
    }

    /// Consumes the result and returns the underlying map.
    pub fn into_inner(self) -> HashMap<String, i32> {
        self.0
    }
}

impl From<HashMap<String, i32>> for SyncResult {
    fn from(map: HashMap<String, i32>) -> Self {
        Self(map)
    }
}

impl<S: Into<String>> FromIterator<(S, i32)> for SyncResult {
    fn from_iter<I: IntoIterator<Item = (S, i32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl Marshal for SyncResult {
    fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()> {
        let count = u32::try_from(self.0.len())
            .map_err(|_| ParcelError::invalid_value("too many devices"))?;
        parcel.write_u32(count)?;
        // sorted so equal results encode identically
        let mut entries: Vec<_> = self.0.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        for (device, status) in entries {
            parcel.write_string(device)?;
            parcel.write_i32(*status)?;
        }
        Ok(())
    }
}

impl Unmarshal for SyncResult {
    fn unmarshal(parcel: &mut Parcel) -> ParcelResult<Self> {
        let count = parcel.read_u32()?;
        // each pair takes at least two bytes
        if u64::from(count) * 2 > parcel.remaining() as u64 {
            return Err(ParcelError::SizeLimitExceeded {
                claimed: u64::from(count),
                max_allowed: parcel.remaining() as u64 / 2,
            });
        }
        let mut map = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let device = parcel.read_string()?;
            let status = parcel.read_i32()?;
            map.insert(device, status);
        }
        Ok(Self(map))
    }
}
