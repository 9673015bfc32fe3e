//! Store identification carried with every request.

use std::fmt;

use rdbsync_ipc::{Marshal, Parcel, ParcelResult, Unmarshal};
use zeroize::Zeroize;

const DB_SUFFIX: &str = ".db";

/// Strips a trailing `.db` from a store name.
pub fn remove_suffix(name: &str) -> &str {
    name.strip_suffix(DB_SUFFIX).unwrap_or(name)
}

/// Identifies one relational store of one application.
///
/// The password is wiped from memory when the value is dropped.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RdbSyncerParam {
    /// Bundle (application) name.
    pub bundle_name: String,
    /// Module (hap) name inside the bundle.
    pub hap_name: String,
    /// Store file name, usually ending in `.db`.
    pub store_name: String,
    /// Security area the data lives in.
    pub area: i32,
    /// Security level of the store.
    pub level: i32,
    /// Engine store type.
    pub store_type: i32,
    /// Store password, empty when not encrypted.
    pub password: Vec<u8>,
    /// Whether the engine syncs automatically.
    pub is_auto_sync: bool,
    /// Whether the store is encrypted.
    pub is_encrypt: bool,
}

impl RdbSyncerParam {
    /// Creates a parameter for `store_name` of `bundle_name`.
    pub fn new(bundle_name: impl Into<String>, store_name: impl Into<String>) -> Self {
        Self {
            bundle_name: bundle_name.into(),
            hap_name: String::new(),
            store_name: store_name.into(),
            area: 0,
            level: 0,
            store_type: 0,
            password: Vec::new(),
            is_auto_sync: false,
            is_encrypt: false,
        }
    }

    /// Sets the hap name.
    #[must_use]
    pub fn with_hap_name(mut self, hap_name: impl Into<String>) -> Self {
        self.hap_name = hap_name.into();
        self
    }

    /// Sets the security area.
    #[must_use]
    pub fn with_area(mut self, area: i32) -> Self {
        self.area = area;
        self
    }

    /// Sets the security level.
    #[must_use]
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// Sets the engine store type.
    #[must_use]
    pub fn with_store_type(mut self, store_type: i32) -> Self {
        self.store_type = store_type;
        self
    }

    /// Marks the store encrypted with `password`.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password.zeroize();
        self.password = password.into();
        self.is_encrypt = true;
        self
    }

    /// Sets the encryption flag without a password.
    #[must_use]
    pub fn with_encrypt(mut self, is_encrypt: bool) -> Self {
        self.is_encrypt = is_encrypt;
        self
    }

    /// Sets the auto-sync flag.
    #[must_use]
    pub fn with_auto_sync(mut self, is_auto_sync: bool) -> Self {
        self.is_auto_sync = is_auto_sync;
        self
    }

    /// Store id: the store name without its `.db` suffix.
    pub fn store_id(&self) -> &str {
        remove_suffix(&self.store_name)
    }

    /// Returns true if the request carries a password for an encrypted store.
    pub fn has_password(&self) -> bool {
        self.is_encrypt && !self.password.is_empty()
    }
}

impl Drop for RdbSyncerParam {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

impl fmt::Debug for RdbSyncerParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdbSyncerParam")
            .field("bundle_name", &self.bundle_name)
            .field("hap_name", &self.hap_name)
            .field("store_name", &self.store_name)
            .field("area", &self.area)
            .field("level", &self.level)
            .field("store_type", &self.store_type)
            .field("password", &"<redacted>")
            .field("is_auto_sync", &self.is_auto_sync)
            .field("is_encrypt", &self.is_encrypt)
            .finish()
    }
}

impl Marshal for RdbSyncerParam {
    fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()> {
        parcel.write_string(&self.bundle_name)?;
        parcel.write_string(&self.hap_name)?;
        parcel.write_string(&self.store_name)?;
        parcel.write_i32(self.area)?;
        parcel.write_i32(self.level)?;
        parcel.write_i32(self.store_type)?;
        parcel.write_bytes(&self.password)?;
        parcel.write_bool(self.is_auto_sync)?;
        parcel.write_bool(self.is_encrypt)
    }
}

impl Unmarshal for RdbSyncerParam {
    fn unmarshal(parcel: &mut Parcel) -> ParcelResult<Self> {
        Ok(Self {
            bundle_name: parcel.read_string()?,
            hap_name: parcel.read_string()?,
            store_name: parcel.read_string()?,
            area: parcel.read_i32()?,
            level: parcel.read_i32()?,
            store_type: parcel.read_i32()?,
            password: parcel.read_bytes()?,
            is_auto_sync: parcel.read_bool()?,
            is_encrypt: parcel.read_bool()?,
        })
    }
}
