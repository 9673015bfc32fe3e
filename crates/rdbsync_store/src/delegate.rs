//! Storage engine interface.
//!
//! The service never talks to a concrete engine. It opens stores through a
//! [`RelationalStoreManager`] and drives each open store through the
//! [`RelationalStoreDelegate`] it gets back. Dropping the delegate closes
//! the store.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::crypto::CipherPassword;
use crate::error::{DbStatus, StoreResult};
use crate::query::Query;
use crate::result_set::ResultSet;

/// Prefix of every distributed (per-device mirror) table.
pub const DISTRIBUTED_TABLE_PREFIX: &str = "naturalbase_rdb_aux_";

/// Direction of an engine sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Send local changes only.
    PushOnly,
    /// Fetch remote changes only.
    PullOnly,
    /// Both directions.
    PushPull,
}

/// Outcome of syncing one table with one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    /// Table name.
    pub table: String,
    /// Engine status for the table.
    pub status: DbStatus,
}

impl TableStatus {
    /// Creates a table status.
    pub fn new(table: impl Into<String>, status: DbStatus) -> Self {
        Self {
            table: table.into(),
            status,
        }
    }
}

/// Per-device table statuses, keyed by device uuid.
pub type DeviceSyncStatus = HashMap<String, Vec<TableStatus>>;

/// Invoked exactly once when a sync finishes.
pub type SyncStatusCallback = Box<dyn FnOnce(DeviceSyncStatus) + Send>;

/// Identity of an engine store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StoreProperty {
    /// Owning user.
    pub user_id: String,
    /// Application id.
    pub app_id: String,
    /// Store id (store name without suffix).
    pub store_id: String,
}

impl StoreProperty {
    /// Creates a store property.
    pub fn new(
        user_id: impl Into<String>,
        app_id: impl Into<String>,
        store_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            app_id: app_id.into(),
            store_id: store_id.into(),
        }
    }

    /// Engine identifier of this store.
    pub fn identifier(&self) -> Vec<u8> {
        store_identifier(&self.user_id, &self.app_id, &self.store_id)
    }
}

/// A change the engine applied from a remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChangedData {
    /// Uuid of the device the change came from.
    pub device: String,
    /// Store the change was applied to.
    pub property: StoreProperty,
}

/// Receives change notifications from an open store.
pub trait StoreObserver: Send + Sync {
    /// Called after the engine applied remote changes.
    fn on_change(&self, data: &StoreChangedData);
}

/// Cipher used for encrypted stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CipherType {
    /// Engine default.
    #[default]
    Default,
    /// AES-256-GCM.
    Aes256Gcm,
}

/// Options for opening a store.
#[derive(Clone, Default)]
pub struct StoreOption {
    /// Change observer registered with the store.
    pub observer: Option<Arc<dyn StoreObserver>>,
    /// Whether the store is encrypted.
    pub is_encrypted: bool,
    /// Store password, empty if unencrypted.
    pub password: CipherPassword,
    /// Key derivation iterations.
    pub iterate_times: u32,
    /// Cipher.
    pub cipher: CipherType,
}

impl fmt::Debug for StoreOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOption")
            .field("observer", &self.observer.is_some())
            .field("is_encrypted", &self.is_encrypted)
            .field("password", &self.password)
            .field("iterate_times", &self.iterate_times)
            .field("cipher", &self.cipher)
            .finish()
    }
}

/// What the engine needs to open a store on its own when a peer asks for
/// it while no client holds it open.
#[derive(Debug, Clone)]
pub struct AutoLaunchParam {
    /// Store identity.
    pub property: StoreProperty,
    /// Path of the store data.
    pub path: PathBuf,
    /// Open options, including the observer changes are routed to.
    pub option: StoreOption,
}

/// Resolves an engine identifier to the parameters for auto-launching it.
pub type AutoLaunchRequestCallback = Arc<dyn Fn(&[u8]) -> Option<AutoLaunchParam> + Send + Sync>;

/// An open engine store.
pub trait RelationalStoreDelegate: Send + Sync {
    /// Marks `table` as distributed.
    fn create_distributed_table(&self, table: &str) -> StoreResult<()>;

    /// Syncs the rows selected by `query` with `devices` (uuids).
    ///
    /// With `wait` the callback has run by the time this returns.
    /// Otherwise it runs later, exactly once. An error means the callback
    /// was dropped without running.
    fn sync(
        &self,
        devices: &[String],
        mode: SyncMode,
        query: &Query,
        on_complete: SyncStatusCallback,
        wait: bool,
    ) -> StoreResult<()>;

    /// Runs `sql` on `device`, waiting at most `timeout`.
    fn remote_query(
        &self,
        device: &str,
        sql: &str,
        selection_args: &[String],
        timeout: Duration,
    ) -> StoreResult<Box<dyn ResultSet>>;
}

/// Opens engine stores.
pub trait RelationalStoreManager: Send + Sync {
    /// Opens the store at `path`.
    fn open_store(
        &self,
        property: &StoreProperty,
        path: &Path,
        option: StoreOption,
    ) -> StoreResult<Box<dyn RelationalStoreDelegate>>;

    /// Installs the resolver consulted when a peer needs a closed store.
    fn set_auto_launch_request_callback(&self, callback: AutoLaunchRequestCallback);
}

/// Engine identifier of a store: SHA-256 of `user-app-store`.
pub fn store_identifier(user_id: &str, app_id: &str, store_id: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"-");
    hasher.update(app_id.as_bytes());
    hasher.update(b"-");
    hasher.update(store_id.as_bytes());
    hasher.finalize().to_vec()
}

/// Name of the table mirroring `table` from the device with `uuid`.
pub fn distributed_table_name(uuid: &str, table: &str) -> String {
    let digest = Sha256::digest(uuid.as_bytes());
    format!("{DISTRIBUTED_TABLE_PREFIX}{table}_{}", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_is_stable() {
        let a = store_identifier("100", "app", "notes");
        assert_eq!(a.len(), 32);
        assert_eq!(a, store_identifier("100", "app", "notes"));
        assert_ne!(a, store_identifier("100", "app", "note"));
        assert_ne!(store_identifier("1", "00-app", "x"), store_identifier("100", "app", "x"));
        assert_eq!(StoreProperty::new("100", "app", "notes").identifier(), a);
    }

    #[test]
    fn table_name_layout() {
        let name = distributed_table_name("uuid-1", "employee");
        assert!(name.starts_with("naturalbase_rdb_aux_employee_"));
        assert_eq!(name.len(), "naturalbase_rdb_aux_employee_".len() + 64);
        assert_ne!(name, distributed_table_name("uuid-2", "employee"));
    }

    #[test]
    fn option_debug_hides_password() {
        let option = StoreOption {
            is_encrypted: true,
            password: CipherPassword::from_bytes(b"secret").unwrap(),
            ..StoreOption::default()
        };
        let text = format!("{option:?}");
        assert!(!text.contains("secret"));
        assert!(text.contains("is_encrypted: true"));
    }
}
