//! Persisted store metadata.
//!
//! Metadata lives in a flat key/value namespace. Keys are built from
//! `###`-separated components so that related entries can be found by
//! prefix:
//!
//! ```text
//! StoreMeta###<device>###<user>###default###<bundle>###<store>
//! AppIdMeta###<bundle>
//! SecretKey###<user>###default###<bundle>###<store>###<instance>###SINGLE_KEY
//! ```
//!
//! [`FileMetaStore`] keeps the namespace in a directory guarded by a
//! `LOCK` file, writing a JSON snapshot after every change.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Separator between key components.
pub const KEY_SEPARATOR: &str = "###";
/// Store type of device-collaboration relational stores.
pub const STORE_TYPE_DEVICE_COLLABORATION: i32 = 10;

const STORE_META_PREFIX: &str = "StoreMeta";
const APP_ID_META_PREFIX: &str = "AppIdMeta";
const SECRET_KEY_PREFIX: &str = "SecretKey";
const DEFAULT_GROUP: &str = "default";
const SINGLE_KEY: &str = "SINGLE_KEY";

const LOCK_FILE: &str = "LOCK";
const SNAPSHOT_FILE: &str = "meta.json";
const SNAPSHOT_TEMP: &str = "meta.json.tmp";

/// Metadata of one store opened through the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreMetaData {
    /// Uid of the owning process.
    pub uid: i32,
    /// Access token of the owning process.
    pub token_id: u32,
    /// Application clone index; 0 for the main instance.
    pub instance_id: i32,
    /// Owning bundle.
    pub bundle_name: String,
    /// Uuid of the local device.
    pub device_id: String,
    /// Store name without the `.db` suffix.
    pub store_id: String,
    /// User id derived from the uid.
    pub user: String,
    /// Engine store type.
    pub store_type: i32,
    /// Data security level.
    pub security_level: i32,
    /// Encryption area.
    pub area: i32,
    /// Application id issued for the bundle.
    pub app_id: String,
    /// Application type reported to the engine.
    pub app_type: String,
    /// Module name inside the bundle.
    pub hap_name: String,
    /// Directory holding the store files.
    pub data_dir: String,
    /// Account the store belongs to.
    pub account: String,
    /// Whether the store is encrypted.
    pub is_encrypt: bool,
    /// Permission required to write the store from a peer.
    pub write_permission: String,
    /// Permission required to read the store from a peer.
    pub read_permission: String,
}

impl StoreMetaData {
    /// Key of this entry.
    pub fn get_key(&self) -> String {
        Self::get_prefix(&[
            &self.device_id,
            &self.user,
            DEFAULT_GROUP,
            &self.bundle_name,
            &self.store_id,
        ])
        .trim_end_matches(KEY_SEPARATOR)
        .to_string()
    }

    /// Prefix matching every entry whose leading components are `fields`.
    pub fn get_prefix(fields: &[&str]) -> String {
        let mut prefix = String::from(STORE_META_PREFIX);
        for field in fields {
            prefix.push_str(KEY_SEPARATOR);
            prefix.push_str(field);
        }
        prefix.push_str(KEY_SEPARATOR);
        prefix
    }

    /// Key of the secret key entry belonging to this store.
    pub fn get_secret_key(&self) -> String {
        [
            SECRET_KEY_PREFIX,
            &self.user,
            DEFAULT_GROUP,
            &self.bundle_name,
            &self.store_id,
            &self.instance_id.to_string(),
            SINGLE_KEY,
        ]
        .join(KEY_SEPARATOR)
    }
}

/// Maps a bundle to its application id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppIdMetaData {
    /// Bundle name.
    pub bundle_name: String,
    /// Application id.
    pub app_id: String,
}

impl AppIdMetaData {
    /// Key of this entry.
    pub fn get_key(&self) -> String {
        format!("{APP_ID_META_PREFIX}{KEY_SEPARATOR}{}", self.bundle_name)
    }
}

/// Encrypted password of an encrypted store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretKeyMetaData {
    /// Engine store type of the owning store.
    pub store_type: i32,
    /// Password sealed with the root key.
    #[serde(with = "hex_bytes")]
    pub s_key: Vec<u8>,
    /// Seconds since the Unix epoch when the key was stored.
    pub time: i64,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

/// Key/value backend of the metadata manager.
pub trait MetaStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Value stored under `key`.
    fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Removes `key`. Returns true if it existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Every entry whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Value)>>;
}

fn scan(entries: &BTreeMap<String, Value>, prefix: &str) -> Vec<(String, Value)> {
    entries
        .range(prefix.to_string()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Volatile [`MetaStore`].
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryMetaStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MemoryMetaStore {
    fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Value)>> {
        Ok(scan(&self.entries.lock(), prefix))
    }
}

/// Directory-backed [`MetaStore`].
///
/// Holds an exclusive lock on the directory for its whole lifetime, so a
/// second instance on the same directory fails with [`StoreError::Locked`].
#[derive(Debug)]
pub struct FileMetaStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
    _lock_file: File,
}

impl FileMetaStore {
    /// Opens or creates the metadata directory at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        let snapshot = path.join(SNAPSHOT_FILE);
        let entries = if snapshot.exists() {
            let data = fs::read(&snapshot)?;
            if data.is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_slice(&data)?
            }
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "opened metadata store");
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
            _lock_file: lock_file,
        })
    }

    /// Directory of this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, Value>) -> StoreResult<()> {
        let temp = self.path.join(SNAPSHOT_TEMP);
        let data = serde_json::to_vec_pretty(entries)?;
        let mut file = File::create(&temp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, self.path.join(SNAPSHOT_FILE))?;
        Ok(())
    }
}

impl MetaStore for FileMetaStore {
    fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_string(), value);
        if let Err(err) = self.persist(&entries) {
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock();
        let Some(previous) = entries.remove(key) else {
            return Ok(false);
        };
        if let Err(err) = self.persist(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(err);
        }
        Ok(true)
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Value)>> {
        Ok(scan(&self.entries.lock(), prefix))
    }
}

/// Kind of metadata change delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaAction {
    /// An entry was written.
    Saved,
    /// An entry was deleted.
    Deleted,
}

/// Subscriber callback: key and action.
pub type MetaCallback = Arc<dyn Fn(&str, MetaAction) + Send + Sync>;

/// Typed access to the metadata namespace.
pub struct MetaDataManager {
    store: Arc<dyn MetaStore>,
    subscribers: Mutex<Vec<(String, MetaCallback)>>,
}

impl MetaDataManager {
    /// Creates a manager over `store`.
    pub fn new(store: Arc<dyn MetaStore>) -> Self {
        Self {
            store,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Creates a manager over a fresh [`MemoryMetaStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryMetaStore::new()))
    }

    /// Saves `value` under `key`.
    pub fn save_meta<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        self.store.put(key, serde_json::to_value(value)?)?;
        self.notify(key, MetaAction::Saved);
        Ok(())
    }

    /// Loads the value under `key`.
    pub fn load_meta<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.store.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Deletes `key`. Returns true if it existed.
    pub fn del_meta(&self, key: &str) -> StoreResult<bool> {
        let existed = self.store.delete(key)?;
        if existed {
            self.notify(key, MetaAction::Deleted);
        }
        Ok(existed)
    }

    /// Loads every entry under `prefix`. Entries that do not decode as `T`
    /// are skipped.
    pub fn load_prefix<T: DeserializeOwned>(&self, prefix: &str) -> StoreResult<Vec<T>> {
        let mut values = Vec::new();
        for (key, value) in self.store.scan_prefix(prefix)? {
            match serde_json::from_value(value) {
                Ok(decoded) => values.push(decoded),
                Err(err) => tracing::warn!(key = %key, error = %err, "skipping undecodable metadata"),
            }
        }
        Ok(values)
    }

    /// Raw entries under `prefix`.
    pub fn entries(&self, prefix: &str) -> StoreResult<Vec<(String, Value)>> {
        self.store.scan_prefix(prefix)
    }

    /// Calls `callback` for every later change to a key under `prefix`.
    pub fn subscribe(&self, prefix: impl Into<String>, callback: MetaCallback) {
        self.subscribers.lock().push((prefix.into(), callback));
    }

    fn notify(&self, key: &str, action: MetaAction) {
        let matching: Vec<MetaCallback> = self
            .subscribers
            .lock()
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in matching {
            callback(key, action);
        }
    }
}

impl std::fmt::Debug for MetaDataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaDataManager")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}
