//! In-memory reference engine.
//!
//! [`MemoryStoreManager`] does not store rows. It records what it was asked
//! to do and answers from scripted fixtures, which makes it suitable for
//! exercising the service end to end.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::delegate::{
    AutoLaunchRequestCallback, DeviceSyncStatus, RelationalStoreDelegate, RelationalStoreManager,
    StoreChangedData, StoreObserver, StoreOption, StoreProperty, SyncMode, SyncStatusCallback,
    TableStatus,
};
use crate::error::{DbStatus, StoreError, StoreResult};
use crate::query::Query;
use crate::result_set::{ColumnValue, MemoryResultSet, ResultSet};

/// When non-blocking sync completions run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompletionMode {
    /// Before `sync` returns, on the calling thread.
    Inline,
    /// On a freshly spawned thread.
    #[default]
    Thread,
    /// When [`MemoryStoreManager::release_pending`] is called.
    Deferred,
}

/// A recorded `sync` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCall {
    /// Store the sync ran on.
    pub store_id: String,
    /// Target device uuids.
    pub devices: Vec<String>,
    /// Direction.
    pub mode: SyncMode,
    /// Row selection.
    pub query: Query,
    /// Whether the caller blocked.
    pub wait: bool,
}

/// A recorded `open_store` call.
#[derive(Debug, Clone)]
pub struct OpenRecord {
    /// Store identity.
    pub property: StoreProperty,
    /// Data path.
    pub path: PathBuf,
    /// Whether the store was opened encrypted.
    pub encrypted: bool,
    /// Password the store was opened with.
    pub password: Vec<u8>,
    /// Key derivation iterations.
    pub iterate_times: u32,
    /// True if the engine opened the store on its own.
    pub auto_launched: bool,
}

/// A recorded `remote_query` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteQueryCall {
    /// Target device uuid.
    pub device: String,
    /// Statement.
    pub sql: String,
    /// Bound arguments.
    pub selection_args: Vec<String>,
    /// Timeout the caller allowed.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
enum RemoteFixture {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<ColumnValue>>,
    },
    Failure(DbStatus),
}

#[derive(Default)]
struct EngineState {
    schema: Option<HashSet<String>>,
    device_status: HashMap<String, DbStatus>,
    fail_open: Option<DbStatus>,
    completion: CompletionMode,
    sync_calls: Vec<SyncCall>,
    opened: Vec<OpenRecord>,
    distributed: Vec<(String, String)>,
    remote: HashMap<String, RemoteFixture>,
    remote_calls: Vec<RemoteQueryCall>,
}

struct ObserverEntry {
    property: StoreProperty,
    observer: Arc<dyn StoreObserver>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<EngineState>,
    observers: Mutex<HashMap<u64, ObserverEntry>>,
    pending: Mutex<Vec<(SyncStatusCallback, DeviceSyncStatus)>>,
    auto_launch: Mutex<Option<AutoLaunchRequestCallback>>,
    next_handle: AtomicU64,
    open_count: AtomicUsize,
    close_count: AtomicUsize,
}

/// Scriptable in-memory [`RelationalStoreManager`].
///
/// Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStoreManager {
    inner: Arc<Inner>,
}

impl MemoryStoreManager {
    /// Creates an engine accepting every table and reporting OK for every
    /// device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts distributable tables to `tables`.
    pub fn set_schema<I, S>(&self, tables: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.state.lock().schema = Some(tables.into_iter().map(Into::into).collect());
    }

    /// Scripts the status reported for `device_uuid`.
    pub fn set_device_status(&self, device_uuid: impl Into<String>, status: DbStatus) {
        self.inner
            .state
            .lock()
            .device_status
            .insert(device_uuid.into(), status);
    }

    /// Makes every later `open_store` fail with `status`, or succeed again
    /// with `None`.
    pub fn set_fail_open(&self, status: Option<DbStatus>) {
        self.inner.state.lock().fail_open = status;
    }

    /// Selects when non-blocking completions run.
    pub fn set_completion_mode(&self, mode: CompletionMode) {
        self.inner.state.lock().completion = mode;
    }

    /// Scripts rows returned by a remote query on `device_uuid`.
    pub fn set_remote_rows(
        &self,
        device_uuid: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<ColumnValue>>,
    ) {
        self.inner
            .state
            .lock()
            .remote
            .insert(device_uuid.into(), RemoteFixture::Rows { columns, rows });
    }

    /// Scripts a remote query failure on `device_uuid`.
    pub fn set_remote_failure(&self, device_uuid: impl Into<String>, status: DbStatus) {
        self.inner
            .state
            .lock()
            .remote
            .insert(device_uuid.into(), RemoteFixture::Failure(status));
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.inner.open_count.load(Ordering::SeqCst)
    }

    /// Number of closed delegates.
    pub fn close_count(&self) -> usize {
        self.inner.close_count.load(Ordering::SeqCst)
    }

    /// Number of delegates currently open.
    pub fn live_count(&self) -> usize {
        self.open_count().saturating_sub(self.close_count())
    }

    /// Every recorded open, oldest first.
    pub fn opened(&self) -> Vec<OpenRecord> {
        self.inner.state.lock().opened.clone()
    }

    /// Every recorded sync, oldest first.
    pub fn sync_calls(&self) -> Vec<SyncCall> {
        self.inner.state.lock().sync_calls.clone()
    }

    /// Every recorded remote query, oldest first.
    pub fn remote_query_calls(&self) -> Vec<RemoteQueryCall> {
        self.inner.state.lock().remote_calls.clone()
    }

    /// `(store_id, table)` pairs marked distributed.
    pub fn distributed_tables(&self) -> Vec<(String, String)> {
        self.inner.state.lock().distributed.clone()
    }

    /// Number of deferred completions waiting.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Runs every deferred completion. Returns how many ran.
    pub fn release_pending(&self) -> usize {
        let pending = std::mem::take(&mut *self.inner.pending.lock());
        let count = pending.len();
        for (callback, status) in pending {
            callback(status);
        }
        count
    }

    /// Reports a remote change from `device_uuid` to every observer of
    /// `store_id`. Returns the number of observers notified.
    pub fn emit_change(&self, store_id: &str, device_uuid: &str) -> usize {
        let targets: Vec<(StoreProperty, Arc<dyn StoreObserver>)> = self
            .inner
            .observers
            .lock()
            .values()
            .filter(|entry| entry.property.store_id == store_id)
            .map(|entry| (entry.property.clone(), Arc::clone(&entry.observer)))
            .collect();
        for (property, observer) in &targets {
            observer.on_change(&StoreChangedData {
                device: device_uuid.to_string(),
                property: property.clone(),
            });
        }
        targets.len()
    }

    /// Simulates a peer asking for the store with `identifier` while no
    /// client has it open. Returns true if the resolver produced launch
    /// parameters; the launched store's observer then receives changes.
    pub fn trigger_auto_launch(&self, identifier: &[u8]) -> bool {
        let callback = self.inner.auto_launch.lock().clone();
        let Some(param) = callback.and_then(|callback| callback(identifier)) else {
            return false;
        };
        self.inner.state.lock().opened.push(OpenRecord {
            property: param.property.clone(),
            path: param.path.clone(),
            encrypted: param.option.is_encrypted,
            password: param.option.password.as_bytes().to_vec(),
            iterate_times: param.option.iterate_times,
            auto_launched: true,
        });
        if let Some(observer) = param.option.observer {
            self.register_observer(param.property, observer);
        }
        true
    }

    /// Returns true if an auto-launch resolver is installed.
    pub fn has_auto_launch_callback(&self) -> bool {
        self.inner.auto_launch.lock().is_some()
    }

    fn register_observer(&self, property: StoreProperty, observer: Arc<dyn StoreObserver>) -> u64 {
        let handle = self.inner.next_handle.fetch_add(1, Ordering::SeqCst);
        self.inner
            .observers
            .lock()
            .insert(handle, ObserverEntry { property, observer });
        handle
    }
}

impl RelationalStoreManager for MemoryStoreManager {
    fn open_store(
        &self,
        property: &StoreProperty,
        path: &Path,
        option: StoreOption,
    ) -> StoreResult<Box<dyn RelationalStoreDelegate>> {
        {
            let mut state = self.inner.state.lock();
            if let Some(status) = state.fail_open {
                return Err(StoreError::Engine(status));
            }
            if option.is_encrypted && option.password.is_empty() {
                return Err(StoreError::Engine(DbStatus::InvalidArgs));
            }
            state.opened.push(OpenRecord {
                property: property.clone(),
                path: path.to_path_buf(),
                encrypted: option.is_encrypted,
                password: option.password.as_bytes().to_vec(),
                iterate_times: option.iterate_times,
                auto_launched: false,
            });
        }

        let handle = option
            .observer
            .map(|observer| self.register_observer(property.clone(), observer));
        self.inner.open_count.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(store = %property.store_id, "memory engine opened store");

        Ok(Box::new(MemoryStoreDelegate {
            engine: Arc::downgrade(&self.inner),
            store_id: property.store_id.clone(),
            handle,
        }))
    }

    fn set_auto_launch_request_callback(&self, callback: AutoLaunchRequestCallback) {
        *self.inner.auto_launch.lock() = Some(callback);
    }
}

impl std::fmt::Debug for MemoryStoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStoreManager")
            .field("open_count", &self.open_count())
            .field("close_count", &self.close_count())
            .finish()
    }
}

struct MemoryStoreDelegate {
    engine: Weak<Inner>,
    store_id: String,
    handle: Option<u64>,
}

impl MemoryStoreDelegate {
    fn engine(&self) -> StoreResult<Arc<Inner>> {
        self.engine
            .upgrade()
            .ok_or(StoreError::Engine(DbStatus::DbError))
    }
}

impl RelationalStoreDelegate for MemoryStoreDelegate {
    fn create_distributed_table(&self, table: &str) -> StoreResult<()> {
        let engine = self.engine()?;
        let mut state = engine.state.lock();
        if let Some(schema) = &state.schema {
            if !schema.contains(table) {
                return Err(StoreError::Engine(DbStatus::NotFound));
            }
        }
        state
            .distributed
            .push((self.store_id.clone(), table.to_string()));
        Ok(())
    }

    fn sync(
        &self,
        devices: &[String],
        mode: SyncMode,
        query: &Query,
        on_complete: SyncStatusCallback,
        wait: bool,
    ) -> StoreResult<()> {
        if devices.is_empty() {
            return Err(StoreError::Engine(DbStatus::InvalidArgs));
        }
        let engine = self.engine()?;
        let (status, completion) = {
            let mut state = engine.state.lock();
            state.sync_calls.push(SyncCall {
                store_id: self.store_id.clone(),
                devices: devices.to_vec(),
                mode,
                query: query.clone(),
                wait,
            });
            let status: DeviceSyncStatus = devices
                .iter()
                .map(|device| {
                    let code = state
                        .device_status
                        .get(device)
                        .copied()
                        .unwrap_or(DbStatus::Ok);
                    (device.clone(), vec![TableStatus::new(query.table(), code)])
                })
                .collect();
            (status, state.completion)
        };

        match (wait, completion) {
            (true, _) | (false, CompletionMode::Inline) => on_complete(status),
            (false, CompletionMode::Thread) => {
                std::thread::Builder::new()
                    .name("memory-sync".into())
                    .spawn(move || on_complete(status))?;
            }
            (false, CompletionMode::Deferred) => engine.pending.lock().push((on_complete, status)),
        }
        Ok(())
    }

    fn remote_query(
        &self,
        device: &str,
        sql: &str,
        selection_args: &[String],
        timeout: Duration,
    ) -> StoreResult<Box<dyn ResultSet>> {
        let engine = self.engine()?;
        let fixture = {
            let mut state = engine.state.lock();
            state.remote_calls.push(RemoteQueryCall {
                device: device.to_string(),
                sql: sql.to_string(),
                selection_args: selection_args.to_vec(),
                timeout,
            });
            state.remote.get(device).cloned()
        };
        match fixture {
            Some(RemoteFixture::Rows { columns, rows }) => {
                Ok(Box::new(MemoryResultSet::new(columns, rows)?))
            }
            Some(RemoteFixture::Failure(status)) => Err(StoreError::Engine(status)),
            None => Err(StoreError::Engine(DbStatus::NotFound)),
        }
    }
}

impl Drop for MemoryStoreDelegate {
    fn drop(&mut self) {
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        let removed = self
            .handle
            .and_then(|handle| engine.observers.lock().remove(&handle));
        drop(removed);
        engine.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherPassword;
    use std::sync::mpsc;

    struct Counter(AtomicUsize);

    impl StoreObserver for Counter {
        fn on_change(&self, _data: &StoreChangedData) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn property() -> StoreProperty {
        StoreProperty::new("100", "app", "notes")
    }

    fn open(engine: &MemoryStoreManager) -> Box<dyn RelationalStoreDelegate> {
        engine
            .open_store(&property(), Path::new("/data/notes"), StoreOption::default())
            .unwrap()
    }

    #[test]
    fn open_and_close_are_counted() {
        let engine = MemoryStoreManager::new();
        let delegate = open(&engine);
        assert_eq!(engine.live_count(), 1);
        drop(delegate);
        assert_eq!(engine.close_count(), 1);
        assert_eq!(engine.live_count(), 0);
    }

    #[test]
    fn open_failures() {
        let engine = MemoryStoreManager::new();
        let option = StoreOption {
            is_encrypted: true,
            ..StoreOption::default()
        };
        let err = engine
            .open_store(&property(), Path::new("/p"), option)
            .err()
            .unwrap();
        assert_eq!(err.db_status(), DbStatus::InvalidArgs);

        let option = StoreOption {
            is_encrypted: true,
            password: CipherPassword::from_bytes(b"pw").unwrap(),
            iterate_times: 10_000,
            ..StoreOption::default()
        };
        assert!(engine.open_store(&property(), Path::new("/p"), option).is_ok());
        assert_eq!(engine.opened()[0].iterate_times, 10_000);

        engine.set_fail_open(Some(DbStatus::Busy));
        assert!(engine
            .open_store(&property(), Path::new("/p"), StoreOption::default())
            .is_err());
    }

    #[test]
    fn schema_restricts_distributed_tables() {
        let engine = MemoryStoreManager::new();
        engine.set_schema(["employee"]);
        let delegate = open(&engine);
        delegate.create_distributed_table("employee").unwrap();
        let err = delegate.create_distributed_table("missing").unwrap_err();
        assert_eq!(err.db_status(), DbStatus::NotFound);
        assert_eq!(
            engine.distributed_tables(),
            vec![("notes".to_string(), "employee".to_string())]
        );
    }

    #[test]
    fn blocking_sync_reports_scripted_statuses() {
        let engine = MemoryStoreManager::new();
        engine.set_device_status("uuid-b", DbStatus::TimeOut);
        let delegate = open(&engine);
        let (tx, rx) = mpsc::channel();
        delegate
            .sync(
                &["uuid-a".to_string(), "uuid-b".to_string()],
                SyncMode::PushOnly,
                &Query::select("employee"),
                Box::new(move |status| tx.send(status).unwrap()),
                true,
            )
            .unwrap();
        let status = rx.try_recv().unwrap();
        assert_eq!(status["uuid-a"][0].status, DbStatus::Ok);
        assert_eq!(status["uuid-b"][0].status, DbStatus::TimeOut);
        assert_eq!(status["uuid-b"][0].table, "employee");
        assert_eq!(engine.sync_calls().len(), 1);
        assert!(engine.sync_calls()[0].wait);
    }

    #[test]
    fn sync_without_devices_is_rejected() {
        let engine = MemoryStoreManager::new();
        let delegate = open(&engine);
        let err = delegate
            .sync(&[], SyncMode::PullOnly, &Query::select("t"), Box::new(|_| {}), true)
            .unwrap_err();
        assert_eq!(err.db_status(), DbStatus::InvalidArgs);
    }

    #[test]
    fn deferred_completion() {
        let engine = MemoryStoreManager::new();
        engine.set_completion_mode(CompletionMode::Deferred);
        let delegate = open(&engine);
        let (tx, rx) = mpsc::channel();
        delegate
            .sync(
                &["uuid-a".to_string()],
                SyncMode::PushPull,
                &Query::select("t"),
                Box::new(move |status| tx.send(status.len()).unwrap()),
                false,
            )
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.pending_count(), 1);
        assert_eq!(engine.release_pending(), 1);
        assert_eq!(rx.try_recv().unwrap(), 1);
    }

    #[test]
    fn threaded_completion() {
        let engine = MemoryStoreManager::new();
        let delegate = open(&engine);
        let (tx, rx) = mpsc::channel();
        delegate
            .sync(
                &["uuid-a".to_string()],
                SyncMode::PushOnly,
                &Query::select("t"),
                Box::new(move |status| tx.send(status.len()).unwrap()),
                false,
            )
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }

    #[test]
    fn remote_query_fixtures() {
        let engine = MemoryStoreManager::new();
        engine.set_remote_rows(
            "uuid-a",
            vec!["id".into()],
            vec![vec![ColumnValue::Integer(9)]],
        );
        engine.set_remote_failure("uuid-b", DbStatus::TimeOut);
        let delegate = open(&engine);

        let mut rows = delegate
            .remote_query("uuid-a", "SELECT id FROM t", &[], Duration::from_secs(30))
            .unwrap();
        rows.go_to_first_row().unwrap();
        assert_eq!(rows.get_long(0).unwrap(), 9);

        let err = delegate
            .remote_query("uuid-b", "SELECT 1", &[], Duration::from_secs(30))
            .err()
            .unwrap();
        assert_eq!(err.db_status(), DbStatus::TimeOut);
        assert_eq!(engine.remote_query_calls()[0].timeout, Duration::from_secs(30));
    }

    #[test]
    fn changes_reach_observers_until_close() {
        let engine = MemoryStoreManager::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let option = StoreOption {
            observer: Some(counter.clone()),
            ..StoreOption::default()
        };
        let delegate = engine
            .open_store(&property(), Path::new("/p"), option)
            .unwrap();
        assert_eq!(engine.emit_change("notes", "uuid-a"), 1);
        assert_eq!(engine.emit_change("other", "uuid-a"), 0);
        drop(delegate);
        assert_eq!(engine.emit_change("notes", "uuid-a"), 0);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn auto_launch_registers_observer() {
        let engine = MemoryStoreManager::new();
        assert!(!engine.trigger_auto_launch(b"id"));
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let observer: Arc<dyn StoreObserver> = counter.clone();
        engine.set_auto_launch_request_callback(Arc::new(move |identifier: &[u8]| {
            (identifier == property().identifier().as_slice()).then(|| {
                crate::delegate::AutoLaunchParam {
                    property: property(),
                    path: PathBuf::from("/data/notes"),
                    option: StoreOption {
                        observer: Some(Arc::clone(&observer)),
                        ..StoreOption::default()
                    },
                }
            })
        }));
        assert!(!engine.trigger_auto_launch(b"unknown"));
        assert!(engine.trigger_auto_launch(&property().identifier()));
        assert!(engine.opened()[0].auto_launched);
        engine.emit_change("notes", "uuid-a");
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
