//! Test fixtures wiring a service to in-process clients.
//!
//! A [`TestBed`] runs an [`RdbServiceImpl`] over the in-memory engine with
//! two online peers. Each [`TestClient`] stands for one application
//! process: it talks to the service through its own IPC handle, so the
//! service sees it under its own pid.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rdbsync_client::{RdbServiceProxy, RdbStoreObserver};
use rdbsync_ipc::{CallingIdentity, LocalObject};
use rdbsync_protocol::RdbSyncerParam;
use rdbsync_service::{
    RdbServiceImpl, RdbServiceStub, ServiceConfig, ServiceDeps, SignedBundleChecker,
    StaticAccounts,
};
use rdbsync_store::{
    CryptoManager, DeviceInfo, EncryptionKey, FileMetaStore, MemoryStoreManager, MetaDataManager,
    StaticDeviceManager,
};
use tempfile::TempDir;

/// Uuid of the device the service runs on.
pub const LOCAL_UUID: &str = "local-uuid";
/// Network id of the device the service runs on.
pub const LOCAL_NETWORK_ID: &str = "local-net";
/// `(uuid, network id)` of the peers that are online from the start.
pub const PEERS: [(&str, &str); 2] = [("uuid-a", "net-a"), ("uuid-b", "net-b")];

/// Bundle used by [`test_param`].
pub const TEST_BUNDLE: &str = "com.example.notes";

/// A service with its engine, devices and metadata exposed for inspection.
pub struct TestBed {
    /// The service.
    pub service: Arc<RdbServiceImpl>,
    /// Scriptable engine shared with the service.
    pub engine: MemoryStoreManager,
    /// Device list shared with the service.
    pub devices: Arc<StaticDeviceManager>,
    /// Metadata shared with the service.
    pub meta: Arc<MetaDataManager>,
    /// Access checker shared with the service.
    pub checker: Arc<SignedBundleChecker>,
    stub: Arc<RdbServiceStub>,
    temp_dir: Option<TempDir>,
}

impl TestBed {
    /// Creates a bed with default limits and in-memory metadata.
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::new("/data/rdbsync"))
    }

    /// Creates a bed with `config` and in-memory metadata.
    pub fn with_config(config: ServiceConfig) -> Self {
        Self::build(config, Arc::new(MetaDataManager::in_memory()), None)
    }

    /// Creates a bed whose metadata lives in a temporary directory.
    pub fn on_disk() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileMetaStore::open(&temp_dir.path().join("meta"))
            .expect("Failed to open metadata store");
        let config = ServiceConfig::new(temp_dir.path().join("data"));
        Self::build(config, Arc::new(MetaDataManager::new(Arc::new(store))), Some(temp_dir))
    }

    fn build(config: ServiceConfig, meta: Arc<MetaDataManager>, temp_dir: Option<TempDir>) -> Self {
        let devices = Arc::new(StaticDeviceManager::new(DeviceInfo::new(LOCAL_UUID, LOCAL_NETWORK_ID)));
        for (uuid, network_id) in PEERS {
            devices.add_device(DeviceInfo::new(uuid, network_id), true);
        }
        let engine = MemoryStoreManager::new();
        let checker = Arc::new(SignedBundleChecker::new(b"testkit-secret".to_vec()));
        let deps = ServiceDeps {
            store_manager: Arc::new(engine.clone()),
            meta: Arc::clone(&meta),
            devices: devices.clone(),
            checker: checker.clone(),
            accounts: Arc::new(StaticAccounts::new("testkit")),
            crypto: Arc::new(CryptoManager::new(&EncryptionKey::generate())),
        };
        let service = RdbServiceImpl::new(config, deps).expect("Failed to start service");
        Self {
            stub: Arc::new(RdbServiceStub::new(Arc::clone(&service))),
            service,
            engine,
            devices,
            meta,
            checker,
            temp_dir,
        }
    }

    /// Connects a client process with the given pid.
    pub fn client(&self, pid: i32) -> TestClient {
        let caller = CallingIdentity::new(pid, 20_010_000 + pid, pid.unsigned_abs());
        let object = LocalObject::new(Arc::clone(&self.stub), caller);
        TestClient {
            pid,
            proxy: RdbServiceProxy::new(Arc::clone(&object).into_ref()),
            object,
        }
    }

    /// Data root of the service.
    pub fn data_root(&self) -> PathBuf {
        self.service.config().data_root.clone()
    }

    /// Temporary directory backing an [`on_disk`](Self::on_disk) bed.
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }
}

impl Default for TestBed {
    fn default() -> Self {
        Self::new()
    }
}

/// One client process connected to a [`TestBed`].
pub struct TestClient {
    /// Pid the service sees.
    pub pid: i32,
    /// The client's proxy.
    pub proxy: Arc<RdbServiceProxy>,
    object: Arc<LocalObject<RdbServiceStub>>,
}

impl TestClient {
    /// Simulates the process exiting: its notifier dies and its service
    /// handle stops working.
    pub fn kill(&self) {
        self.proxy.close();
        self.object.kill();
    }
}

/// Parameters of a plain store of [`TEST_BUNDLE`].
pub fn test_param(store_name: &str) -> RdbSyncerParam {
    RdbSyncerParam::new(TEST_BUNDLE, store_name)
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Observer recording every change it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    changes: Mutex<Vec<Vec<String>>>,
}

impl RecordingObserver {
    /// Creates an observer with no recorded changes.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Device lists received so far, oldest first.
    pub fn changes(&self) -> Vec<Vec<String>> {
        self.changes.lock().clone()
    }
}

impl RdbStoreObserver for RecordingObserver {
    fn on_change(&self, devices: &[String]) {
        self.changes.lock().push(devices.to_vec());
    }
}
