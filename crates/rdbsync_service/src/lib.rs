//! # rdbsync_service
//!
//! Service side of distributed relational-store synchronization.
//!
//! [`RdbServiceImpl`] keeps one [`RdbSyncer`] per `(pid, store)` pair,
//! translates predicates into engine queries, runs blocking and
//! asynchronous syncs, fans remote changes out to client notifiers and
//! cleans up after dead clients and idle stores. [`RdbServiceStub`] exposes
//! it over IPC.
//!
//! ## Wiring
//!
//! ```
//! use std::sync::Arc;
//!
//! use rdbsync_ipc::CallingIdentity;
//! use rdbsync_protocol::{RdbPredicates, RdbSyncerParam, SyncMode, SyncOption};
//! use rdbsync_service::{RdbServiceImpl, ServiceConfig, ServiceDeps, SignedBundleChecker, StaticAccounts};
//! use rdbsync_store::{
//!     CryptoManager, DeviceInfo, EncryptionKey, MemoryStoreManager, MetaDataManager,
//!     StaticDeviceManager,
//! };
//!
//! let devices = StaticDeviceManager::new(DeviceInfo::new("local-uuid", "local-net"));
//! devices.add_device(DeviceInfo::new("peer-uuid", "peer-net"), true);
//!
//! let deps = ServiceDeps {
//!     store_manager: Arc::new(MemoryStoreManager::new()),
//!     meta: Arc::new(MetaDataManager::in_memory()),
//!     devices: Arc::new(devices),
//!     checker: Arc::new(SignedBundleChecker::new(b"device-secret".to_vec())),
//!     accounts: Arc::new(StaticAccounts::new("owner")),
//!     crypto: Arc::new(CryptoManager::new(&EncryptionKey::generate())),
//! };
//! let service = RdbServiceImpl::new(ServiceConfig::new("/tmp/rdbsync"), deps).unwrap();
//!
//! let caller = CallingIdentity::new(100, 20_010_001, 1);
//! let param = RdbSyncerParam::new("com.example.notes", "notes.db");
//! let result = service
//!     .do_sync(&caller, &param, &SyncOption::blocking(SyncMode::Push), &RdbPredicates::new("notes"))
//!     .unwrap();
//! assert_eq!(result.get("peer-net"), Some(0));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod error;
mod notifier;
mod observer;
mod result_set_stub;
mod service;
mod stub;
mod syncer;
mod timer;

pub use auth::{AccessChecker, AccountDelegate, SignedBundleChecker, StaticAccounts, UID_RANGE_PER_USER};
pub use config::ServiceConfig;
pub use error::{ServiceError, ServiceResult};
pub use notifier::RdbNotifierProxy;
pub use observer::SyncerObserver;
pub use result_set_stub::RdbResultSetStub;
pub use service::{RdbServiceImpl, ServiceDeps};
pub use stub::RdbServiceStub;
pub use syncer::{handle_sync_status, make_query, AsyncCallback, Permissions, RdbSyncer};
pub use timer::{SyncerTimer, TimerId, TimerTask};

#[cfg(test)]
mod test_support {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;
    use rdbsync_ipc::{CallingIdentity, Parcel, RemoteStub, ERR_INTERFACE_TOKEN, ERR_INVALID_DATA};
    use rdbsync_protocol::{NotifierCode, NotifierEvent, NOTIFIER_DESCRIPTOR};
    use rdbsync_store::{
        CryptoManager, DeviceInfo, EncryptionKey, MemoryStoreManager, MetaDataManager,
        StaticDeviceManager,
    };

    use crate::{ServiceDeps, SignedBundleChecker, StaticAccounts};

    pub(crate) fn caller(pid: i32) -> CallingIdentity {
        CallingIdentity::new(pid, 1000 + pid, pid.unsigned_abs())
    }

    pub(crate) fn deps() -> (ServiceDeps, MemoryStoreManager) {
        let devices = StaticDeviceManager::new(DeviceInfo::new("local-uuid", "local-net"));
        devices.add_device(DeviceInfo::new("uuid-a", "net-a"), true);
        devices.add_device(DeviceInfo::new("uuid-b", "net-b"), true);
        let engine = MemoryStoreManager::new();
        let deps = ServiceDeps {
            store_manager: Arc::new(engine.clone()),
            meta: Arc::new(MetaDataManager::in_memory()),
            devices: Arc::new(devices),
            checker: Arc::new(SignedBundleChecker::new(b"test-secret".to_vec())),
            accounts: Arc::new(StaticAccounts::new("test-account")),
            crypto: Arc::new(CryptoManager::new(&EncryptionKey::generate())),
        };
        (deps, engine)
    }

    pub(crate) fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        events: Mutex<Vec<NotifierEvent>>,
    }

    impl RecordingNotifier {
        pub(crate) fn events(&self) -> Vec<NotifierEvent> {
            self.events.lock().clone()
        }
    }

    impl RemoteStub for RecordingNotifier {
        fn descriptor(&self) -> &str {
            NOTIFIER_DESCRIPTOR
        }

        fn on_remote_request(
            &self,
            code: u32,
            data: &mut Parcel,
            _reply: &mut Parcel,
            _caller: &CallingIdentity,
        ) -> i32 {
            if data.enforce_interface(NOTIFIER_DESCRIPTOR).is_err() {
                return ERR_INTERFACE_TOKEN;
            }
            let Some(code) = NotifierCode::from_code(code) else {
                return ERR_INVALID_DATA;
            };
            match NotifierEvent::decode(code, data) {
                Ok(event) => {
                    self.events.lock().push(event);
                    0
                }
                Err(_) => ERR_INVALID_DATA,
            }
        }
    }
}
