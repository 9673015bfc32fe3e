//! The RdbSync service: registry of syncers, notifiers and subscriptions.
//!
//! Syncers are keyed by `(pid, store_id)`. Every syncer is owned by its
//! registry slot; in-flight requests hold a clone of the `Arc` only for the
//! duration of the request. Eviction by the idle timer and cleanup on client
//! death both go through `compute` on the pid entry.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use rdbsync_ipc::{
    peer_event_channel, CallingIdentity, ConcurrentMap, DeathWatcher, PeerEvent,
    PeerEventReceiver, PeerEventSender, RemoteObjectRef,
};
use rdbsync_protocol::{RdbPredicates, RdbSyncerParam, SyncOption, SyncResult};
use rdbsync_store::{
    anonymize, distributed_table_name, AutoLaunchParam, CipherType, CryptoManager, DeviceChange,
    DeviceInfo, DeviceManager, DeviceObserver, MetaDataManager, RelationalStoreManager, ResultSet,
    StoreChangedData, StoreMetaData, StoreOption, StoreProperty, STORE_TYPE_DEVICE_COLLABORATION,
};
use tracing::{debug, info, warn};

use crate::auth::{AccessChecker, AccountDelegate};
use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::notifier::RdbNotifierProxy;
use crate::observer::SyncerObserver;
use crate::syncer::{Permissions, RdbSyncer};
use crate::timer::{SyncerTimer, TimerTask};

type StoreSyncers = HashMap<String, Arc<RdbSyncer>>;

/// Collaborators the service is built from.
#[derive(Clone)]
pub struct ServiceDeps {
    /// Storage engine.
    pub store_manager: Arc<dyn RelationalStoreManager>,
    /// Metadata manager.
    pub meta: Arc<MetaDataManager>,
    /// Device manager.
    pub devices: Arc<dyn DeviceManager>,
    /// Caller verification.
    pub checker: Arc<dyn AccessChecker>,
    /// Account lookup.
    pub accounts: Arc<dyn AccountDelegate>,
    /// Password sealing.
    pub crypto: Arc<CryptoManager>,
}

/// The service implementation.
pub struct RdbServiceImpl {
    config: Arc<ServiceConfig>,
    deps: ServiceDeps,
    syncers: ConcurrentMap<i32, StoreSyncers>,
    notifiers: ConcurrentMap<i32, Arc<RdbNotifierProxy>>,
    identifiers: ConcurrentMap<String, i32>,
    subscriptions: ConcurrentMap<i32, HashSet<String>>,
    syncer_num: AtomicUsize,
    next_syncer_id: AtomicU64,
    peer_events: PeerEventSender,
    timer: Arc<SyncerTimer>,
    self_ref: Weak<Self>,
}

impl RdbServiceImpl {
    /// Creates the service, starts its idle timer and liveness thread and
    /// registers the auto-launch callback with the engine.
    pub fn new(config: ServiceConfig, deps: ServiceDeps) -> ServiceResult<Arc<Self>> {
        config.validate()?;
        let timer = Arc::new(SyncerTimer::start()?);
        let (peer_events, receiver) = peer_event_channel();

        let service = Arc::new_cyclic(|self_ref| Self {
            config: Arc::new(config),
            deps,
            syncers: ConcurrentMap::new(),
            notifiers: ConcurrentMap::new(),
            identifiers: ConcurrentMap::new(),
            subscriptions: ConcurrentMap::new(),
            syncer_num: AtomicUsize::new(0),
            next_syncer_id: AtomicU64::new(0),
            peer_events,
            timer,
            self_ref: self_ref.clone(),
        });

        spawn_liveness_thread(Arc::downgrade(&service), receiver)?;

        let weak = Arc::downgrade(&service);
        service
            .deps
            .store_manager
            .set_auto_launch_request_callback(Arc::new(move |identifier: &[u8]| {
                weak.upgrade()?.resolve_auto_launch(identifier)
            }));
        service
            .deps
            .devices
            .register_observer(Arc::new(DeviceLogger));

        info!(
            max_syncers = service.config.max_syncer_num,
            per_process = service.config.max_syncer_per_process,
            timeout_ms = u64::try_from(service.config.syncer_timeout.as_millis()).unwrap_or(u64::MAX),
            "rdb service started"
        );
        Ok(service)
    }

    /// The configuration the service runs with.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The collaborators the service runs with.
    pub fn deps(&self) -> &ServiceDeps {
        &self.deps
    }

    /// Number of live syncers across all processes.
    pub fn syncer_count(&self) -> usize {
        self.syncer_num.load(Ordering::SeqCst)
    }

    /// Number of live syncers of `pid`.
    pub fn syncer_count_of(&self, pid: i32) -> usize {
        let mut count = 0;
        self.syncers.compute_if_present(&pid, |_, stores| {
            count = stores.len();
            true
        });
        count
    }

    /// The live syncer of `pid` for `store_id`, if any.
    pub fn syncer(&self, pid: i32, store_id: &str) -> Option<Arc<RdbSyncer>> {
        let mut found = None;
        self.syncers.compute_if_present(&pid, |_, stores| {
            found = stores.get(store_id).cloned();
            true
        });
        found
    }

    /// Returns true if `pid` registered a notifier.
    pub fn has_notifier(&self, pid: i32) -> bool {
        self.notifiers.contains(&pid)
    }

    /// Pid registered for a hex store identifier.
    pub fn identifier_owner(&self, identifier: &str) -> Option<i32> {
        self.identifiers.find(&identifier.to_string())
    }

    /// Returns true if `pid` subscribed to `store_id`.
    pub fn is_subscribed(&self, pid: i32, store_id: &str) -> bool {
        let mut subscribed = false;
        self.subscriptions.compute_if_present(&pid, |_, stores| {
            subscribed = stores.contains(store_id);
            true
        });
        subscribed
    }

    /// Maps a device network id and a table to the table's distributed
    /// name. Returns an empty string for an unknown device.
    pub fn obtain_distributed_table_name(&self, device: &str, table: &str) -> String {
        match self.deps.devices.to_uuid(device) {
            Some(uuid) => distributed_table_name(&uuid, table),
            None => {
                warn!(device = %anonymize(device), "no uuid for device");
                String::new()
            }
        }
    }

    /// Registers the notifier object of the calling process.
    pub fn init_notifier(
        &self,
        caller: &CallingIdentity,
        param: &RdbSyncerParam,
        notifier: Option<RemoteObjectRef>,
    ) -> ServiceResult<()> {
        self.check_access(caller, param)?;
        let notifier = notifier
            .ok_or_else(|| ServiceError::NotifierUnavailable("no notifier object".into()))?;
        let proxy = Arc::new(RdbNotifierProxy::new(Arc::clone(&notifier)));
        self.notifiers.insert_or_assign(caller.pid, Arc::clone(&proxy));
        // a death reported while linking is handled after the insert above
        let watcher = DeathWatcher::new(caller.pid, self.peer_events.clone());
        if !notifier.link_to_death(watcher) {
            let pid = caller.pid;
            self.notifiers
                .erase_if(|key, registered| *key == pid && Arc::ptr_eq(registered, &proxy));
            warn!(pid, "notifier already dead");
            return Err(ServiceError::NotifierUnavailable(format!("pid {pid} is dead")));
        }
        info!(pid = caller.pid, bundle = %param.bundle_name, "notifier registered");
        Ok(())
    }

    /// Marks `tables` of the caller's store as distributed.
    pub fn set_distributed_tables(
        &self,
        caller: &CallingIdentity,
        param: &RdbSyncerParam,
        tables: &[String],
    ) -> ServiceResult<()> {
        self.check_access(caller, param)?;
        self.get_rdb_syncer(caller, param)?
            .set_distributed_tables(tables)
    }

    /// Blocking sync.
    pub fn do_sync(
        &self,
        caller: &CallingIdentity,
        param: &RdbSyncerParam,
        option: &SyncOption,
        predicates: &RdbPredicates,
    ) -> ServiceResult<SyncResult> {
        self.check_access(caller, param)?;
        self.get_rdb_syncer(caller, param)?
            .do_sync(option, predicates)
    }

    /// Asynchronous sync; the result goes to the caller's notifier tagged
    /// with `seq_num`.
    pub fn do_async(
        &self,
        caller: &CallingIdentity,
        param: &RdbSyncerParam,
        seq_num: u32,
        option: &SyncOption,
        predicates: &RdbPredicates,
    ) -> ServiceResult<()> {
        self.check_access(caller, param)?;
        let syncer = self.get_rdb_syncer(caller, param)?;
        let service = self.self_ref.clone();
        let pid = caller.pid;
        debug!(pid, seq_num, store = %syncer.store_id(), "async sync requested");
        syncer.do_async(
            option,
            predicates,
            Box::new(move |result| {
                if let Some(service) = service.upgrade() {
                    service.on_async_complete(pid, seq_num, &result);
                }
            }),
        )
    }

    /// Subscribes the caller to remote changes of its store. The store's
    /// syncer stays open while the subscription lasts.
    pub fn do_subscribe(&self, caller: &CallingIdentity, param: &RdbSyncerParam) -> ServiceResult<()> {
        self.check_access(caller, param)?;
        let syncer = self.resolve_syncer(caller, param, true)?;
        info!(pid = caller.pid, store = %syncer.store_id(), "subscribed");
        Ok(())
    }

    /// Cancels the caller's subscription to its store.
    pub fn do_unsubscribe(&self, caller: &CallingIdentity, param: &RdbSyncerParam) -> ServiceResult<()> {
        self.check_access(caller, param)?;
        let store_id = param.store_id();
        self.subscriptions.compute_if_present(&caller.pid, |_, stores| {
            stores.remove(store_id);
            !stores.is_empty()
        });
        if let Some(identifier) = self.identifier_for(caller, param) {
            let pid = caller.pid;
            self.identifiers
                .erase_if(|key, owner| *key == identifier && *owner == pid);
        }
        info!(pid = caller.pid, store = %store_id, "unsubscribed");
        Ok(())
    }

    /// Runs `sql` on the remote device with network id `device`.
    pub fn remote_query(
        &self,
        caller: &CallingIdentity,
        param: &RdbSyncerParam,
        device: &str,
        sql: &str,
        selection_args: &[String],
    ) -> ServiceResult<Box<dyn ResultSet>> {
        self.check_access(caller, param)?;
        self.get_rdb_syncer(caller, param)?
            .remote_query(device, sql, selection_args)
    }

    /// Records store metadata with its permissions and creates the engine
    /// store. No syncer is kept.
    pub fn create_rdb_table(
        &self,
        caller: &CallingIdentity,
        param: &RdbSyncerParam,
        write_permission: &str,
        read_permission: &str,
    ) -> ServiceResult<()> {
        self.check_access(caller, param)?;
        let permissions = Permissions {
            write: write_permission,
            read: read_permission,
        };
        let syncer = self.open_syncer(caller, param.clone(), permissions)?;
        info!(pid = caller.pid, store = %syncer.store_id(), "rdb table created");
        Ok(())
    }

    /// Deletes the store metadata of the caller's store.
    pub fn destroy_rdb_table(&self, caller: &CallingIdentity, param: &RdbSyncerParam) -> ServiceResult<()> {
        self.check_access(caller, param)?;
        RdbSyncer::destroy_meta_data(&self.deps, &self.config, param, caller)
    }

    /// Routes an engine change to the owning process's notifier.
    ///
    /// `pid` 0 marks an auto-launched store, resolved through the
    /// identifier map.
    pub fn on_data_change(&self, pid: i32, data: &StoreChangedData) {
        let pid = if pid != 0 {
            pid
        } else {
            let identifier = hex::encode(data.property.identifier());
            match self.identifiers.find(&identifier) {
                Some(owner) => owner,
                None => {
                    debug!(store = %data.property.store_id, "no process for changed store");
                    return;
                }
            }
        };
        let Some(notifier) = self.notifiers.find(&pid) else {
            debug!(pid, "no notifier for change");
            return;
        };
        let Some(network_id) = self.deps.devices.to_network_id(&data.device) else {
            warn!(device = %anonymize(&data.device), "no network id for changed device");
            return;
        };
        debug!(pid, store = %data.property.store_id, device = %anonymize(&network_id), "data changed");
        notifier.on_change(&data.property.store_id, &[network_id]);
    }

    /// Delivers an async sync result to `pid` if it is still registered.
    pub fn on_async_complete(&self, pid: i32, seq_num: u32, result: &SyncResult) {
        match self.notifiers.find(&pid) {
            Some(notifier) => {
                debug!(pid, seq_num, devices = result.len(), "async sync complete");
                notifier.on_complete(seq_num, result);
            }
            None => debug!(pid, seq_num, "async result dropped, no notifier"),
        }
    }

    /// Releases everything held for a process that went away.
    pub fn on_client_died(&self, pid: i32) {
        let mut released = StoreSyncers::new();
        self.syncers.compute_if_present(&pid, |_, stores| {
            released = std::mem::take(stores);
            self.syncer_num.fetch_sub(released.len(), Ordering::SeqCst);
            false
        });
        self.notifiers.erase(&pid);
        self.subscriptions.erase(&pid);
        let identifiers = self.identifiers.erase_if(|_, owner| *owner == pid);
        info!(pid, syncers = released.len(), identifiers, "client died");
        drop(released);
    }

    /// Finds the persisted store whose engine identifier is `identifier`
    /// so the engine can open it for a peer.
    pub fn resolve_auto_launch(&self, identifier: &[u8]) -> Option<AutoLaunchParam> {
        let local = self.deps.devices.local_device().uuid;
        let prefix = StoreMetaData::get_prefix(&[local.as_str()]);
        let entries: Vec<StoreMetaData> = match self.deps.meta.load_prefix(&prefix) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "failed to load store metadata");
                return None;
            }
        };
        for meta in entries {
            if meta.store_type != STORE_TYPE_DEVICE_COLLABORATION {
                continue;
            }
            let property = StoreProperty::new(&meta.user, &meta.app_id, &meta.store_id);
            if property.identifier() != identifier {
                continue;
            }
            let mut option = StoreOption {
                observer: Some(Arc::new(SyncerObserver::new(self.self_ref.clone(), 0))),
                is_encrypted: meta.is_encrypt,
                ..StoreOption::default()
            };
            if meta.is_encrypt {
                option.iterate_times = self.config.iterate_times;
                option.cipher = CipherType::Aes256Gcm;
                match RdbSyncer::password(&self.deps, &meta) {
                    Ok(password) => option.password = password,
                    Err(err) => warn!(store = %meta.store_id, error = %err, "no password for auto launch"),
                }
            }
            info!(store = %meta.store_id, user = %meta.user, "auto launch resolved");
            return Some(AutoLaunchParam {
                property,
                path: PathBuf::from(&meta.data_dir),
                option,
            });
        }
        let shown = hex::encode(identifier.get(..3).unwrap_or(identifier));
        warn!(identifier = %shown, "no store for auto launch identifier");
        None
    }

    fn check_access(&self, caller: &CallingIdentity, param: &RdbSyncerParam) -> ServiceResult<()> {
        if self.deps.checker.check_access(caller, &param.bundle_name) {
            return Ok(());
        }
        warn!(pid = caller.pid, bundle = %param.bundle_name, "access denied");
        Err(ServiceError::AccessDenied(param.bundle_name.clone()))
    }

    fn identifier_for(&self, caller: &CallingIdentity, param: &RdbSyncerParam) -> Option<String> {
        let app_id = self.deps.checker.app_id(caller, &param.bundle_name)?;
        let user = self.deps.accounts.user_id(caller.uid);
        Some(hex::encode(
            StoreProperty::new(user, app_id, param.store_id()).identifier(),
        ))
    }

    fn get_rdb_syncer(&self, caller: &CallingIdentity, param: &RdbSyncerParam) -> ServiceResult<Arc<RdbSyncer>> {
        self.resolve_syncer(caller, param, false)
    }

    /// Resolves the syncer in one `compute` on the pid entry. With
    /// `subscribe`, the subscription is recorded under the same lock, so
    /// the idle timer never sees the syncer without it.
    ///
    /// Lock order is `syncers` then `subscriptions`.
    fn resolve_syncer(
        &self,
        caller: &CallingIdentity,
        param: &RdbSyncerParam,
        subscribe: bool,
    ) -> ServiceResult<Arc<RdbSyncer>> {
        let store_id = param.store_id().to_string();
        let mut outcome = None;
        self.syncers.compute(caller.pid, |_, stores| {
            let resolved = self.resolve_in_slot(caller, param, &store_id, stores);
            if subscribe && resolved.is_ok() {
                self.subscriptions.compute(caller.pid, |_, subscribed| {
                    subscribed.insert(store_id.clone());
                    true
                });
            }
            outcome = Some(resolved);
            !stores.is_empty()
        });

        let syncer = outcome
            .unwrap_or_else(|| Err(ServiceError::InitFailed(store_id.clone())))?;
        self.identifiers
            .insert_or_assign(syncer.identifier(), caller.pid);
        Ok(syncer)
    }

    fn resolve_in_slot(
        &self,
        caller: &CallingIdentity,
        param: &RdbSyncerParam,
        store_id: &str,
        stores: &mut StoreSyncers,
    ) -> ServiceResult<Arc<RdbSyncer>> {
        if let Some(existing) = stores.get(store_id) {
            if !param.has_password() {
                if let Some(timer_id) = existing.timer_id() {
                    self.timer.reset(timer_id);
                }
                return Ok(Arc::clone(existing));
            }
            debug!(pid = caller.pid, store = %store_id, "reopening store with new password");
            // the old delegate closes before the path is opened again
            drop(stores.remove(store_id));
            self.syncer_num.fetch_sub(1, Ordering::SeqCst);
        } else {
            if stores.len() >= self.config.max_syncer_per_process {
                warn!(pid = caller.pid, syncers = stores.len(), "per-process syncer limit reached");
                return Err(ServiceError::CapacityExhausted(format!(
                    "pid {} holds {} syncers",
                    caller.pid,
                    stores.len()
                )));
            }
            let total = self.syncer_num.load(Ordering::SeqCst);
            if total >= self.config.max_syncer_num {
                warn!(pid = caller.pid, syncers = total, "global syncer limit reached");
                return Err(ServiceError::CapacityExhausted(format!("{total} syncers alive")));
            }
        }

        let syncer = Arc::new(self.open_syncer(caller, param.clone(), Permissions::default())?);
        self.arm_idle_timer(&syncer);
        stores.insert(store_id.to_string(), Arc::clone(&syncer));
        self.syncer_num.fetch_add(1, Ordering::SeqCst);
        Ok(syncer)
    }

    fn open_syncer(
        &self,
        caller: &CallingIdentity,
        param: RdbSyncerParam,
        permissions: Permissions<'_>,
    ) -> ServiceResult<RdbSyncer> {
        let id = self.next_syncer_id.fetch_add(1, Ordering::SeqCst) + 1;
        let observer = Arc::new(SyncerObserver::new(self.self_ref.clone(), caller.pid));
        RdbSyncer::open(&self.deps, &self.config, id, param, *caller, permissions, observer)
            .map_err(|err| {
                warn!(pid = caller.pid, error = %err, "syncer init failed");
                err
            })
    }

    fn arm_idle_timer(&self, syncer: &Arc<RdbSyncer>) {
        let service = self.self_ref.clone();
        let pid = syncer.pid();
        let store_id = syncer.store_id().to_string();
        let syncer_id = syncer.id();
        let task: TimerTask = Arc::new(move || {
            if let Some(service) = service.upgrade() {
                service.on_syncer_idle(pid, &store_id, syncer_id);
            }
        });
        let timer_id = self.timer.register(task, self.config.syncer_timeout);
        syncer.attach_timer(&self.timer, timer_id);
    }

    fn on_syncer_idle(&self, pid: i32, store_id: &str, syncer_id: u64) {
        let mut evicted = None;
        self.syncers.compute_if_present(&pid, |_, stores| {
            if !stores.get(store_id).is_some_and(|syncer| syncer.id() == syncer_id) {
                return !stores.is_empty();
            }
            if self.is_subscribed(pid, store_id) {
                debug!(pid, store = %store_id, "idle syncer kept for subscription");
                return true;
            }
            evicted = stores.remove(store_id);
            self.syncer_num.fetch_sub(1, Ordering::SeqCst);
            !stores.is_empty()
        });
        if evicted.is_some() {
            info!(pid, store = %store_id, "idle syncer evicted");
        }
        drop(evicted);
    }
}

impl Drop for RdbServiceImpl {
    fn drop(&mut self) {
        self.timer.shutdown();
        // watchers still hold senders, so the channel alone never closes
        let _ = self.peer_events.send(PeerEvent::Closed);
    }
}

impl std::fmt::Debug for RdbServiceImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdbServiceImpl")
            .field("syncers", &self.syncer_count())
            .field("notifiers", &self.notifiers.len())
            .finish()
    }
}

fn spawn_liveness_thread(service: Weak<RdbServiceImpl>, mut receiver: PeerEventReceiver) -> ServiceResult<()> {
    thread::Builder::new()
        .name("rdbsync-liveness".into())
        .spawn(move || {
            while let Some(event) = receiver.blocking_recv() {
                let Some(service) = service.upgrade() else {
                    break;
                };
                match event {
                    PeerEvent::Died { pid } => service.on_client_died(pid),
                    PeerEvent::Closed => break,
                }
            }
            debug!("liveness thread stopped");
        })?;
    Ok(())
}

struct DeviceLogger;

impl DeviceObserver for DeviceLogger {
    fn on_device_changed(&self, device: &DeviceInfo, change: DeviceChange) {
        info!(device = %anonymize(&device.network_id), ?change, "device state changed");
    }
}
