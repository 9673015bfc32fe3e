//! Client-side proxy of the RdbSync service.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rdbsync_ipc::{CallingIdentity, ConcurrentMap, LocalObject, MessageOption, Parcel, RemoteObjectRef};
use rdbsync_protocol::{
    RdbPredicates, RdbRequest, RdbStatus, RdbSyncerParam, SubscribeMode, SubscribeOption,
    SyncMode, SyncOption, SyncResult,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::notifier_stub::RdbNotifierStub;
use crate::observer::{ObserverEntry, RdbStoreObserver};
use crate::result_set::ResultSetProxy;

/// Completion callback of a sync.
pub type SyncCallback = Box<dyn FnOnce(&SyncResult) + Send>;

/// Talks to the service on behalf of one client process.
///
/// The proxy owns the process's notifier object, the pending async sync
/// callbacks keyed by sequence number and the store observers keyed by
/// store id.
pub struct RdbServiceProxy {
    remote: RemoteObjectRef,
    notifier: Mutex<Option<Arc<LocalObject<RdbNotifierStub>>>>,
    seq_num: AtomicU32,
    callbacks: ConcurrentMap<u32, SyncCallback>,
    observers: ConcurrentMap<String, ObserverEntry>,
    self_ref: Weak<RdbServiceProxy>,
}

impl RdbServiceProxy {
    /// Wraps the service object.
    pub fn new(remote: RemoteObjectRef) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            remote,
            notifier: Mutex::new(None),
            seq_num: AtomicU32::new(0),
            callbacks: ConcurrentMap::new(),
            observers: ConcurrentMap::new(),
            self_ref: self_ref.clone(),
        })
    }

    /// The wrapped service object.
    pub fn remote(&self) -> &RemoteObjectRef {
        &self.remote
    }

    /// Returns true once a notifier has been registered.
    pub fn has_notifier(&self) -> bool {
        self.notifier.lock().is_some()
    }

    /// Number of async syncs still waiting for their result.
    pub fn pending_syncs(&self) -> usize {
        self.callbacks.len()
    }

    /// Creates the notifier object if needed and registers it with the
    /// service.
    pub fn init_notifier(&self, param: &RdbSyncerParam) -> ClientResult<()> {
        let mut slot = self.notifier.lock();
        let object = match slot.as_ref() {
            Some(object) => Arc::clone(object),
            None => self.new_notifier(),
        };
        let request = RdbRequest::InitNotifier {
            param: param.clone(),
            notifier: Some(Arc::clone(&object).into_ref()),
        };
        if let Err(err) = self.send_status(&request) {
            warn!(store = %param.store_name, error = %err, "notifier registration failed");
            return Err(match err {
                ClientError::Status(_) => ClientError::NotifierUnavailable,
                other => other,
            });
        }
        *slot = Some(object);
        info!(store = %param.store_name, "notifier registered");
        Ok(())
    }

    fn new_notifier(&self) -> Arc<LocalObject<RdbNotifierStub>> {
        let complete = self.self_ref.clone();
        let change = self.self_ref.clone();
        let stub = RdbNotifierStub::new(
            Box::new(move |seq_num, result| {
                if let Some(proxy) = complete.upgrade() {
                    proxy.on_sync_complete(seq_num, &result);
                }
            }),
            Box::new(move |store, devices| {
                if let Some(proxy) = change.upgrade() {
                    proxy.on_data_change(store, devices);
                }
            }),
        );
        LocalObject::new(Arc::new(stub), CallingIdentity::default())
    }

    /// Withdraws the notifier object. The service treats the process as gone
    /// and releases its stores; pending async syncs are dropped and
    /// [`sync_async`](Self::sync_async) callers see
    /// [`ClientError::Cancelled`].
    pub fn close(&self) {
        let notifier = self.notifier.lock().take();
        if let Some(notifier) = notifier {
            notifier.kill();
        }
        let dropped = self.callbacks.erase_if(|_, _| true);
        info!(dropped, "proxy closed");
    }

    /// Returns the name of `table` as distributed from `device`, or an
    /// empty string if the service does not know the device.
    pub fn obtain_distributed_table_name(&self, device: &str, table: &str) -> ClientResult<String> {
        let request = RdbRequest::ObtainTable {
            device: device.to_string(),
            table: table.to_string(),
        };
        let mut reply = self.send(&request)?;
        Ok(reply.read_string()?)
    }

    /// Marks `tables` of the store as distributed.
    pub fn set_distributed_tables(&self, param: &RdbSyncerParam, tables: &[String]) -> ClientResult<()> {
        self.send_status(&RdbRequest::SetDistributedTables {
            param: param.clone(),
            tables: tables.to_vec(),
        })
    }

    /// Syncs the store.
    ///
    /// A blocking option waits for the result and hands it to `callback`
    /// before returning. Otherwise the callback runs when the service
    /// reports completion.
    pub fn sync(
        &self,
        param: &RdbSyncerParam,
        option: &SyncOption,
        predicates: &RdbPredicates,
        callback: SyncCallback,
    ) -> ClientResult<()> {
        if !option.is_block {
            return self.do_async(param, option, predicates, callback);
        }
        let result = self.do_sync(param, option, predicates)?;
        callback(&result);
        Ok(())
    }

    /// Runs a blocking sync and returns the per-device result.
    pub fn do_sync(
        &self,
        param: &RdbSyncerParam,
        option: &SyncOption,
        predicates: &RdbPredicates,
    ) -> ClientResult<SyncResult> {
        let request = RdbRequest::Sync {
            param: param.clone(),
            option: *option,
            predicates: predicates.clone(),
        };
        let mut reply = self.send(&request)?;
        check_status(&mut reply)?;
        Ok(reply.read()?)
    }

    fn do_async(
        &self,
        param: &RdbSyncerParam,
        option: &SyncOption,
        predicates: &RdbPredicates,
        callback: SyncCallback,
    ) -> ClientResult<()> {
        if !self.has_notifier() {
            return Err(ClientError::NotifierUnavailable);
        }
        let seq_num = self.seq_num.fetch_add(1, Ordering::SeqCst);
        // registered first: the completion may arrive before the reply
        if !self.callbacks.insert(seq_num, callback) {
            return Err(ClientError::DuplicateSequence(seq_num));
        }
        let request = RdbRequest::Async {
            param: param.clone(),
            seq_num,
            option: *option,
            predicates: predicates.clone(),
        };
        debug!(seq_num, store = %param.store_name, "async sync");
        if let Err(err) = self.send_status(&request) {
            self.callbacks.erase(&seq_num);
            return Err(err);
        }
        Ok(())
    }

    /// Starts an asynchronous sync and resolves with its result.
    pub async fn sync_async(
        &self,
        param: &RdbSyncerParam,
        mode: SyncMode,
        predicates: &RdbPredicates,
    ) -> ClientResult<SyncResult> {
        let (sender, receiver) = oneshot::channel();
        let callback: SyncCallback = Box::new(move |result| {
            let _ = sender.send(result.clone());
        });
        self.do_async(param, &SyncOption::asynchronous(mode), predicates, callback)?;
        receiver.await.map_err(|_| ClientError::Cancelled)
    }

    /// Completes the async sync `seq_num`. Unknown or already completed
    /// sequence numbers are ignored.
    pub fn on_sync_complete(&self, seq_num: u32, result: &SyncResult) {
        match self.callbacks.erase(&seq_num) {
            Some(callback) => callback(result),
            None => debug!(seq_num, "completion for unknown sequence number"),
        }
    }

    /// Subscribes `observer` to remote changes of the store.
    pub fn subscribe(
        &self,
        param: &RdbSyncerParam,
        option: &SubscribeOption,
        observer: Arc<dyn RdbStoreObserver>,
    ) -> ClientResult<()> {
        if option.mode != SubscribeMode::Remote {
            return Err(ClientError::NotSupported(format!("{:?} subscription", option.mode)));
        }
        self.send_status(&RdbRequest::Subscribe { param: param.clone() })?;
        let store_id = param.store_id().to_string();
        self.observers.compute(store_id, |_, entry| {
            entry.param = param.clone();
            entry.add(observer);
            true
        });
        debug!(store = %param.store_name, "subscribed");
        Ok(())
    }

    /// Removes `observer`. The service subscription is cancelled once the
    /// store has no observers left.
    pub fn unsubscribe(
        &self,
        param: &RdbSyncerParam,
        option: &SubscribeOption,
        observer: &Arc<dyn RdbStoreObserver>,
    ) -> ClientResult<()> {
        if option.mode != SubscribeMode::Remote {
            return Err(ClientError::NotSupported(format!("{:?} subscription", option.mode)));
        }
        let mut last = false;
        self.observers.compute_if_present(&param.store_id().to_string(), |_, entry| {
            entry.remove(observer);
            last = entry.observers.is_empty();
            !last
        });
        if last {
            self.send_status(&RdbRequest::Unsubscribe { param: param.clone() })?;
            debug!(store = %param.store_name, "unsubscribed");
        }
        Ok(())
    }

    /// Hands a remote change of `store_id` to the store's observers.
    pub fn on_data_change(&self, store_id: &str, devices: &[String]) {
        let Some(entry) = self.observers.find(&store_id.to_string()) else {
            debug!(store = %store_id, "change for store without observers");
            return;
        };
        for observer in &entry.observers {
            observer.on_change(devices);
        }
    }

    /// Runs `sql` on the remote `device` (network id).
    pub fn remote_query(
        &self,
        param: &RdbSyncerParam,
        device: &str,
        sql: &str,
        selection_args: &[String],
    ) -> ClientResult<ResultSetProxy> {
        let request = RdbRequest::RemoteQuery {
            param: param.clone(),
            device: device.to_string(),
            sql: sql.to_string(),
            selection_args: selection_args.to_vec(),
        };
        let mut reply = self.send(&request)?;
        let status = RdbStatus::from_code(reply.read_i32()?);
        if !status.is_ok() {
            let engine = reply.read_i32().unwrap_or(-1);
            return Err(ClientError::RemoteQuery { status, engine });
        }
        let object = reply.read_remote_object()?.ok_or(ClientError::MissingObject)?;
        Ok(ResultSetProxy::new(object))
    }

    /// Creates the store's distributed table with the given permissions.
    pub fn create_rdb_table(
        &self,
        param: &RdbSyncerParam,
        write_permission: &str,
        read_permission: &str,
    ) -> ClientResult<()> {
        self.send_status(&RdbRequest::CreateRdbTable {
            param: param.clone(),
            write_permission: write_permission.to_string(),
            read_permission: read_permission.to_string(),
        })
    }

    /// Removes the store's metadata from the service.
    pub fn destroy_rdb_table(&self, param: &RdbSyncerParam) -> ClientResult<()> {
        self.send_status(&RdbRequest::DestroyRdbTable { param: param.clone() })
    }

    /// Snapshot of the registered observers.
    pub fn export_observers(&self) -> Vec<ObserverEntry> {
        let mut entries = Vec::new();
        self.observers.for_each(|_, entry| entries.push(entry.clone()));
        entries
    }

    /// Subscribes every observer in `entries`, typically exported from a
    /// proxy of a service that restarted. Returns the number of observers
    /// subscribed.
    pub fn import_observers(&self, entries: Vec<ObserverEntry>) -> usize {
        let mut restored = 0;
        for entry in entries {
            for observer in entry.observers {
                match self.subscribe(&entry.param, &SubscribeOption::remote(), observer) {
                    Ok(()) => restored += 1,
                    Err(err) => {
                        warn!(store = %entry.param.store_name, error = %err, "failed to restore observer")
                    }
                }
            }
        }
        restored
    }

    fn send(&self, request: &RdbRequest) -> ClientResult<Parcel> {
        let data = request.encode()?;
        Ok(self
            .remote
            .send_request(request.code().code(), data, MessageOption::Sync)?)
    }

    fn send_status(&self, request: &RdbRequest) -> ClientResult<()> {
        let mut reply = self.send(request)?;
        check_status(&mut reply)
    }
}

impl std::fmt::Debug for RdbServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdbServiceProxy")
            .field("notifier", &self.has_notifier())
            .field("pending_syncs", &self.callbacks.len())
            .field("observed_stores", &self.observers.len())
            .finish()
    }
}

fn check_status(reply: &mut Parcel) -> ClientResult<()> {
    let status = RdbStatus::from_code(reply.read_i32()?);
    if status.is_ok() {
        Ok(())
    } else {
        Err(ClientError::Status(status))
    }
}
