//! Remote objects and the in-process transport.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{IpcError, IpcResult};
use crate::liveness::DeathWatcher;
use crate::parcel::Parcel;

/// Stub return code for a request whose interface token does not match.
pub const ERR_INTERFACE_TOKEN: i32 = -1;

/// Stub return code for a request code the stub does not know.
pub const ERR_UNKNOWN_CODE: i32 = -2;

/// Stub return code for a request body that failed to decode.
pub const ERR_INVALID_DATA: i32 = -3;

/// How a request is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageOption {
    /// The caller waits for the reply.
    #[default]
    Sync,
    /// Fire and forget; the reply is discarded.
    OneWay,
}

/// Identity of the process issuing a request, as seen by the stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallingIdentity {
    /// Process id.
    pub pid: i32,
    /// User id.
    pub uid: i32,
    /// Access token id.
    pub token_id: u32,
}

impl CallingIdentity {
    /// Creates a calling identity.
    pub fn new(pid: i32, uid: i32, token_id: u32) -> Self {
        Self { pid, uid, token_id }
    }
}

/// A handle to an object living in another process.
pub trait RemoteObject: Send + Sync {
    /// Interface descriptor of the object.
    fn descriptor(&self) -> &str;

    /// Sends a request and returns the reply parcel.
    ///
    /// One-way requests return an empty parcel.
    fn send_request(&self, code: u32, data: Parcel, option: MessageOption) -> IpcResult<Parcel>;

    /// Returns true while the peer is reachable.
    fn is_alive(&self) -> bool;

    /// Links a death watcher. Returns false if the peer is already dead.
    fn link_to_death(&self, watcher: DeathWatcher) -> bool;
}

/// Shared handle to a [`RemoteObject`].
pub type RemoteObjectRef = Arc<dyn RemoteObject>;

/// The receiving side of an interface.
pub trait RemoteStub: Send + Sync {
    /// Interface descriptor this stub serves.
    fn descriptor(&self) -> &str;

    /// Handles one request. A non-zero return fails the transaction.
    fn on_remote_request(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        caller: &CallingIdentity,
    ) -> i32;
}

/// In-process [`RemoteObject`] that dispatches straight into a stub.
///
/// Every request is attributed to the fixed `caller` identity, which stands
/// for the process holding this handle. Dispatch is synchronous on the
/// calling thread, including one-way requests.
pub struct LocalObject<S: RemoteStub> {
    stub: Arc<S>,
    caller: CallingIdentity,
    alive: AtomicBool,
    watchers: Mutex<Vec<DeathWatcher>>,
}

impl<S: RemoteStub> LocalObject<S> {
    /// Wraps `stub`, attributing requests to `caller`.
    pub fn new(stub: Arc<S>, caller: CallingIdentity) -> Arc<Self> {
        Arc::new(Self {
            stub,
            caller,
            alive: AtomicBool::new(true),
            watchers: Mutex::new(Vec::new()),
        })
    }

    /// The wrapped stub.
    pub fn stub(&self) -> &Arc<S> {
        &self.stub
    }

    /// The identity requests are attributed to.
    pub fn caller(&self) -> CallingIdentity {
        self.caller
    }

    /// Marks the peer dead and notifies every linked watcher once.
    pub fn kill(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        let watchers = std::mem::take(&mut *self.watchers.lock());
        tracing::debug!(
            descriptor = self.stub.descriptor(),
            watchers = watchers.len(),
            "remote object died"
        );
        for watcher in watchers {
            watcher.notify_died();
        }
    }
}

impl<S: RemoteStub + 'static> LocalObject<S> {
    /// Converts into a type-erased handle.
    pub fn into_ref(self: Arc<Self>) -> RemoteObjectRef {
        self
    }
}

impl<S: RemoteStub> RemoteObject for LocalObject<S> {
    fn descriptor(&self) -> &str {
        self.stub.descriptor()
    }

    fn send_request(&self, code: u32, mut data: Parcel, option: MessageOption) -> IpcResult<Parcel> {
        if !self.is_alive() {
            return Err(IpcError::DeadObject);
        }
        data.rewind();
        let mut reply = Parcel::new();
        let status = self
            .stub
            .on_remote_request(code, &mut data, &mut reply, &self.caller);
        if status != 0 {
            return Err(IpcError::TransactionFailed(status));
        }
        match option {
            MessageOption::Sync => Ok(reply),
            MessageOption::OneWay => Ok(Parcel::new()),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn link_to_death(&self, watcher: DeathWatcher) -> bool {
        let mut watchers = self.watchers.lock();
        // checked under the lock so kill() cannot miss a late watcher
        if !self.is_alive() {
            return false;
        }
        watchers.push(watcher);
        true
    }
}

impl<S: RemoteStub> fmt::Debug for LocalObject<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalObject")
            .field("descriptor", &self.stub.descriptor())
            .field("caller", &self.caller)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::{peer_event_channel, PeerEvent};

    struct Echo;

    impl RemoteStub for Echo {
        fn descriptor(&self) -> &str {
            "test.IEcho"
        }

        fn on_remote_request(
            &self,
            code: u32,
            data: &mut Parcel,
            reply: &mut Parcel,
            caller: &CallingIdentity,
        ) -> i32 {
            if data.enforce_interface(self.descriptor()).is_err() {
                return ERR_INTERFACE_TOKEN;
            }
            match code {
                0 => {
                    let Ok(value) = data.read_string() else {
                        return ERR_UNKNOWN_CODE;
                    };
                    let _ = reply.write_string(&value);
                    let _ = reply.write_i32(caller.pid);
                    0
                }
                _ => ERR_UNKNOWN_CODE,
            }
        }
    }

    fn request(value: &str) -> Parcel {
        let mut data = Parcel::new();
        data.write_interface_token("test.IEcho").unwrap();
        data.write_string(value).unwrap();
        data
    }

    #[test]
    fn dispatches_with_caller_identity() {
        let object = LocalObject::new(Arc::new(Echo), CallingIdentity::new(77, 1000, 5));
        let mut reply = object.send_request(0, request("hi"), MessageOption::Sync).unwrap();
        assert_eq!(reply.read_string().unwrap(), "hi");
        assert_eq!(reply.read_i32().unwrap(), 77);
    }

    #[test]
    fn one_way_discards_reply() {
        let object = LocalObject::new(Arc::new(Echo), CallingIdentity::default());
        let reply = object.send_request(0, request("x"), MessageOption::OneWay).unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn stub_failure_code() {
        let object = LocalObject::new(Arc::new(Echo), CallingIdentity::default());
        assert_eq!(
            object.send_request(9, request("x"), MessageOption::Sync).unwrap_err(),
            IpcError::TransactionFailed(ERR_UNKNOWN_CODE)
        );
        assert_eq!(
            object.send_request(0, Parcel::new(), MessageOption::Sync).unwrap_err(),
            IpcError::TransactionFailed(ERR_INTERFACE_TOKEN)
        );
    }

    #[test]
    fn kill_notifies_watchers_once() {
        let object = LocalObject::new(Arc::new(Echo), CallingIdentity::default());
        let (tx, mut rx) = peer_event_channel();
        assert!(object.link_to_death(DeathWatcher::new(12, tx.clone())));

        object.kill();
        object.kill();

        assert_eq!(rx.try_recv().unwrap(), PeerEvent::Died { pid: 12 });
        assert!(rx.try_recv().is_err());
        assert!(!object.is_alive());
        assert!(!object.link_to_death(DeathWatcher::new(12, tx)));
        assert_eq!(
            object.send_request(0, request("x"), MessageOption::Sync).unwrap_err(),
            IpcError::DeadObject
        );
    }

    #[test]
    fn type_erased_handle() {
        let object = LocalObject::new(Arc::new(Echo), CallingIdentity::default()).into_ref();
        assert_eq!(object.descriptor(), "test.IEcho");
        assert!(object.is_alive());
    }
}
