//! Client-side receiver of service notifications.

use rdbsync_ipc::{
    CallingIdentity, Parcel, RemoteStub, ERR_INTERFACE_TOKEN, ERR_INVALID_DATA, ERR_UNKNOWN_CODE,
};
use rdbsync_protocol::{NotifierCode, NotifierEvent, SyncResult, NOTIFIER_DESCRIPTOR};
use tracing::{debug, warn};

/// Handler for async sync completions.
pub type CompleteHandler = Box<dyn Fn(u32, SyncResult) + Send + Sync>;

/// Handler for remote data changes: store name and devices.
pub type ChangeHandler = Box<dyn Fn(&str, &[String]) + Send + Sync>;

/// Decodes notifier events and hands them to the registered handlers.
pub struct RdbNotifierStub {
    on_complete: CompleteHandler,
    on_change: ChangeHandler,
}

impl RdbNotifierStub {
    /// Creates a stub calling `on_complete` and `on_change`.
    pub fn new(on_complete: CompleteHandler, on_change: ChangeHandler) -> Self {
        Self {
            on_complete,
            on_change,
        }
    }
}

impl RemoteStub for RdbNotifierStub {
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
            warn!(code, "notifier event with bad interface token");
            return ERR_INTERFACE_TOKEN;
        }
        let Some(code) = NotifierCode::from_code(code) else {
            warn!(code, "unknown notifier event");
            return ERR_UNKNOWN_CODE;
        };
        let event = match NotifierEvent::decode(code, data) {
            Ok(event) => event,
            Err(err) => {
                warn!(?code, error = %err, "undecodable notifier event");
                return ERR_INVALID_DATA;
            }
        };
        match event {
            NotifierEvent::SyncComplete { seq_num, result } => {
                debug!(seq_num, devices = result.len(), "sync complete");
                (self.on_complete)(seq_num, result);
            }
            NotifierEvent::DataChange {
                store_name,
                devices,
            } => {
                debug!(store = %store_name, devices = devices.len(), "data change");
                (self.on_change)(&store_name, &devices);
            }
        }
        0
    }
}
