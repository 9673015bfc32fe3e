//! Service-side handle to a client's notifier object.

use rdbsync_ipc::{MessageOption, RemoteObjectRef};
use rdbsync_protocol::{NotifierEvent, SyncResult};
use tracing::warn;

/// Sends completion and change events to one client process.
///
/// Events are one-way. A failed delivery is logged and dropped.
pub struct RdbNotifierProxy {
    remote: RemoteObjectRef,
}

impl RdbNotifierProxy {
    /// Wraps the client's notifier object.
    pub fn new(remote: RemoteObjectRef) -> Self {
        Self { remote }
    }

    /// The wrapped object.
    pub fn remote(&self) -> &RemoteObjectRef {
        &self.remote
    }

    /// Returns true while the client process is reachable.
    pub fn is_alive(&self) -> bool {
        self.remote.is_alive()
    }

    /// Delivers the result of the async sync `seq_num`.
    pub fn on_complete(&self, seq_num: u32, result: &SyncResult) -> bool {
        self.send(&NotifierEvent::SyncComplete {
            seq_num,
            result: result.clone(),
        })
    }

    /// Tells the client that `store_name` changed on `devices`.
    pub fn on_change(&self, store_name: &str, devices: &[String]) -> bool {
        self.send(&NotifierEvent::DataChange {
            store_name: store_name.to_string(),
            devices: devices.to_vec(),
        })
    }

    fn send(&self, event: &NotifierEvent) -> bool {
        let data = match event.encode() {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "failed to encode notifier event");
                return false;
            }
        };
        match self
            .remote
            .send_request(event.code().code(), data, MessageOption::OneWay)
        {
            Ok(_) => true,
            Err(err) => {
                warn!(code = ?event.code(), error = %err, "notifier delivery failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for RdbNotifierProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdbNotifierProxy")
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingNotifier;
    use rdbsync_ipc::{CallingIdentity, LocalObject};
    use std::sync::Arc;

    #[test]
    fn delivers_events() {
        let stub = Arc::new(RecordingNotifier::default());
        let object = LocalObject::new(Arc::clone(&stub), CallingIdentity::default());
        let proxy = RdbNotifierProxy::new(Arc::clone(&object).into_ref());

        let result: SyncResult = [("net-a", 0)].into_iter().collect();
        assert!(proxy.on_complete(3, &result));
        assert!(proxy.on_change("notes", &["net-a".to_string()]));

        let events = stub.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], NotifierEvent::SyncComplete { seq_num: 3, result });
        assert_eq!(
            events[1],
            NotifierEvent::DataChange {
                store_name: "notes".into(),
                devices: vec!["net-a".into()],
            }
        );
    }

    #[test]
    fn dead_client_is_not_retried() {
        let stub = Arc::new(RecordingNotifier::default());
        let object = LocalObject::new(Arc::clone(&stub), CallingIdentity::default());
        let proxy = RdbNotifierProxy::new(Arc::clone(&object).into_ref());
        object.kill();
        assert!(!proxy.is_alive());
        assert!(!proxy.on_change("notes", &[]));
        assert!(stub.events().is_empty());
    }
}
