//! Engine change observer bound to one client process.

use std::sync::Weak;

use rdbsync_store::{StoreChangedData, StoreObserver};

use crate::service::RdbServiceImpl;

/// Forwards engine change events to the service.
///
/// Holds the service weakly; events arriving after shutdown are dropped.
/// `pid` is `0` for stores the engine launched on its own.
pub struct SyncerObserver {
    service: Weak<RdbServiceImpl>,
    pid: i32,
}

impl SyncerObserver {
    /// Creates an observer reporting changes as `pid`.
    pub fn new(service: Weak<RdbServiceImpl>, pid: i32) -> Self {
        Self { service, pid }
    }
}

impl StoreObserver for SyncerObserver {
    fn on_change(&self, data: &StoreChangedData) {
        if let Some(service) = self.service.upgrade() {
            service.on_data_change(self.pid, data);
        }
    }
}
