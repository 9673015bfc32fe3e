//! Store change observers registered by applications.

use std::sync::Arc;

use rdbsync_protocol::RdbSyncerParam;

/// Receives remote changes of a subscribed store.
pub trait RdbStoreObserver: Send + Sync {
    /// Called with the network ids of the devices whose data changed.
    fn on_change(&self, devices: &[String]);
}

/// Observers subscribed to one store, with the parameters used to
/// subscribe them.
#[derive(Clone, Default)]
pub struct ObserverEntry {
    /// Store the observers are subscribed to.
    pub param: RdbSyncerParam,
    /// Registered observers, without duplicates.
    pub observers: Vec<Arc<dyn RdbStoreObserver>>,
}

impl ObserverEntry {
    /// Adds `observer` unless the same instance is already present.
    /// Returns true if it was added.
    pub fn add(&mut self, observer: Arc<dyn RdbStoreObserver>) -> bool {
        if self.contains(&observer) {
            return false;
        }
        self.observers.push(observer);
        true
    }

    /// Removes `observer`. Returns true if it was present.
    pub fn remove(&mut self, observer: &Arc<dyn RdbStoreObserver>) -> bool {
        let before = self.observers.len();
        self.observers.retain(|known| !same_observer(known, observer));
        self.observers.len() != before
    }

    /// Returns true if `observer` is registered.
    pub fn contains(&self, observer: &Arc<dyn RdbStoreObserver>) -> bool {
        self.observers.iter().any(|known| same_observer(known, observer))
    }
}

impl std::fmt::Debug for ObserverEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverEntry")
            .field("store", &self.param.store_name)
            .field("observers", &self.observers.len())
            .finish()
    }
}

// compares data pointers only; vtable pointers differ across codegen units
fn same_observer(a: &Arc<dyn RdbStoreObserver>, b: &Arc<dyn RdbStoreObserver>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}
