//! Device manager interface and a static reference implementation.
//!
//! Devices have two names: the network id used by clients, and the uuid
//! used by the storage engine.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rdbsync_ipc::LruBucket;

/// Translation cache capacity of [`StaticDeviceManager`].
pub const TRANSLATION_CACHE_SIZE: usize = 64;

/// A known device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable id used by the storage engine.
    pub uuid: String,
    /// Id used by clients.
    pub network_id: String,
    /// Display name.
    pub name: String,
    /// Device class, e.g. `"phone"`.
    pub device_type: String,
}

impl DeviceInfo {
    /// Creates a device with empty name and type.
    pub fn new(uuid: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            network_id: network_id.into(),
            ..Self::default()
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Online state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChange {
    /// The device came online.
    Online,
    /// The device went offline.
    Offline,
}

/// Receives device online/offline transitions.
pub trait DeviceObserver: Send + Sync {
    /// Called after `device` changed state.
    fn on_device_changed(&self, device: &DeviceInfo, change: DeviceChange);
}

/// Source of device identity and connectivity.
pub trait DeviceManager: Send + Sync {
    /// The local device.
    fn local_device(&self) -> DeviceInfo;

    /// Remote devices currently online.
    fn remote_devices(&self) -> Vec<DeviceInfo>;

    /// Uuid of the device with `network_id`.
    fn to_uuid(&self, network_id: &str) -> Option<String>;

    /// Network id of the device with `uuid`.
    fn to_network_id(&self, uuid: &str) -> Option<String>;

    /// Registers an observer for online/offline transitions.
    fn register_observer(&self, observer: Arc<dyn DeviceObserver>);
}

/// Shortens a device id for logs, keeping 4 characters at each end.
pub fn anonymize(id: &str) -> String {
    const KEEP: usize = 4;
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= KEEP * 2 {
        return "******".to_string();
    }
    let head: String = chars[..KEEP].iter().collect();
    let tail: String = chars[chars.len() - KEEP..].iter().collect();
    format!("{head}***{tail}")
}

#[derive(Debug)]
struct KnownDevice {
    info: DeviceInfo,
    online: bool,
}

/// [`DeviceManager`] over a device list maintained by the caller.
pub struct StaticDeviceManager {
    local: DeviceInfo,
    devices: Mutex<HashMap<String, KnownDevice>>,
    observers: Mutex<Vec<Arc<dyn DeviceObserver>>>,
    uuid_cache: LruBucket<String, String>,
    network_cache: LruBucket<String, String>,
}

impl StaticDeviceManager {
    /// Creates a manager with no remote devices.
    pub fn new(local: DeviceInfo) -> Self {
        Self {
            local,
            devices: Mutex::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
            uuid_cache: LruBucket::new(TRANSLATION_CACHE_SIZE),
            network_cache: LruBucket::new(TRANSLATION_CACHE_SIZE),
        }
    }

    /// Adds a remote device, replacing one with the same uuid.
    pub fn add_device(&self, info: DeviceInfo, online: bool) {
        self.invalidate(&info.uuid);
        let previous = self.devices.lock().insert(
            info.uuid.clone(),
            KnownDevice {
                info: info.clone(),
                online,
            },
        );
        let was_online = previous.is_some_and(|device| device.online);
        if online && !was_online {
            self.notify(&info, DeviceChange::Online);
        }
    }

    /// Marks a known device online. Returns false if it is unknown.
    pub fn set_online(&self, uuid: &str) -> bool {
        self.set_state(uuid, true)
    }

    /// Marks a known device offline. Returns false if it is unknown.
    pub fn set_offline(&self, uuid: &str) -> bool {
        self.set_state(uuid, false)
    }

    /// Forgets a device.
    pub fn remove_device(&self, uuid: &str) -> Option<DeviceInfo> {
        self.invalidate(uuid);
        let removed = self.devices.lock().remove(uuid)?;
        if removed.online {
            self.notify(&removed.info, DeviceChange::Offline);
        }
        Some(removed.info)
    }

    fn set_state(&self, uuid: &str, online: bool) -> bool {
        let changed = {
            let mut devices = self.devices.lock();
            let Some(device) = devices.get_mut(uuid) else {
                return false;
            };
            let changed = device.online != online;
            device.online = online;
            changed.then(|| device.info.clone())
        };
        if let Some(info) = changed {
            let change = if online {
                DeviceChange::Online
            } else {
                DeviceChange::Offline
            };
            self.notify(&info, change);
        }
        true
    }

    fn invalidate(&self, uuid: &str) {
        if let Some(network_id) = self.network_cache.get(&uuid.to_string()) {
            self.uuid_cache.delete(&network_id);
        }
        self.network_cache.delete(&uuid.to_string());
    }

    fn notify(&self, info: &DeviceInfo, change: DeviceChange) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer.on_device_changed(info, change);
        }
    }

    fn find<F>(&self, matches: F) -> Option<DeviceInfo>
    where
        F: Fn(&DeviceInfo) -> bool,
    {
        if matches(&self.local) {
            return Some(self.local.clone());
        }
        self.devices
            .lock()
            .values()
            .find(|device| matches(&device.info))
            .map(|device| device.info.clone())
    }
}

impl DeviceManager for StaticDeviceManager {
    fn local_device(&self) -> DeviceInfo {
        self.local.clone()
    }

    fn remote_devices(&self) -> Vec<DeviceInfo> {
        let mut online: Vec<DeviceInfo> = self
            .devices
            .lock()
            .values()
            .filter(|device| device.online)
            .map(|device| device.info.clone())
            .collect();
        online.sort_by(|a, b| a.network_id.cmp(&b.network_id));
        online
    }

    fn to_uuid(&self, network_id: &str) -> Option<String> {
        let key = network_id.to_string();
        if let Some(uuid) = self.uuid_cache.get(&key) {
            return Some(uuid);
        }
        let info = self.find(|info| info.network_id == network_id)?;
        self.uuid_cache.set(key, info.uuid.clone());
        self.network_cache.set(info.uuid.clone(), info.network_id);
        Some(info.uuid)
    }

    fn to_network_id(&self, uuid: &str) -> Option<String> {
        let key = uuid.to_string();
        if let Some(network_id) = self.network_cache.get(&key) {
            return Some(network_id);
        }
        let info = self.find(|info| info.uuid == uuid)?;
        self.network_cache.set(key, info.network_id.clone());
        self.uuid_cache.set(info.network_id.clone(), info.uuid);
        Some(info.network_id)
    }

    fn register_observer(&self, observer: Arc<dyn DeviceObserver>) {
        self.observers.lock().push(observer);
    }
}

impl std::fmt::Debug for StaticDeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticDeviceManager")
            .field("local", &self.local)
            .field("devices", &self.devices.lock().len())
            .finish()
    }
}
