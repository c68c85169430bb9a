//! Device Tracker (§4.A): the set of devices this process currently holds
//! allocated on behalf of a remote peer (DT-1). Injected as a shared
//! dependency rather than accessed through a global/static, per the
//! singleton re-architecture note in §9.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::device::manager::DeviceHandle;

/// Thread-safe map from device serial to the handle this process is holding
/// for a remote peer. All operations are safe under concurrent call.
#[derive(Default)]
pub struct DeviceTracker {
    devices: Mutex<HashMap<String, Arc<dyn DeviceHandle>>>,
}

impl DeviceTracker {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Records that `handle` is now held on behalf of a remote peer.
    /// Overwrites silently if the serial is already tracked: the caller has
    /// already reconciled any prior allocation.
    pub async fn allocate(&self, handle: Arc<dyn DeviceHandle>) {
        let serial = handle.serial().to_string();
        self.devices.lock().await.insert(serial, handle);
    }

    /// Removes and returns the tracked handle for `serial`, or `None` if it
    /// was not being tracked.
    pub async fn free(&self, serial: &str) -> Option<Arc<dyn DeviceHandle>> {
        self.devices.lock().await.remove(serial)
    }

    /// Atomically drains every tracked device, returning their handles.
    pub async fn free_all(&self) -> Vec<Arc<dyn DeviceHandle>> {
        let mut devices = self.devices.lock().await;
        devices.drain().map(|(_, handle)| handle).collect()
    }

    /// Returns the serials currently tracked, for diagnostics and tests.
    pub async fn tracked_serials(&self) -> Vec<String> {
        self.devices.lock().await.keys().cloned().collect()
    }

    pub async fn is_tracked(&self, serial: &str) -> bool {
        self.devices.lock().await.contains_key(serial)
    }
}
