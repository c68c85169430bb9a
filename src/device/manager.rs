//! External collaborator port: the device manager (§6.2). The scheduler
//! core never talks to the underlying adb/fastboot bridge directly — it
//! only calls through this trait, exactly as the reference service's
//! `Storage` trait isolates SSH execution behind an interface.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use crate::device::state_machine::{DeviceAllocationState, FreeDeviceState};

/// A live handle on a device, owned by the external device manager. The
/// scheduler core only ever borrows these through `Arc`.
pub trait DeviceHandle: Send + Sync + fmt::Debug {
    fn serial(&self) -> &str;
}

/// Criteria a command's requested device must satisfy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRequirements {
    pub serial: Option<String>,
    pub product: Option<String>,
    pub min_sdk_version: Option<u32>,
    pub allow_stub: bool,
}

/// A point-in-time snapshot of one device's attributes, as sent over the
/// wire for `ListDevices` (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub serial: String,
    pub is_stub: bool,
    pub state: DeviceAllocationState,
    pub product: String,
    pub product_variant: String,
    pub sdk_version: u32,
    pub build_id: String,
    pub battery_level: Option<u8>,
}

/// External collaborator responsible for the actual device fleet. Never
/// implemented by this crate's domain logic; a concrete adapter is wired in
/// by the binary's `main.rs`. Tests substitute a fake.
#[async_trait]
pub trait DeviceManager: Send + Sync {
    /// Attempts to allocate a device matching `requirements`, waiting up to
    /// `timeout`. Returns `None` on timeout or exhaustion, never blocks
    /// indefinitely.
    async fn allocate_device(
        &self,
        timeout: Duration,
        requirements: &DeviceRequirements,
    ) -> Option<std::sync::Arc<dyn DeviceHandle>>;

    /// Force-allocates a specific serial regardless of its current state,
    /// used during handover intake (§4.E).
    async fn force_allocate_device(&self, serial: &str) -> Option<std::sync::Arc<dyn DeviceHandle>>;

    /// Releases `handle` back to the fleet in the given free state.
    async fn free_device(&self, handle: std::sync::Arc<dyn DeviceHandle>, state: FreeDeviceState);

    /// Snapshots every known device, allocated or not.
    async fn list_all_devices(&self) -> Vec<DeviceDescriptor>;

    fn is_null_device(&self, serial: &str) -> bool;

    fn is_emulator(&self, serial: &str) -> bool;

    /// Starts background fleet monitoring; called once at scheduler boot.
    async fn init(&self);

    /// Graceful teardown; in-flight invocations are allowed to finish.
    async fn terminate(&self);

    /// Forceful teardown, used by `shutdown_hard()` to try to cut in-flight
    /// invocations short.
    async fn terminate_hard(&self);
}
