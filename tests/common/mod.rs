//! Shared fixtures for integration tests: a small in-memory fleet and an
//! invocation runner that completes immediately, standing in for the real
//! adb/fastboot bridge and test-runner named as external collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetsched::config_factory::CommandConfiguration;
use fleetsched::device::manager::DeviceHandle;
use fleetsched::device::{DeviceDescriptor, DeviceManager, DeviceRequirements, FreeDeviceState};
use fleetsched::invocation::runner::{InvocationListener, InvocationRunner, Rescheduler};
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct FakeHandle {
    serial: String,
}

impl FakeHandle {
    pub fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
        }
    }
}

impl DeviceHandle for FakeHandle {
    fn serial(&self) -> &str {
        &self.serial
    }
}

pub struct FakeDeviceManager {
    available: Mutex<Vec<String>>,
    descriptors: Mutex<HashMap<String, DeviceDescriptor>>,
    pub freed: Mutex<Vec<(String, FreeDeviceState)>>,
}

impl FakeDeviceManager {
    pub fn new(serials: &[(&str, fleetsched::device::DeviceAllocationState, &str)]) -> Self {
        let descriptors = serials
            .iter()
            .map(|(serial, state, variant)| {
                (
                    serial.to_string(),
                    DeviceDescriptor {
                        serial: serial.to_string(),
                        is_stub: false,
                        state: *state,
                        product: "test_product".to_string(),
                        product_variant: variant.to_string(),
                        sdk_version: 34,
                        build_id: "TEST.0001".to_string(),
                        battery_level: Some(100),
                    },
                )
            })
            .collect();

        let available = serials
            .iter()
            .filter(|(_, state, _)| *state == fleetsched::device::DeviceAllocationState::Available)
            .map(|(serial, ..)| serial.to_string())
            .collect();

        Self {
            available: Mutex::new(available),
            descriptors: Mutex::new(descriptors),
            freed: Mutex::new(Vec::new()),
        }
    }

    pub fn simple(serials: &[&str]) -> Self {
        let entries: Vec<(&str, fleetsched::device::DeviceAllocationState, &str)> = serials
            .iter()
            .map(|s| (*s, fleetsched::device::DeviceAllocationState::Available, "userdebug"))
            .collect();
        Self::new(&entries)
    }
}

#[async_trait]
impl DeviceManager for FakeDeviceManager {
    async fn allocate_device(
        &self,
        _timeout: Duration,
        requirements: &DeviceRequirements,
    ) -> Option<Arc<dyn DeviceHandle>> {
        let mut available = self.available.lock().await;
        let idx = if let Some(wanted) = &requirements.serial {
            available.iter().position(|s| s == wanted)
        } else if available.is_empty() {
            None
        } else {
            Some(0)
        }?;
        let serial = available.remove(idx);
        Some(Arc::new(FakeHandle::new(&serial)))
    }

    async fn force_allocate_device(&self, serial: &str) -> Option<Arc<dyn DeviceHandle>> {
        let mut available = self.available.lock().await;
        available.retain(|s| s != serial);
        Some(Arc::new(FakeHandle::new(serial)))
    }

    async fn free_device(&self, handle: Arc<dyn DeviceHandle>, state: FreeDeviceState) {
        let serial = handle.serial().to_string();
        if matches!(state, FreeDeviceState::Available) {
            self.available.lock().await.push(serial.clone());
        }
        self.freed.lock().await.push((serial, state));
    }

    async fn list_all_devices(&self) -> Vec<DeviceDescriptor> {
        self.descriptors.lock().await.values().cloned().collect()
    }

    fn is_null_device(&self, _serial: &str) -> bool {
        false
    }

    fn is_emulator(&self, _serial: &str) -> bool {
        false
    }

    async fn init(&self) {}
    async fn terminate(&self) {}
    async fn terminate_hard(&self) {}
}

pub struct ImmediateInvocationRunner {
    pub free_state: FreeDeviceState,
    pub invocation_count: AtomicUsize,
    pub delay: Duration,
    pub invoked_args: Mutex<Vec<Vec<String>>>,
}

impl ImmediateInvocationRunner {
    pub fn new(free_state: FreeDeviceState) -> Self {
        Self {
            free_state,
            invocation_count: AtomicUsize::new(0),
            delay: Duration::from_millis(0),
            invoked_args: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(free_state: FreeDeviceState, delay: Duration) -> Self {
        Self {
            free_state,
            invocation_count: AtomicUsize::new(0),
            delay,
            invoked_args: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl InvocationRunner for ImmediateInvocationRunner {
    async fn invoke(
        &self,
        device: Arc<dyn DeviceHandle>,
        config: CommandConfiguration,
        _rescheduler: Arc<dyn Rescheduler>,
        listener: Arc<dyn InvocationListener>,
    ) -> fleetsched::Result<()> {
        self.invocation_count.fetch_add(1, Ordering::SeqCst);
        self.invoked_args.lock().await.push(config.raw_args.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        listener.invocation_complete(device, self.free_state).await;
        Ok(())
    }
}

pub fn args(s: &[&str]) -> Vec<String> {
    s.iter().map(|x| x.to_string()).collect()
}
