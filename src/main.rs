use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetsched::config::Config;
use fleetsched::config_factory::ArgvConfigFactory;
use fleetsched::device::manager::{DeviceDescriptor, DeviceHandle};
use fleetsched::device::{DeviceAllocationState, DeviceManager, DeviceRequirements, DeviceTracker, DeviceUtilStatsMonitor, FreeDeviceState};
use fleetsched::invocation::runner::{InvocationListener, InvocationRunner, Rescheduler};
use fleetsched::logging;
use fleetsched::scheduler::CommandScheduler;
use fleetsched::config_factory::CommandConfiguration;
use fleetsched::Result;
use fleetsched::remote::RemoteManager;
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Debug)]
struct LocalDeviceHandle {
    serial: String,
}

impl DeviceHandle for LocalDeviceHandle {
    fn serial(&self) -> &str {
        &self.serial
    }
}

/// A minimal local-fleet device manager, standing in for a concrete
/// adb/fastboot bridge (out of scope per this crate's design). Every
/// serial listed via `FLEETSCHED_DEVICES` (comma-separated) is treated as
/// immediately available; nothing here talks to real hardware.
struct LocalFleetDeviceManager {
    available: Mutex<Vec<String>>,
    descriptors: Mutex<HashMap<String, DeviceDescriptor>>,
}

impl LocalFleetDeviceManager {
    fn from_env() -> Self {
        let serials: Vec<String> = std::env::var("FLEETSCHED_DEVICES")
            .unwrap_or_else(|_| "emulator-0".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let descriptors = serials
            .iter()
            .map(|serial| {
                (
                    serial.clone(),
                    DeviceDescriptor {
                        serial: serial.clone(),
                        is_stub: serial.starts_with("emulator"),
                        state: DeviceAllocationState::Available,
                        product: "unknown".to_string(),
                        product_variant: "unknown".to_string(),
                        sdk_version: 0,
                        build_id: "unknown".to_string(),
                        battery_level: None,
                    },
                )
            })
            .collect();

        Self {
            available: Mutex::new(serials),
            descriptors: Mutex::new(descriptors),
        }
    }
}

#[async_trait]
impl DeviceManager for LocalFleetDeviceManager {
    async fn allocate_device(
        &self,
        _timeout: Duration,
        requirements: &DeviceRequirements,
    ) -> Option<Arc<dyn DeviceHandle>> {
        let mut available = self.available.lock().await;
        let idx = match &requirements.serial {
            Some(wanted) => available.iter().position(|s| s == wanted)?,
            None => {
                if available.is_empty() {
                    return None;
                }
                0
            }
        };
        let serial = available.remove(idx);
        Some(Arc::new(LocalDeviceHandle { serial }))
    }

    async fn force_allocate_device(&self, serial: &str) -> Option<Arc<dyn DeviceHandle>> {
        let mut available = self.available.lock().await;
        available.retain(|s| s != serial);
        Some(Arc::new(LocalDeviceHandle {
            serial: serial.to_string(),
        }))
    }

    async fn free_device(&self, handle: Arc<dyn DeviceHandle>, state: FreeDeviceState) {
        if matches!(state, FreeDeviceState::Available) {
            self.available.lock().await.push(handle.serial().to_string());
        }
    }

    async fn list_all_devices(&self) -> Vec<DeviceDescriptor> {
        self.descriptors.lock().await.values().cloned().collect()
    }

    fn is_null_device(&self, serial: &str) -> bool {
        serial.starts_with("null-device")
    }

    fn is_emulator(&self, serial: &str) -> bool {
        serial.starts_with("emulator")
    }

    async fn init(&self) {
        info!("local fleet device manager initialized");
    }

    async fn terminate(&self) {}

    async fn terminate_hard(&self) {}
}

/// A minimal invocation runner that immediately reports success. The real
/// test-runner integration is an external collaborator (§1) supplied by
/// the deployment, not by this crate.
struct NoopInvocationRunner;

#[async_trait]
impl InvocationRunner for NoopInvocationRunner {
    async fn invoke(
        &self,
        device: Arc<dyn DeviceHandle>,
        config: CommandConfiguration,
        _rescheduler: Arc<dyn Rescheduler>,
        listener: Arc<dyn InvocationListener>,
    ) -> Result<()> {
        info!(serial = %device.serial(), args = ?config.raw_args, "running invocation");
        listener
            .invocation_complete(device, FreeDeviceState::Available)
            .await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("failed to load config: {e}, using defaults");
        Config::default()
    });

    let _log_guard = match logging::init_logging(config.logging()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .init();
            None
        }
    };

    info!("starting fleetsched");
    info!(config = ?config, "configuration loaded");

    let device_manager: Arc<dyn DeviceManager> = Arc::new(LocalFleetDeviceManager::from_env());
    device_manager.init().await;

    let device_tracker = Arc::new(DeviceTracker::new());
    let util_monitor = Arc::new(DeviceUtilStatsMonitor::new(
        config.device().utilization_window_ms,
        config.device().stub_policy,
    ));
    let invocation_runner: Arc<dyn InvocationRunner> = Arc::new(NoopInvocationRunner);
    let config_factory = Arc::new(ArgvConfigFactory);

    let scheduler = CommandScheduler::new(
        device_manager.clone(),
        invocation_runner,
        config_factory,
        device_tracker.clone(),
        util_monitor,
        config.scheduler().clone(),
    );

    let remote_manager = RemoteManager::new(
        scheduler.clone(),
        device_manager.clone(),
        device_tracker.clone(),
        config.server().clone(),
    );

    let scheduler_for_loop = scheduler.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler_for_loop.start().await;
    });
    scheduler.wait_until_started().await;

    if config.server().start_on_boot {
        let remote_manager_task = remote_manager.clone();
        tokio::spawn(async move {
            if let Err(err) = remote_manager_task.run().await {
                error!(error = %err, "remote manager stopped with an error");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    remote_manager.cancel();
    scheduler.shutdown();

    let _ = scheduler_task.await;

    Ok(())
}
