use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetsched::config::{DeviceConfig, LoggingConfig, SchedulerConfig};
use fleetsched::config_factory::ArgvConfigFactory;
use fleetsched::device::manager::DeviceHandle;
use fleetsched::device::{
    DeviceDescriptor, DeviceManager, DeviceRequirements, DeviceTracker, DeviceUtilStatsMonitor,
    FreeDeviceState,
};
use fleetsched::config_factory::CommandConfiguration;
use fleetsched::invocation::runner::{InvocationListener, InvocationRunner, Rescheduler};
use fleetsched::scheduler::CommandScheduler;
use fleetsched::{log_command_event, log_device_event, logging};
use tokio::sync::Mutex;

#[derive(Debug)]
struct DemoHandle {
    serial: String,
}

impl DeviceHandle for DemoHandle {
    fn serial(&self) -> &str {
        &self.serial
    }
}

/// A single-device fake fleet, just enough to drive the scheduler for the
/// logging demo below.
struct DemoDeviceManager {
    available: Mutex<Vec<String>>,
}

impl DemoDeviceManager {
    fn new(serials: &[&str]) -> Self {
        Self {
            available: Mutex::new(serials.iter().map(|s| s.to_string()).collect()),
        }
    }
}

#[async_trait]
impl DeviceManager for DemoDeviceManager {
    async fn allocate_device(
        &self,
        _timeout: Duration,
        _requirements: &DeviceRequirements,
    ) -> Option<Arc<dyn DeviceHandle>> {
        let mut available = self.available.lock().await;
        if available.is_empty() {
            return None;
        }
        let serial = available.remove(0);
        Some(Arc::new(DemoHandle { serial }))
    }

    async fn force_allocate_device(&self, serial: &str) -> Option<Arc<dyn DeviceHandle>> {
        self.available.lock().await.retain(|s| s != serial);
        Some(Arc::new(DemoHandle {
            serial: serial.to_string(),
        }))
    }

    async fn free_device(&self, handle: Arc<dyn DeviceHandle>, state: FreeDeviceState) {
        if matches!(state, FreeDeviceState::Available) {
            self.available.lock().await.push(handle.serial().to_string());
        }
    }

    async fn list_all_devices(&self) -> Vec<DeviceDescriptor> {
        Vec::new()
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

/// Reports every invocation as an immediate success, just enough to push
/// commands through the scheduler so the demo has something to log.
struct DemoInvocationRunner;

#[async_trait]
impl InvocationRunner for DemoInvocationRunner {
    async fn invoke(
        &self,
        device: Arc<dyn DeviceHandle>,
        config: CommandConfiguration,
        _rescheduler: Arc<dyn Rescheduler>,
        listener: Arc<dyn InvocationListener>,
    ) -> fleetsched::Result<()> {
        log_device_event!(debug, serial = device.serial(), "invocation running", args = ?config.raw_args);
        listener
            .invocation_complete(device, FreeDeviceState::Available)
            .await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Logging Demo ===\n");

    println!("1. Console logging (text format):");
    demo_console_text_logging().await?;

    println!("\n{}\n", "=".repeat(50));

    println!("2. File logging (JSON format):");
    demo_file_json_logging().await?;

    println!("\nLogging demo completed! Check /tmp/fleetsched_demo.log for the file run.");
    Ok(())
}

async fn demo_console_text_logging() -> Result<(), Box<dyn std::error::Error>> {
    let config = LoggingConfig {
        level: "info".to_string(),
        file: None,
        format: Some("text".to_string()),
    };
    let _guard = logging::init_logging(&config)?;

    let scheduler = build_scheduler(&["bench-01", "bench-02"]);
    log_device_event!(info, serial = "bench-01", "device registered");

    scheduler
        .add_command(&["run".to_string(), "smoke-test".to_string()], 0)
        .await?;
    log_command_event!(info, command_id = 1u64, "command enqueued");

    println!("text console logging demo completed");
    Ok(())
}

async fn demo_file_json_logging() -> Result<(), Box<dyn std::error::Error>> {
    let config = LoggingConfig {
        level: "debug".to_string(),
        file: Some("/tmp/fleetsched_demo.log".to_string()),
        format: Some("json".to_string()),
    };
    let _guard = logging::init_logging(&config)?;

    let scheduler = build_scheduler(&["bench-01"]);
    for i in 1..=3u64 {
        scheduler
            .add_command(&["run".to_string(), format!("suite-{i}")], 0)
            .await?;
        log_command_event!(debug, command_id = i, "command enqueued", iteration = i);
    }

    println!("file JSON logging demo completed");
    Ok(())
}

fn build_scheduler(serials: &[&str]) -> Arc<CommandScheduler> {
    let device_manager: Arc<dyn DeviceManager> = Arc::new(DemoDeviceManager::new(serials));
    let runner = Arc::new(fleetsched::invocation::runner::tests::ImmediateInvocationRunner::new(
        FreeDeviceState::Available,
    ));
    let config_factory = Arc::new(ArgvConfigFactory);
    let device_tracker = Arc::new(DeviceTracker::new());
    let util_monitor = Arc::new(DeviceUtilStatsMonitor::new(
        DeviceConfig::default().utilization_window_ms,
        Default::default(),
    ));
    CommandScheduler::new(
        device_manager,
        runner,
        config_factory,
        device_tracker,
        util_monitor,
        SchedulerConfig::default(),
    )
}
