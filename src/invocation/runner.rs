//! External collaborator port: the invocation runner (§6.2) — the actual
//! test-runner that drives one device through a configured test run. Out
//! of scope per §1; the scheduler core only depends on this trait and the
//! listener/rescheduler callbacks it is handed.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config_factory::CommandConfiguration;
use crate::device::{DeviceHandle, FreeDeviceState};
use crate::error::Result;

/// Callback surface an invocation uses to report its outcome back to the
/// scheduler. Implemented by `ExecutionTracker` and by the scheduler's own
/// bookkeeping closure that frees the device.
#[async_trait]
pub trait InvocationListener: Send + Sync {
    async fn invocation_complete(&self, device: Arc<dyn DeviceHandle>, free_state: FreeDeviceState);
    async fn invocation_failed(&self, cause: String, free_state: FreeDeviceState);
}

/// Callback surface an invocation uses to ask the scheduler to run again,
/// either immediately with a modified config or after the command's
/// `min_loop_time` has elapsed (§4.G rescheduler contract).
#[async_trait]
pub trait Rescheduler: Send + Sync {
    async fn schedule_config(&self, config: CommandConfiguration);
    async fn reschedule_command(&self);
}

/// External collaborator that actually executes a configured test run
/// against an allocated device. A concrete implementation lives outside
/// this crate's domain model; the scheduler only ever holds this trait
/// object.
#[async_trait]
pub trait InvocationRunner: Send + Sync {
    async fn invoke(
        &self,
        device: Arc<dyn DeviceHandle>,
        config: CommandConfiguration,
        rescheduler: Arc<dyn Rescheduler>,
        listener: Arc<dyn InvocationListener>,
    ) -> Result<()>;
}
