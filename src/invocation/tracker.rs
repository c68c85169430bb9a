//! Execution Tracker (§4.I): captures the terminal result of an invocation
//! so that `GetLastCommandResult` (§6.1) can answer without re-querying the
//! invocation itself.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::device::{DeviceHandle, FreeDeviceState};
use crate::invocation::runner::InvocationListener;
use crate::protocol::CommandResultStatus;

struct State {
    status: CommandResultStatus,
    free_state: Option<FreeDeviceState>,
}

/// Per-device last-result cache. One instance is kept per serial by the
/// scheduler; `GetLastCommandResult` reads it without touching the
/// invocation that produced it.
pub struct ExecutionTracker {
    state: Mutex<State>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                status: CommandResultStatus::NoActiveCommand,
                free_state: None,
            }),
        }
    }

    pub async fn mark_executing(&self) {
        let mut state = self.state.lock().await;
        state.status = CommandResultStatus::Executing;
        state.free_state = None;
    }

    pub async fn get_command_result(&self) -> (CommandResultStatus, Option<FreeDeviceState>) {
        let state = self.state.lock().await;
        (state.status.clone(), state.free_state)
    }
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvocationListener for ExecutionTracker {
    async fn invocation_complete(&self, _device: Arc<dyn DeviceHandle>, free_state: FreeDeviceState) {
        let mut state = self.state.lock().await;
        if !matches!(state.status, CommandResultStatus::InvocationError { .. }) {
            state.status = CommandResultStatus::InvocationSuccess;
        }
        state.free_state = Some(free_state);
    }

    async fn invocation_failed(&self, cause: String, free_state: FreeDeviceState) {
        let mut state = self.state.lock().await;
        state.status = CommandResultStatus::InvocationError { error_details: cause };
        state.free_state = Some(free_state);
    }
}
