//! Pure device allocation state machine (§4.B). No I/O; a single
//! synchronous transition function over a closed set of states and events.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Lifecycle state of a single device as observed by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAllocationState {
    Unknown,
    CheckingAvailability,
    Available,
    Allocated,
    Unavailable,
    Ignored,
}

/// The state a device should transition into on release, chosen by the
/// invocation based on how it went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeDeviceState {
    Available,
    Unresponsive,
    Unavailable,
    Ignore,
}

impl FreeDeviceState {
    /// Maps a release decision onto the corresponding state-machine event,
    /// per the table in §4.B.
    pub fn as_event(self) -> DeviceEvent {
        match self {
            FreeDeviceState::Available => DeviceEvent::FreeAvailable,
            FreeDeviceState::Unresponsive => DeviceEvent::FreeUnresponsive,
            FreeDeviceState::Unavailable => DeviceEvent::FreeUnavailable,
            FreeDeviceState::Ignore => DeviceEvent::FreeUnknown,
        }
    }
}

/// Events that drive the device allocation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    ConnectedOnline,
    StateChangeOnline,
    Disconnected,
    ForceAvailable,
    AvailableCheckPassed,
    AvailableCheckFailed,
    AvailableCheckIgnored,
    AllocateRequest,
    ForceAllocateRequest,
    FreeAvailable,
    FreeUnresponsive,
    FreeUnavailable,
    FreeUnknown,
}

/// Applies `event` to `state` and returns the resulting state. Unmapped
/// `(state, event)` pairs are a programming error surfaced as
/// `SchedulerError::InvalidTransition` rather than silently ignored.
pub fn transition(
    state: DeviceAllocationState,
    event: DeviceEvent,
) -> Result<DeviceAllocationState> {
    use DeviceAllocationState::*;
    use DeviceEvent::*;

    let next = match (state, event) {
        (Unknown, ConnectedOnline) => CheckingAvailability,
        (Unknown, ForceAvailable) => Available,
        (Unknown, ForceAllocateRequest) => Allocated,

        (CheckingAvailability, AvailableCheckPassed) => Available,
        (CheckingAvailability, AvailableCheckFailed) => Unavailable,
        (CheckingAvailability, AvailableCheckIgnored) => Ignored,
        (CheckingAvailability, Disconnected) => Unknown,

        (Available, AllocateRequest) => Allocated,
        (Available, ForceAllocateRequest) => Allocated,
        (Available, Disconnected) => Unknown,
        (Available, StateChangeOnline) => CheckingAvailability,

        (Allocated, FreeAvailable) => Available,
        (Allocated, FreeUnresponsive) => Unavailable,
        (Allocated, FreeUnavailable) => Unavailable,
        (Allocated, FreeUnknown) => Ignored,
        (Allocated, Disconnected) => Unknown,

        (Unavailable, ForceAvailable) => Available,
        (Unavailable, StateChangeOnline) => CheckingAvailability,
        (Unavailable, Disconnected) => Unknown,
        (Unavailable, ForceAllocateRequest) => Allocated,

        (Ignored, StateChangeOnline) => CheckingAvailability,
        (Ignored, Disconnected) => Unknown,
        (Ignored, ForceAvailable) => Available,

        (s, e) => {
            return Err(SchedulerError::InvalidTransition(format!(
                "no transition from {s:?} on {e:?}"
            )))
        }
    };

    Ok(next)
}
