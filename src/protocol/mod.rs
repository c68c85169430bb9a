//! Wire Protocol Codec (§4.D): a line-oriented JSON envelope over TCP.
//! `RemoteOperation` is a tagged enum so adding an operation means adding a
//! variant, not threading a new case through a class hierarchy (§9).

use serde::{Deserialize, Serialize};

use crate::device::{DeviceAllocationState, FreeDeviceState};
use crate::error::ProtocolError;

pub const PROTOCOL_VERSION: u32 = 3;

/// One request read off the wire: the envelope version plus the tagged
/// operation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub version: u32,
    #[serde(flatten)]
    pub op: RemoteOperation,
}

/// Every operation the remote-control protocol supports (§6.1), internally
/// tagged on `type` with camelCase-to-SCREAMING mapping handled by the
/// explicit rename attributes below to match the wire table exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RemoteOperation {
    #[serde(rename = "ALLOCATE_DEVICE")]
    AllocateDevice { serial: String },

    #[serde(rename = "FREE_DEVICE")]
    FreeDevice { serial: String },

    #[serde(rename = "CLOSE")]
    Close,

    #[serde(rename = "ADD_COMMAND")]
    AddCommand {
        time: f64,
        #[serde(rename = "commandArgs")]
        command_args: Vec<String>,
    },

    #[serde(rename = "HANDOVER_CLOSE")]
    HandoverClose { port: u16 },

    #[serde(rename = "LIST_DEVICES")]
    ListDevices,

    #[serde(rename = "EXEC_COMMAND")]
    ExecCommand {
        serial: String,
        #[serde(rename = "commandArgs")]
        command_args: Vec<String>,
    },

    #[serde(rename = "GET_LAST_COMMAND_RESULT")]
    GetLastCommandResult { serial: String },
}

/// Magic serial value meaning "free every device currently tracked".
pub const FREE_ALL_SERIAL: &str = "*";

/// One entry of a `ListDevices` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: DeviceAllocationState,
    pub variant: String,
}

/// Status of the last invocation run against a given serial, returned by
/// `GetLastCommandResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum CommandResultStatus {
    NoActiveCommand,
    Executing,
    NotAllocated,
    InvocationError {
        #[serde(rename = "errorDetails")]
        error_details: String,
    },
    InvocationSuccess,
}

/// Envelope returned for every request. `error` is present iff the
/// operation failed; `result`/`devices`/`commandResult` are populated
/// according to the operation that produced this response.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "serials")]
    pub devices: Option<Vec<DeviceSummary>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "commandResult")]
    pub command_result: Option<CommandResultStatus>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "freeDeviceState")]
    pub free_device_state: Option<FreeDeviceState>,
}

impl Response {
    pub fn ok(result: bool) -> Self {
        Self {
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn devices(devices: Vec<DeviceSummary>) -> Self {
        Self {
            devices: Some(devices),
            ..Default::default()
        }
    }

    pub fn command_result(status: CommandResultStatus, free_state: Option<FreeDeviceState>) -> Self {
        Self {
            command_result: Some(status),
            free_device_state: free_state,
            ..Default::default()
        }
    }
}

/// Encodes `op` as a single JSON line (no trailing newline; the caller
/// appends the line terminator when writing to the socket).
pub fn encode(op: &RemoteOperation) -> Result<String, ProtocolError> {
    let request = Request {
        version: PROTOCOL_VERSION,
        op: op.clone(),
    };
    Ok(serde_json::to_string(&request)?)
}

/// Decodes one line of input into a validated operation, rejecting a
/// protocol-version mismatch before attempting to interpret the payload.
pub fn decode(line: &str) -> Result<RemoteOperation, ProtocolError> {
    let request: Request = serde_json::from_str(line)?;
    if request.version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch(request.version));
    }
    Ok(request.op)
}

pub fn encode_response(response: &Response) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(response)?)
}

pub fn decode_response(line: &str) -> Result<Response, ProtocolError> {
    Ok(serde_json::from_str(line)?)
}
