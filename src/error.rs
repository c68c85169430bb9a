use thiserror::Error;

/// Crate-wide error type. Every fallible boundary in the scheduler (config
/// parsing, wire decoding, device allocation, invocation execution) reports
/// through one of these variants rather than letting a raw I/O or parse
/// error escape the module that produced it.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("failed to parse command configuration: {0}")]
    ConfigParseError(String),

    #[error("remote protocol error: {0}")]
    RemoteWireError(String),

    #[error("no device available for requirements: {0}")]
    AllocationError(String),

    #[error("invocation failed: {0}")]
    InvocationFailure(String),

    #[error("device unresponsive: {0}")]
    DeviceUnresponsive(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("fatal host error, scheduler shutting down: {0}")]
    FatalHostError(String),

    #[error("socket error: {0}")]
    SocketError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("invalid device state transition: {0}")]
    InvalidTransition(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Narrower error type for the wire codec, kept distinct from
/// [`SchedulerError`] so the protocol module has no dependency on the
/// scheduler's own error taxonomy; converted at the remote manager boundary.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed request line: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported protocol version: {0}")]
    VersionMismatch(u32),

    #[error("unknown operation type: {0}")]
    UnknownOperation(String),
}

impl From<ProtocolError> for SchedulerError {
    fn from(err: ProtocolError) -> Self {
        SchedulerError::RemoteWireError(err.to_string())
    }
}
