//! Layered configuration: defaults, optional file, environment (`FLEETSCHED_`
//! prefixed) overrides, folded into a single [`Config`] via the `config`
//! crate, mirroring the reference service's `Config::from_env()`.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Remote manager (socket server) settings, §6.3 runtime controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub start_on_boot: bool,
    pub auto_handover: bool,
    pub socket_timeout_ms: u64,
    pub accept_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 30103,
            start_on_boot: true,
            auto_handover: true,
            socket_timeout_ms: 10_000,
            accept_timeout_ms: 5_000,
        }
    }
}

/// Scheduler main-loop timing knobs, §4.G / §5.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub queue_poll_ms: u64,
    pub allocation_backoff_ms: u64,
    pub starvation_nudge_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_poll_ms: 1_000,
            allocation_backoff_ms: 20,
            starvation_nudge_ms: 1,
        }
    }
}

/// Stub-device treatment for utilization accounting, §4.C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StubDevicePolicy {
    Ignore,
    IncludeIfUsed,
    AlwaysInclude,
}

impl Default for StubDevicePolicy {
    fn default() -> Self {
        StubDevicePolicy::IncludeIfUsed
    }
}

/// Device tracker / utilization monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub stub_policy: StubDevicePolicy,
    pub utilization_window_ms: i64,
    pub file_watch_poll_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            stub_policy: StubDevicePolicy::default(),
            utilization_window_ms: 86_400_000,
            file_watch_poll_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: None,
        }
    }
}

/// Top-level configuration, analogous to the reference service's `Config`
/// wrapping a workspace config; here flattened since this crate has no
/// sibling crates to share configuration with.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub device: DeviceConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional `fleetsched.toml` in
    /// the current directory, and `FLEETSCHED_` environment overrides.
    pub fn from_env() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name("fleetsched").required(false))
            .add_source(
                config::Environment::with_prefix("FLEETSCHED")
                    .separator("__")
                    .try_parsing(true),
            );

        let cfg = builder.build()?;
        cfg.try_deserialize()
            .map_err(|e| SchedulerError::Configuration(e))
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn scheduler(&self) -> &SchedulerConfig {
        &self.scheduler
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    pub fn bind_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| SchedulerError::Internal(format!("invalid server address: {e}")))
    }
}
