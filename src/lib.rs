//! # fleetsched
//!
//! A fleet-level test-harness command scheduler and remote-control plane.
//!
//! ## Features
//!
//! - **Device allocation** — a pure state machine (`device::state_machine`)
//!   backed by a utilization monitor tracking a sliding 24h allocated/available
//!   window per device.
//! - **Fair-share scheduling** — commands queue by ascending accumulated
//!   execution time, so starved or short-lived commands aren't crowded out
//!   by long runners.
//! - **Remote control** — a line-oriented JSON protocol over TCP lets a
//!   second process on the same host allocate/free devices, inject
//!   commands, and query results.
//! - **Handover** — a running scheduler can transfer its allocated devices
//!   and pending queue to another scheduler process without losing work.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleetsched::config::Config;
//! use fleetsched::logging;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env().unwrap_or_default();
//!     let _guard = logging::init_logging(config.logging())?;
//!
//!     // wire up a DeviceManager/InvocationRunner/ConfigFactory and start
//!     // the scheduler, remote manager, and file watcher — see main.rs.
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod config_factory;
pub mod device;
pub mod error;
pub mod invocation;
pub mod logging;
pub mod protocol;
pub mod remote;
pub mod scheduler;

pub use config::Config;
pub use error::{Result, SchedulerError};
