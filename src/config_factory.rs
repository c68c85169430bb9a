//! External collaborator port: parsing command-line style args into a
//! runnable configuration (§6.2). Mirrors the reference service's
//! `validate_*` functions in spirit (parse, then validate, return a typed
//! error on failure) without porting any SSH-specific validation logic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::DeviceRequirements;
use crate::error::{Result, SchedulerError};

/// Flags that control how a command runs, parsed out of its arg vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandOptions {
    pub help_mode: bool,
    pub full_help_mode: bool,
    pub dry_run_mode: bool,
    pub noisy_dry_run_mode: bool,
    pub loop_mode: bool,
    pub min_loop_time_ms: u64,
    pub run_on_all_devices: bool,
}

impl CommandOptions {
    pub fn is_help_mode(&self) -> bool {
        self.help_mode || self.full_help_mode
    }

    pub fn is_dry_run_mode(&self) -> bool {
        self.dry_run_mode || self.noisy_dry_run_mode
    }

    pub fn is_loop_mode(&self) -> bool {
        self.loop_mode
    }

    pub fn min_loop_time(&self) -> u64 {
        self.min_loop_time_ms
    }

    pub fn run_on_all_devices(&self) -> bool {
        self.run_on_all_devices
    }
}

/// A fully parsed, ready-to-run command configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfiguration {
    pub raw_args: Vec<String>,
    pub command_options: CommandOptions,
    pub device_requirements: DeviceRequirements,
}

impl CommandConfiguration {
    pub fn validate_options(&self) -> Result<()> {
        if self.command_options.loop_mode && self.command_options.min_loop_time_ms == 0 {
            return Err(SchedulerError::ConfigParseError(
                "loop mode requires a non-zero min-loop-time".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parses a command's argument vector into a [`CommandConfiguration`].
/// Implemented externally (the concrete test-harness argument grammar is
/// out of scope); the scheduler core only depends on this trait.
#[async_trait]
pub trait ConfigFactory: Send + Sync {
    fn create_configuration_from_args(&self, args: &[String]) -> Result<CommandConfiguration>;
}

/// A minimal, dependency-free config factory recognizing the flags named
/// in §6.2/§4.G: `--help`, `--full-help`, `--dry-run`, `--noisy-dry-run`,
/// `--loop`, `--min-loop-time <ms>`, `--all-devices`, `-s <serial>`.
/// Stands in for the real test-harness argument grammar, which is an
/// external collaborator per §1.
pub struct ArgvConfigFactory;

#[async_trait]
impl ConfigFactory for ArgvConfigFactory {
    fn create_configuration_from_args(&self, args: &[String]) -> Result<CommandConfiguration> {
        let mut options = CommandOptions::default();
        let mut requirements = DeviceRequirements::default();
        let mut remaining = Vec::new();

        let mut iter = args.iter().peekable();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" => options.help_mode = true,
                "--full-help" => options.full_help_mode = true,
                "--dry-run" => options.dry_run_mode = true,
                "--noisy-dry-run" => options.noisy_dry_run_mode = true,
                "--loop" => options.loop_mode = true,
                "--all-devices" => options.run_on_all_devices = true,
                "--min-loop-time" => {
                    let value = iter.next().ok_or_else(|| {
                        SchedulerError::ConfigParseError(
                            "--min-loop-time requires a value".to_string(),
                        )
                    })?;
                    options.min_loop_time_ms = value.parse().map_err(|_| {
                        SchedulerError::ConfigParseError(format!(
                            "invalid --min-loop-time value: {value}"
                        ))
                    })?;
                }
                "-s" => {
                    let value = iter.next().ok_or_else(|| {
                        SchedulerError::ConfigParseError("-s requires a serial".to_string())
                    })?;
                    requirements.serial = Some(value.clone());
                }
                "--product" => {
                    let value = iter.next().ok_or_else(|| {
                        SchedulerError::ConfigParseError("--product requires a value".to_string())
                    })?;
                    requirements.product = Some(value.clone());
                }
                other => remaining.push(other.to_string()),
            }
        }

        let config = CommandConfiguration {
            raw_args: args.to_vec(),
            command_options: options,
            device_requirements: requirements,
        };
        config.validate_options()?;
        let _ = remaining;
        Ok(config)
    }
}
