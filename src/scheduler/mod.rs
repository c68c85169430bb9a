//! The Command Scheduler (§4.G), its data model (§3), and the Command
//! File Watcher (§4.H).

pub mod command;
pub mod engine;
pub mod watcher;

pub use command::{CommandTracker, ExecutableCommand, ExecutableCommandState};
pub use engine::CommandScheduler;
pub use watcher::{CommandFile, CommandFileWatcher};
