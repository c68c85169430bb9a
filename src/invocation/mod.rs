//! Invocation running and result tracking (§4.I, §6.2).

pub mod runner;
pub mod tracker;

pub use runner::{InvocationListener, InvocationRunner, Rescheduler};
pub use tracker::ExecutionTracker;
