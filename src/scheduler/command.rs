//! Command and tracker types (§3): `CommandTracker` carries identity and
//! cumulative execution time across reschedules/loops; `ExecutableCommand`
//! is one concrete queued execution of a tracker.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::config_factory::CommandConfiguration;

/// Identity of a command across all its executions (CT-1: strictly
/// increasing, never reused). `total_exec_time_ms` is the scheduling
/// priority key (CT-2: monotonic non-decreasing).
pub struct CommandTracker {
    pub id: u64,
    pub args: Vec<String>,
    total_exec_time_ms: AtomicU64,
}

impl CommandTracker {
    pub fn new(id: u64, args: Vec<String>, initial_total_exec_time_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            args,
            total_exec_time_ms: AtomicU64::new(initial_total_exec_time_ms),
        })
    }

    pub fn total_exec_time_ms(&self) -> u64 {
        self.total_exec_time_ms.load(AtomicOrdering::SeqCst)
    }

    /// Adds `delta_ms` to the accumulated execution time. Never decreases
    /// the counter (CT-2).
    pub fn add_exec_time(&self, delta_ms: u64) {
        self.total_exec_time_ms
            .fetch_add(delta_ms, AtomicOrdering::SeqCst);
    }
}

/// Monotonic, never-reused command id generator (CT-1).
#[derive(Default)]
pub struct CommandIdGenerator {
    next: AtomicU64,
}

impl CommandIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, AtomicOrdering::SeqCst)
    }
}

/// Lifecycle state of one queued execution (EC-2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableCommandState {
    Waiting,
    Sleeping,
    Executing,
}

/// One concrete execution of a `CommandTracker`. Created at enqueue,
/// destroyed when the invocation reports completion.
pub struct ExecutableCommand {
    pub tracker: Arc<CommandTracker>,
    pub config: CommandConfiguration,
    pub rescheduled: bool,
    pub created_at: DateTime<Utc>,
    pub state: Mutex<ExecutableCommandState>,
    /// Monotonic insertion sequence, used to break priority ties in FIFO
    /// order so equal-priority commands don't starve each other.
    pub sequence: u64,
}

impl ExecutableCommand {
    pub fn new(
        tracker: Arc<CommandTracker>,
        config: CommandConfiguration,
        rescheduled: bool,
        sequence: u64,
    ) -> Self {
        Self {
            tracker,
            config,
            rescheduled,
            created_at: Utc::now(),
            state: Mutex::new(ExecutableCommandState::Waiting),
            sequence,
        }
    }

    pub fn priority_key(&self) -> (u64, u64) {
        (self.tracker.total_exec_time_ms(), self.sequence)
    }
}

/// Min-heap ordering key: ascending `total_exec_time`, ties broken by
/// insertion order (§4.G). Wrapped so `BinaryHeap`, which is a max-heap,
/// pops the smallest key first.
pub struct PriorityEntry(pub Arc<ExecutableCommand>);

impl PriorityEntry {
    fn key(&self) -> (u64, u64) {
        self.0.priority_key()
    }
}

impl PartialEq for PriorityEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for PriorityEntry {}

impl PartialOrd for PriorityEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap::pop` returns the *smallest* key.
        other.key().cmp(&self.key())
    }
}
