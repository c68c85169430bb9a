//! Command Scheduler (§4.G): command intake, priority queue, invocation
//! spawning, retry/loop semantics, and the shutdown/handover lifecycle.

use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::config_factory::{CommandConfiguration, ConfigFactory};
use crate::device::manager::DeviceHandle;
use crate::device::{DeviceManager, DeviceTracker, DeviceUtilStatsMonitor, FreeDeviceState, StubCategory};
use crate::error::{Result, SchedulerError};
use crate::invocation::runner::{InvocationListener, InvocationRunner, Rescheduler};
use crate::invocation::ExecutionTracker;
use crate::remote::client::RemoteClient;
use crate::scheduler::command::{
    CommandIdGenerator, CommandTracker, ExecutableCommand, ExecutableCommandState, PriorityEntry,
};

struct Inner {
    queue: BinaryHeap<PriorityEntry>,
    all_commands: HashMap<u64, Arc<ExecutableCommand>>,
    invocations: HashMap<String, JoinHandle<()>>,
    next_sequence: u64,
    handover_target: Option<(String, u16)>,
}

/// The scheduler's central coordinating object. Shared via `Arc` across
/// the main loop task, every invocation task, and the remote manager.
pub struct CommandScheduler {
    device_manager: Arc<dyn DeviceManager>,
    invocation_runner: Arc<dyn InvocationRunner>,
    config_factory: Arc<dyn ConfigFactory>,
    device_tracker: Arc<DeviceTracker>,
    util_monitor: Arc<DeviceUtilStatsMonitor>,
    config: SchedulerConfig,
    inner: Mutex<Inner>,
    queue_notify: Notify,
    started_tx: watch::Sender<bool>,
    started_rx: watch::Receiver<bool>,
    shutdown_requested: AtomicBool,
    shutdown_on_empty: AtomicBool,
    hard_shutdown: AtomicBool,
    id_gen: CommandIdGenerator,
    execution_trackers: Mutex<HashMap<String, Arc<ExecutionTracker>>>,
}

impl CommandScheduler {
    pub fn new(
        device_manager: Arc<dyn DeviceManager>,
        invocation_runner: Arc<dyn InvocationRunner>,
        config_factory: Arc<dyn ConfigFactory>,
        device_tracker: Arc<DeviceTracker>,
        util_monitor: Arc<DeviceUtilStatsMonitor>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (started_tx, started_rx) = watch::channel(false);
        Arc::new(Self {
            device_manager,
            invocation_runner,
            config_factory,
            device_tracker,
            util_monitor,
            config,
            inner: Mutex::new(Inner {
                queue: BinaryHeap::new(),
                all_commands: HashMap::new(),
                invocations: HashMap::new(),
                next_sequence: 0,
                handover_target: None,
            }),
            queue_notify: Notify::new(),
            started_tx,
            started_rx,
            shutdown_requested: AtomicBool::new(false),
            shutdown_on_empty: AtomicBool::new(false),
            hard_shutdown: AtomicBool::new(false),
            id_gen: CommandIdGenerator::new(),
            execution_trackers: Mutex::new(HashMap::new()),
        })
    }

    /// Blocks until `start()` has been called on this scheduler, mirroring
    /// the reference's `CountDownLatch`-based "started" signal (§9), here a
    /// `tokio::sync::watch` channel instead.
    pub async fn wait_until_started(&self) {
        let mut rx = self.started_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Runs the scheduler main loop until shutdown. Intended to be spawned
    /// as its own task from `main.rs`.
    pub async fn start(self: Arc<Self>) {
        info!("command scheduler starting");
        let _ = self.started_tx.send(true);

        loop {
            if self.shutdown_requested.load(AtomicOrdering::SeqCst) {
                let drained = { self.inner.lock().await.all_commands.is_empty() };
                if drained {
                    break;
                }
            }

            let poll = Duration::from_millis(self.config.queue_poll_ms);
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = self.queue_notify.notified() => {}
            }

            if self.shutdown_requested.load(AtomicOrdering::SeqCst)
                && !self.shutdown_on_empty.load(AtomicOrdering::SeqCst)
            {
                continue;
            }

            let next = {
                let mut inner = self.inner.lock().await;
                inner.queue.pop()
            };

            let Some(entry) = next else {
                continue;
            };
            let command = entry.0;

            if self.shutdown_requested.load(AtomicOrdering::SeqCst)
                && !self.shutdown_on_empty.load(AtomicOrdering::SeqCst)
            {
                // A normal (non-drain) shutdown discards Waiting commands.
                self.forget_command(command.tracker.id).await;
                continue;
            }

            self.try_dispatch(command).await;
        }

        self.join_all_invocations().await;
        info!("command scheduler stopped");
    }

    async fn try_dispatch(self: &Arc<Self>, command: Arc<ExecutableCommand>) {
        let requirements = command.config.device_requirements.clone();
        let device = self
            .device_manager
            .allocate_device(Duration::from_millis(0), &requirements)
            .await;

        match device {
            Some(handle) => {
                self.spawn_invocation(command, handle).await;
            }
            None => {
                // Fairness nudge: a starved command's priority key creeps
                // up slightly on every failed dispatch attempt so a
                // perpetually-unsatisfiable command doesn't wedge the head
                // of the queue forever, and requeue after a short backoff.
                command
                    .tracker
                    .add_exec_time(self.config.starvation_nudge_ms);
                *command.state.lock().await = ExecutableCommandState::Waiting;

                let scheduler = self.self_handle();
                let backoff = Duration::from_millis(self.config.allocation_backoff_ms);
                tokio::spawn(async move {
                    tokio::time::sleep(backoff).await;
                    scheduler.requeue(command).await;
                });
            }
        }
    }

    fn self_handle(self: &Arc<Self>) -> Arc<Self> {
        Arc::clone(self)
    }

    async fn requeue(self: &Arc<Self>, command: Arc<ExecutableCommand>) {
        let mut inner = self.inner.lock().await;
        inner.queue.push(PriorityEntry(command));
        drop(inner);
        self.queue_notify.notify_one();
    }

    async fn spawn_invocation(self: &Arc<Self>, command: Arc<ExecutableCommand>, device: Arc<dyn DeviceHandle>) {
        let serial = device.serial().to_string();
        *command.state.lock().await = ExecutableCommandState::Executing;

        self.device_tracker
            .allocate(device.clone())
            .await;
        self.util_monitor
            .record_allocated(&serial, self.stub_category_for(&serial), chrono::Utc::now())
            .await;

        let tracker = self.execution_tracker_for(&serial).await;
        tracker.mark_executing().await;

        let scheduler = self.self_handle();
        let invocation_runner = self.invocation_runner.clone();
        let config = command.config.clone();
        let loop_mode = config.command_options.is_loop_mode();
        let min_loop_time = config.command_options.min_loop_time();
        let tracker_handle = Arc::clone(&command.tracker);
        let exec_time_tracker = Arc::clone(&command.tracker);
        let command_id = command.tracker.id;

        let listener: Arc<dyn InvocationListener> = Arc::new(CompletionListener {
            scheduler: scheduler.clone(),
            execution_tracker: tracker.clone(),
            device: device.clone(),
            serial: serial.clone(),
            command_id,
            loop_mode,
            min_loop_time,
            tracker_handle: tracker_handle.clone(),
        });
        let rescheduler: Arc<dyn Rescheduler> = Arc::new(CommandRescheduler {
            scheduler: scheduler.clone(),
            tracker_handle,
            min_loop_time,
        });

        let start = std::time::Instant::now();
        let shutdown_scheduler = scheduler.clone();
        let join = tokio::spawn(async move {
            let result = invocation_runner
                .invoke(device.clone(), config, rescheduler, listener.clone())
                .await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            exec_time_tracker.add_exec_time(elapsed_ms);

            if let Err(err) = result {
                warn!(error = %err, "invocation returned an error");
                // §7 failure model: the specific error kind dictates the
                // device's free-state; a fatal host error additionally
                // triggers a graceful shutdown of the whole scheduler.
                let free_state = match &err {
                    SchedulerError::DeviceUnresponsive(_) => FreeDeviceState::Unresponsive,
                    SchedulerError::DeviceUnavailable(_) => FreeDeviceState::Unavailable,
                    _ => FreeDeviceState::Available,
                };
                let fatal = matches!(err, SchedulerError::FatalHostError(_));
                listener.invocation_failed(err.to_string(), free_state).await;
                if fatal {
                    shutdown_scheduler.shutdown();
                }
            }
        });

        let mut inner = self.inner.lock().await;
        inner.invocations.insert(serial, join);
    }

    /// Classifies `serial` for the utilization monitor's stub-filtering
    /// (§4.C): a device is at most one of null or emulator.
    fn stub_category_for(&self, serial: &str) -> Option<StubCategory> {
        if self.device_manager.is_null_device(serial) {
            Some(StubCategory::NullDevice)
        } else if self.device_manager.is_emulator(serial) {
            Some(StubCategory::Emulator)
        } else {
            None
        }
    }

    async fn execution_tracker_for(&self, serial: &str) -> Arc<ExecutionTracker> {
        let mut trackers = self.execution_trackers.lock().await;
        trackers
            .entry(serial.to_string())
            .or_insert_with(|| Arc::new(ExecutionTracker::new()))
            .clone()
    }

    pub async fn get_execution_tracker(&self, serial: &str) -> Option<Arc<ExecutionTracker>> {
        self.execution_trackers.lock().await.get(serial).cloned()
    }

    /// Number of commands not yet finished (queued, sleeping, or
    /// executing). Used by the file watcher's tests and by diagnostics.
    pub async fn command_count(&self) -> usize {
        self.inner.lock().await.all_commands.len()
    }

    async fn forget_command(&self, command_id: u64) {
        self.inner.lock().await.all_commands.remove(&command_id);
    }

    async fn join_all_invocations(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.lock().await;
            inner.invocations.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Parses and enqueues `args` (§4.G command intake). Honors help and
    /// dry-run modes (enqueue nothing, return `true`); fans out across the
    /// whole fleet when `--all-devices` is set.
    pub async fn add_command(self: &Arc<Self>, args: &[String], initial_total_exec_time_ms: u64) -> Result<bool> {
        let config = self.config_factory.create_configuration_from_args(args)?;

        if config.command_options.is_help_mode() {
            debug!("add_command: help mode, nothing enqueued");
            return Ok(true);
        }
        if config.command_options.is_dry_run_mode() {
            info!(args = ?args, "dry-run: would enqueue command");
            return Ok(true);
        }

        if config.command_options.run_on_all_devices() {
            let descriptors = self.device_manager.list_all_devices().await;
            for descriptor in descriptors {
                let mut per_device_args = args.to_vec();
                per_device_args.push("-s".to_string());
                per_device_args.push(descriptor.serial.clone());
                let per_device_config = self
                    .config_factory
                    .create_configuration_from_args(&per_device_args)?;
                self.enqueue_new(per_device_config, initial_total_exec_time_ms)
                    .await;
            }
        } else {
            self.enqueue_new(config, initial_total_exec_time_ms).await;
        }

        Ok(true)
    }

    async fn enqueue_new(self: &Arc<Self>, config: CommandConfiguration, initial_total_exec_time_ms: u64) {
        let id = self.id_gen.next_id();
        let tracker = CommandTracker::new(id, config.raw_args.clone(), initial_total_exec_time_ms);
        self.enqueue_tracked(tracker, config, false).await;
    }

    async fn enqueue_tracked(
        self: &Arc<Self>,
        tracker: Arc<CommandTracker>,
        config: CommandConfiguration,
        rescheduled: bool,
    ) {
        let mut inner = self.inner.lock().await;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let command = Arc::new(ExecutableCommand::new(tracker, config, rescheduled, sequence));
        inner.all_commands.insert(command.tracker.id, command.clone());
        inner.queue.push(PriorityEntry(command));
        drop(inner);
        self.queue_notify.notify_one();
    }

    /// Bypasses the queue: immediately spawns an invocation for a device
    /// the caller has already allocated out-of-band (remote `ExecCommand`).
    pub async fn exec_command(self: &Arc<Self>, device: Arc<dyn DeviceHandle>, args: &[String]) -> Result<bool> {
        let config = self.config_factory.create_configuration_from_args(args)?;
        let id = self.id_gen.next_id();
        let tracker = CommandTracker::new(id, args.to_vec(), 0);
        let command = Arc::new(ExecutableCommand::new(tracker, config, false, 0));
        self.spawn_invocation(command, device).await;
        Ok(true)
    }

    /// Clears every `Waiting` command from the queue and forgets it
    /// entirely (used by the command file watcher on reload, §4.H).
    pub async fn remove_all_commands(&self) {
        let mut inner = self.inner.lock().await;
        inner.queue.clear();
        inner.all_commands.retain(|_, cmd| {
            // Retain only commands currently executing; Waiting/Sleeping
            // ones are dropped along with the queue.
            matches!(
                cmd.state.try_lock().map(|s| *s),
                Ok(ExecutableCommandState::Executing)
            )
        });
    }

    /// Graceful shutdown: stop accepting new dispatch of `Waiting`
    /// commands, let in-flight invocations finish naturally.
    pub fn shutdown(&self) {
        self.shutdown_requested.store(true, AtomicOrdering::SeqCst);
        self.queue_notify.notify_one();
    }

    /// As `shutdown()`, but only takes effect once every command (queued or
    /// executing) has drained naturally — enables "run until empty, then
    /// stop" semantics.
    pub fn shutdown_on_empty(&self) {
        self.shutdown_requested.store(true, AtomicOrdering::SeqCst);
        self.shutdown_on_empty.store(true, AtomicOrdering::SeqCst);
        self.queue_notify.notify_one();
    }

    /// As `shutdown()`, additionally force-terminating the device manager
    /// bridge to try to cut in-flight invocations short.
    pub async fn shutdown_hard(&self) {
        self.hard_shutdown.store(true, AtomicOrdering::SeqCst);
        self.shutdown();
        self.device_manager.terminate_hard().await;
    }

    /// Handover (§4.E.handover, outgoing side): connects to the incoming
    /// scheduler's remote manager, transfers every currently-allocated
    /// device and every pending command in ascending priority order, then
    /// begins local shutdown.
    pub async fn handover_shutdown(self: &Arc<Self>, host: &str, port: u16) -> Result<bool> {
        let mut client = RemoteClient::connect(host, port).await?;

        let allocated_serials: Vec<String> = {
            let inner = self.inner.lock().await;
            inner.invocations.keys().cloned().collect()
        };
        for serial in &allocated_serials {
            client.send_allocate_device(serial).await?;
        }

        let mut commands: Vec<Arc<ExecutableCommand>> = {
            let inner = self.inner.lock().await;
            inner.all_commands.values().cloned().collect()
        };
        commands.sort_by_key(|c| c.tracker.total_exec_time_ms());
        for command in &commands {
            client
                .send_add_command(command.tracker.total_exec_time_ms() as f64, &command.tracker.args)
                .await?;
        }

        client.close().await?;

        {
            let mut inner = self.inner.lock().await;
            inner.handover_target = Some((host.to_string(), port));
        }

        self.shutdown();
        Ok(true)
    }

    async fn notify_handover_free(&self, serial: &str) {
        let target = {
            let inner = self.inner.lock().await;
            inner.handover_target.clone()
        };
        if let Some((host, port)) = target {
            match RemoteClient::connect(&host, port).await {
                Ok(mut client) => {
                    if let Err(err) = client.send_free_device(serial).await {
                        warn!(error = %err, "failed to notify handover peer of device release");
                    }
                    let _ = client.close().await;
                }
                Err(err) => warn!(error = %err, "failed to reconnect to handover peer"),
            }
        }
    }
}

/// Invocation-completion listener installed by `spawn_invocation`; frees
/// the device, feeds the utilization monitor, and re-enqueues loop-mode
/// commands.
struct CompletionListener {
    scheduler: Arc<CommandScheduler>,
    execution_tracker: Arc<ExecutionTracker>,
    device: Arc<dyn DeviceHandle>,
    serial: String,
    command_id: u64,
    loop_mode: bool,
    min_loop_time: u64,
    tracker_handle: Arc<CommandTracker>,
}

#[async_trait::async_trait]
impl InvocationListener for CompletionListener {
    async fn invocation_complete(&self, device: Arc<dyn DeviceHandle>, free_state: FreeDeviceState) {
        self.execution_tracker
            .invocation_complete(device.clone(), free_state)
            .await;

        self.scheduler.device_tracker.free(&self.serial).await;
        self.scheduler
            .util_monitor
            .record_available(&self.serial, self.scheduler.stub_category_for(&self.serial), chrono::Utc::now())
            .await;
        self.scheduler
            .device_manager
            .free_device(device, free_state)
            .await;

        {
            let mut inner = self.scheduler.inner.lock().await;
            inner.invocations.remove(&self.serial);
            inner.all_commands.remove(&self.command_id);
        }

        self.scheduler.notify_handover_free(&self.serial).await;

        if self.loop_mode {
            // A fresh `ExecutableCommand` is created, but only enters the
            // queue once `min_loop_time` has elapsed (§4.G loop semantics,
            // scenario 3) — the same delayed-requeue shape `try_dispatch`
            // uses for starvation backoff.
            let scheduler = self.scheduler.clone();
            let tracker_handle = self.tracker_handle.clone();
            let delay = Duration::from_millis(self.min_loop_time);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let args = tracker_handle.args.clone();
                if let Ok(config) = scheduler
                    .config_factory
                    .create_configuration_from_args(&args)
                {
                    scheduler.enqueue_tracked(tracker_handle, config, true).await;
                }
            });
        }

        self.scheduler.queue_notify.notify_one();
        let _ = &self.device;
    }

    async fn invocation_failed(&self, cause: String, free_state: FreeDeviceState) {
        warn!(serial = %self.serial, cause = %cause, "invocation failed");
        self.execution_tracker
            .invocation_failed(cause, free_state)
            .await;
        // DA-1: the device is freed and the command untracked on failure
        // exactly as it is on success, just with a free-state chosen from
        // the error kind instead of the one the invocation runner reports.
        self.invocation_complete(self.device.clone(), free_state).await;
    }
}

/// Rescheduler handed to the invocation runner (§4.G rescheduler
/// contract).
struct CommandRescheduler {
    scheduler: Arc<CommandScheduler>,
    tracker_handle: Arc<CommandTracker>,
    min_loop_time: u64,
}

#[async_trait::async_trait]
impl Rescheduler for CommandRescheduler {
    async fn schedule_config(&self, config: CommandConfiguration) {
        self.scheduler
            .enqueue_tracked(self.tracker_handle.clone(), config, true)
            .await;
    }

    async fn reschedule_command(&self) {
        let args = self.tracker_handle.args.clone();
        let delay = Duration::from_millis(self.min_loop_time);
        let scheduler = self.scheduler.clone();
        let tracker_handle = self.tracker_handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(config) = scheduler
                .config_factory
                .create_configuration_from_args(&args)
            {
                scheduler.enqueue_tracked(tracker_handle, config, true).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::config_factory::ArgvConfigFactory;
    use crate::device::manager::tests::FakeDeviceManager;
    use crate::device::FreeDeviceState;
    use crate::invocation::runner::tests::ImmediateInvocationRunner;

    fn scheduler_config() -> SchedulerConfig {
        SchedulerConfig {
            queue_poll_ms: 10,
            allocation_backoff_ms: 5,
            starvation_nudge_ms: 1,
        }
    }

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|x| x.to_string()).collect()
    }

    async fn build(serials: &[&str], free_state: FreeDeviceState) -> Arc<CommandScheduler> {
        let device_manager = Arc::new(FakeDeviceManager::new(serials));
        let runner = Arc::new(ImmediateInvocationRunner::new(free_state));
        let config_factory = Arc::new(ArgvConfigFactory);
        let device_tracker = Arc::new(DeviceTracker::new());
        let util_monitor = Arc::new(DeviceUtilStatsMonitor::new(
            DeviceConfig::default().utilization_window_ms,
            Default::default(),
        ));
        CommandScheduler::new(
            device_manager,
            runner,
            config_factory,
            device_tracker,
            util_monitor,
            scheduler_config(),
        )
    }

    #[tokio::test]
    async fn simple_dispatch_runs_two_commands_on_two_devices() {
        let scheduler = build(&["d1", "d2"], FreeDeviceState::Available).await;
        let handle = tokio::spawn(scheduler.clone().start());
        scheduler.wait_until_started().await;

        scheduler.add_command(&args(&["run", "x"]), 0).await.unwrap();
        scheduler.add_command(&args(&["run", "y"]), 0).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.shutdown_on_empty();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    #[tokio::test]
    async fn add_command_in_dry_run_mode_enqueues_nothing() {
        let scheduler = build(&["d1"], FreeDeviceState::Available).await;
        let ok = scheduler
            .add_command(&args(&["run", "--dry-run"]), 0)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(scheduler.inner.lock().await.all_commands.len(), 0);
    }

    #[tokio::test]
    async fn all_devices_flag_fans_out_one_command_per_serial() {
        let scheduler = build(&["d1", "d2", "d3"], FreeDeviceState::Available).await;
        scheduler
            .add_command(&args(&["run", "--all-devices"]), 0)
            .await
            .unwrap();
        assert_eq!(scheduler.inner.lock().await.all_commands.len(), 3);
    }

    async fn build_failing(
        serials: &[&str],
        error: fn() -> SchedulerError,
    ) -> (Arc<CommandScheduler>, Arc<FakeDeviceManager>) {
        use crate::invocation::runner::tests::FailingInvocationRunner;

        let device_manager = Arc::new(FakeDeviceManager::new(serials));
        let runner = Arc::new(FailingInvocationRunner::new(error));
        let config_factory = Arc::new(ArgvConfigFactory);
        let device_tracker = Arc::new(DeviceTracker::new());
        let util_monitor = Arc::new(DeviceUtilStatsMonitor::new(
            DeviceConfig::default().utilization_window_ms,
            Default::default(),
        ));
        let scheduler = CommandScheduler::new(
            device_manager.clone(),
            runner,
            config_factory,
            device_tracker,
            util_monitor,
            scheduler_config(),
        );
        (scheduler, device_manager)
    }

    #[tokio::test]
    async fn unresponsive_error_frees_device_as_unresponsive_and_untracks_command() {
        let (scheduler, device_manager) =
            build_failing(&["d1"], || SchedulerError::DeviceUnresponsive("timed out".into())).await;
        let handle = tokio::spawn(scheduler.clone().start());
        scheduler.wait_until_started().await;

        scheduler.add_command(&args(&["run", "x"]), 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(scheduler.inner.lock().await.all_commands.len(), 0);
        assert!(scheduler.inner.lock().await.invocations.is_empty());
        let freed = device_manager.freed.lock().await;
        assert_eq!(freed.len(), 1);
        assert!(matches!(freed[0].1, FreeDeviceState::Unresponsive));

        scheduler.shutdown_on_empty();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    #[tokio::test]
    async fn unavailable_error_frees_device_as_unavailable() {
        let (scheduler, device_manager) =
            build_failing(&["d1"], || SchedulerError::DeviceUnavailable("offline".into())).await;
        let handle = tokio::spawn(scheduler.clone().start());
        scheduler.wait_until_started().await;

        scheduler.add_command(&args(&["run", "x"]), 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let freed = device_manager.freed.lock().await;
        assert_eq!(freed.len(), 1);
        assert!(matches!(freed[0].1, FreeDeviceState::Unavailable));

        scheduler.shutdown_on_empty();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    #[tokio::test]
    async fn fatal_host_error_triggers_shutdown() {
        let (scheduler, _device_manager) =
            build_failing(&["d1"], || SchedulerError::FatalHostError("driver crashed".into())).await;
        let handle = tokio::spawn(scheduler.clone().start());
        scheduler.wait_until_started().await;

        scheduler.add_command(&args(&["run", "x"]), 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(scheduler.shutdown_requested.load(AtomicOrdering::SeqCst));

        // A command added after the fatal error is discarded, not dispatched,
        // and the main loop exits on its own once the queue drains.
        scheduler.add_command(&args(&["run", "y"]), 0).await.unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    #[tokio::test]
    async fn generic_invocation_failure_frees_device_as_available() {
        let (scheduler, device_manager) =
            build_failing(&["d1"], || SchedulerError::InvocationFailure("crashed".into())).await;
        let handle = tokio::spawn(scheduler.clone().start());
        scheduler.wait_until_started().await;

        scheduler.add_command(&args(&["run", "x"]), 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let freed = device_manager.freed.lock().await;
        assert_eq!(freed.len(), 1);
        assert!(matches!(freed[0].1, FreeDeviceState::Available));

        scheduler.shutdown_on_empty();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    #[tokio::test]
    async fn exec_time_advances_by_actual_elapsed_invocation_time() {
        let device_manager = Arc::new(FakeDeviceManager::new(&["d1"]));
        let runner = Arc::new(ImmediateInvocationRunner::with_delay(
            FreeDeviceState::Available,
            Duration::from_millis(40),
        ));
        let scheduler = CommandScheduler::new(
            device_manager,
            runner,
            Arc::new(ArgvConfigFactory),
            Arc::new(DeviceTracker::new()),
            Arc::new(DeviceUtilStatsMonitor::new(
                DeviceConfig::default().utilization_window_ms,
                Default::default(),
            )),
            scheduler_config(),
        );

        let id = scheduler.id_gen.next_id();
        let tracker = CommandTracker::new(id, args(&["run", "x"]), 0);
        let config = ArgvConfigFactory
            .create_configuration_from_args(&args(&["run", "x"]))
            .unwrap();
        let command = Arc::new(ExecutableCommand::new(tracker.clone(), config, false, 0));
        let handle_arc: Arc<dyn crate::device::DeviceHandle> =
            crate::invocation::runner::tests::fake_handle("d1");
        scheduler.spawn_invocation(command, handle_arc).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(
            tracker.total_exec_time_ms() >= 35,
            "expected total_exec_time_ms to advance by roughly the invocation's delay, got {}",
            tracker.total_exec_time_ms()
        );
    }
}
