//! Command File Watcher (§4.H): polls command files (and their
//! dependencies) for mtime changes and triggers a full reload.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::scheduler::engine::CommandScheduler;

/// One watched command file plus the files it depends on (watched for
/// change but never independently re-executed).
#[derive(Debug, Clone)]
pub struct CommandFile {
    pub path: PathBuf,
    pub extra_args: Vec<String>,
    pub dependencies: Vec<PathBuf>,
    last_seen_mtime: Option<DateTime<Utc>>,
    dependency_mtimes: HashMap<PathBuf, Option<DateTime<Utc>>>,
}

impl CommandFile {
    pub fn new(path: impl Into<PathBuf>, extra_args: Vec<String>, dependencies: Vec<PathBuf>) -> Self {
        Self {
            path: path.into(),
            extra_args,
            dependencies,
            last_seen_mtime: None,
            dependency_mtimes: HashMap::new(),
        }
    }
}

fn mtime_of(path: &std::path::Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Polls its watchlist on a fixed interval; on any mtime change among a
/// primary file or one of its dependencies, clears the scheduler's queue
/// and re-parses every primary file.
pub struct CommandFileWatcher {
    scheduler: Arc<CommandScheduler>,
    files: tokio::sync::Mutex<Vec<CommandFile>>,
    poll_interval: Duration,
    cancel: Notify,
    cancelled: std::sync::atomic::AtomicBool,
}

impl CommandFileWatcher {
    pub fn new(scheduler: Arc<CommandScheduler>, files: Vec<CommandFile>, poll_interval: Duration) -> Self {
        Self {
            scheduler,
            files: tokio::sync::Mutex::new(files),
            poll_interval,
            cancel: Notify::new(),
            cancelled: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.cancel.notify_one();
    }

    /// Runs the 20s poll loop until `cancel()` is called. Intended to be
    /// spawned as its own task.
    pub async fn run(&self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.cancel.notified() => {
                    break;
                }
            }
            if self.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            if let Err(err) = self.poll_once().await {
                warn!(error = %err, "command file watcher poll failed");
            }
        }
    }

    async fn poll_once(&self) -> Result<(), String> {
        let mut files = self.files.lock().await;
        let mut changed = false;

        for file in files.iter() {
            let primary_mtime = mtime_of(&file.path);
            if primary_mtime != file.last_seen_mtime {
                changed = true;
                break;
            }
            for dep in &file.dependencies {
                let dep_mtime = mtime_of(dep);
                let last_dep_mtime = file.dependency_mtimes.get(dep).copied().flatten();
                if dep_mtime != last_dep_mtime {
                    changed = true;
                    break;
                }
            }
            if changed {
                break;
            }
        }

        if !changed {
            return Ok(());
        }

        info!("command file change detected, reloading");
        self.scheduler.remove_all_commands().await;

        for file in files.iter_mut() {
            file.last_seen_mtime = mtime_of(&file.path);
            let deps = file.dependencies.clone();
            for dep in deps {
                let m = mtime_of(&dep);
                file.dependency_mtimes.insert(dep, m);
            }
            let contents = match std::fs::read_to_string(&file.path) {
                Ok(c) => c,
                Err(err) => {
                    warn!(path = ?file.path, error = %err, "failed to read command file");
                    continue;
                }
            };
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let mut args: Vec<String> = line.split_whitespace().map(|s| s.to_string()).collect();
                args.extend(file.extra_args.clone());
                if let Err(err) = self.scheduler.add_command(&args, 0).await {
                    warn!(line = %line, error = %err, "failed to add command from command file");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::config_factory::ArgvConfigFactory;
    use crate::config::SchedulerConfig;
    use crate::device::manager::tests::FakeDeviceManager;
    use crate::device::{DeviceTracker, DeviceUtilStatsMonitor, FreeDeviceState};
    use crate::invocation::runner::tests::ImmediateInvocationRunner;
    use std::io::Write;

    async fn scheduler() -> Arc<CommandScheduler> {
        let device_manager = Arc::new(FakeDeviceManager::new(&["d1"]));
        let runner = Arc::new(ImmediateInvocationRunner::new(FreeDeviceState::Available));
        let config_factory = Arc::new(ArgvConfigFactory);
        CommandScheduler::new(
            device_manager,
            runner,
            config_factory,
            Arc::new(DeviceTracker::new()),
            Arc::new(DeviceUtilStatsMonitor::new(
                DeviceConfig::default().utilization_window_ms,
                Default::default(),
            )),
            SchedulerConfig {
                queue_poll_ms: 10,
                allocation_backoff_ms: 5,
                starvation_nudge_ms: 1,
            },
        )
    }

    #[tokio::test]
    async fn initial_poll_with_no_prior_mtime_loads_commands() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("commands.txt");
        let mut f = std::fs::File::create(&file_path).unwrap();
        writeln!(f, "run x").unwrap();
        drop(f);

        let sched = scheduler().await;
        let watcher = CommandFileWatcher::new(
            sched.clone(),
            vec![CommandFile::new(file_path, vec![], vec![])],
            Duration::from_secs(20),
        );

        watcher.poll_once().await.unwrap();
        assert_eq!(sched.command_count().await, 1);
    }

    #[tokio::test]
    async fn dependency_mtime_change_on_a_later_poll_triggers_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("commands.txt");
        let dep_path = dir.path().join("dep.txt");
        std::fs::write(&file_path, "run x\n").unwrap();
        std::fs::write(&dep_path, "v1\n").unwrap();

        let sched = scheduler().await;
        let watcher = CommandFileWatcher::new(
            sched.clone(),
            vec![CommandFile::new(file_path.clone(), vec![], vec![dep_path.clone()])],
            Duration::from_secs(20),
        );

        // First poll always reloads (primary file's mtime is unseen yet).
        watcher.poll_once().await.unwrap();
        assert_eq!(sched.command_count().await, 1);

        // Second poll with nothing changed must not reload again.
        sched.remove_all_commands().await;
        watcher.poll_once().await.unwrap();
        assert_eq!(sched.command_count().await, 0);

        // Touch only the dependency, leaving the primary file's mtime alone.
        // Sleep past a full second so this is detected even on filesystems
        // with only second-granularity mtimes.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        std::fs::write(&dep_path, "v2\n").unwrap();

        watcher.poll_once().await.unwrap();
        assert_eq!(
            sched.command_count().await,
            1,
            "a dependency mtime change must trigger a reload even on a later poll"
        );
    }
}
