//! Integration coverage for the Simple dispatch, Fairness under scarcity,
//! and Loop mode scenarios (SPEC_FULL.md §8).

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{args, FakeDeviceManager, ImmediateInvocationRunner};
use fleetsched::config::{DeviceConfig, SchedulerConfig};
use fleetsched::config_factory::ArgvConfigFactory;
use fleetsched::device::{DeviceTracker, DeviceUtilStatsMonitor, FreeDeviceState};
use fleetsched::scheduler::CommandScheduler;

fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        queue_poll_ms: 10,
        allocation_backoff_ms: 5,
        starvation_nudge_ms: 1,
    }
}

#[tokio::test]
async fn simple_dispatch_both_devices_return_available() {
    let device_manager = Arc::new(FakeDeviceManager::simple(&["d1", "d2"]));
    let runner = Arc::new(ImmediateInvocationRunner::new(FreeDeviceState::Available));
    let scheduler = CommandScheduler::new(
        device_manager.clone(),
        runner.clone(),
        Arc::new(ArgvConfigFactory),
        Arc::new(DeviceTracker::new()),
        Arc::new(DeviceUtilStatsMonitor::new(
            DeviceConfig::default().utilization_window_ms,
            Default::default(),
        )),
        fast_scheduler_config(),
    );

    let handle = tokio::spawn(scheduler.clone().start());
    scheduler.wait_until_started().await;

    scheduler.add_command(&args(&["run", "x"]), 0).await.unwrap();
    scheduler.add_command(&args(&["run", "y"]), 0).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        runner.invocation_count.load(std::sync::atomic::Ordering::SeqCst),
        2
    );

    scheduler.shutdown_on_empty();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

    let freed = device_manager.freed.lock().await;
    assert_eq!(freed.len(), 2);
    assert!(freed.iter().all(|(_, state)| matches!(state, FreeDeviceState::Available)));
}

#[tokio::test]
async fn fairness_dispatch_order_favors_lowest_total_exec_time() {
    let device_manager = Arc::new(FakeDeviceManager::simple(&["d1"]));
    let runner = Arc::new(ImmediateInvocationRunner::with_delay(
        FreeDeviceState::Available,
        Duration::from_millis(30),
    ));
    let scheduler = CommandScheduler::new(
        device_manager,
        runner.clone(),
        Arc::new(ArgvConfigFactory),
        Arc::new(DeviceTracker::new()),
        Arc::new(DeviceUtilStatsMonitor::new(
            DeviceConfig::default().utilization_window_ms,
            Default::default(),
        )),
        fast_scheduler_config(),
    );

    let handle = tokio::spawn(scheduler.clone().start());
    scheduler.wait_until_started().await;

    scheduler
        .add_command(&args(&["run", "b"]), 1000)
        .await
        .unwrap();
    scheduler
        .add_command(&args(&["run", "a"]), 0)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    scheduler.shutdown_on_empty();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

    let invoked = runner.invoked_args.lock().await;
    assert_eq!(invoked.len(), 2);
    assert_eq!(invoked[0], args(&["run", "a"]));
    assert_eq!(invoked[1], args(&["run", "b"]));
}

#[tokio::test]
async fn total_exec_time_advances_after_invocation_and_reorders_the_queue() {
    let device_manager = Arc::new(FakeDeviceManager::simple(&["d1"]));
    let runner = Arc::new(ImmediateInvocationRunner::with_delay(
        FreeDeviceState::Available,
        Duration::from_millis(30),
    ));
    let scheduler = CommandScheduler::new(
        device_manager,
        runner.clone(),
        Arc::new(ArgvConfigFactory),
        Arc::new(DeviceTracker::new()),
        Arc::new(DeviceUtilStatsMonitor::new(
            DeviceConfig::default().utilization_window_ms,
            Default::default(),
        )),
        fast_scheduler_config(),
    );

    let handle = tokio::spawn(scheduler.clone().start());
    scheduler.wait_until_started().await;

    // "a" loops with no minimum gap, so once its first invocation returns
    // its tracker's total_exec_time_ms is bumped by the real elapsed delay
    // before it's handed back to the queue (CT-2).
    scheduler
        .add_command(&args(&["run", "--loop", "--min-loop-time", "0"]), 0)
        .await
        .unwrap();

    // Give the first iteration time to run to completion and be rescheduled.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // "b" starts with total_exec_time_ms == 0, strictly lower than "a"'s
    // now-nonzero accumulated time, so it must win the single device next.
    scheduler.add_command(&args(&["run", "b"]), 0).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    scheduler.shutdown_hard().await;
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

    let invoked = runner.invoked_args.lock().await;
    assert!(
        invoked.len() >= 2,
        "expected at least two invocations, got {}",
        invoked.len()
    );
    assert_eq!(
        invoked[1],
        args(&["run", "b"]),
        "a freshly enqueued zero-exec-time command should dispatch ahead of \
         the looping command's already-elapsed next iteration, invoked order was {invoked:?}"
    );
}

#[tokio::test]
async fn loop_mode_reschedules_after_min_loop_time() {
    let device_manager = Arc::new(FakeDeviceManager::simple(&["d1"]));
    let runner = Arc::new(ImmediateInvocationRunner::new(FreeDeviceState::Available));
    let scheduler = CommandScheduler::new(
        device_manager,
        runner.clone(),
        Arc::new(ArgvConfigFactory),
        Arc::new(DeviceTracker::new()),
        Arc::new(DeviceUtilStatsMonitor::new(
            DeviceConfig::default().utilization_window_ms,
            Default::default(),
        )),
        fast_scheduler_config(),
    );

    let handle = tokio::spawn(scheduler.clone().start());
    scheduler.wait_until_started().await;

    scheduler
        .add_command(&args(&["run", "--loop", "--min-loop-time", "50"]), 0)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let count = runner.invocation_count.load(std::sync::atomic::Ordering::SeqCst);
    assert!(count >= 2, "loop mode should have run more than once, got {count}");

    scheduler.shutdown_hard().await;
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}
