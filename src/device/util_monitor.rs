//! Device Utilization Monitor (§4.C): sliding 24h window accounting of
//! allocated vs. available time per device.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::StubDevicePolicy;

/// A half-open or closed interval during which a device was in a given
/// state. `end` is `None` iff this is the most recent record for its list
/// (UM-1).
#[derive(Debug, Clone, Copy)]
struct StateRecord {
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

/// Which kind of stub a device is, if any. `IncludeIfUsed` is scoped to
/// "at least one same-category stub has ever been allocated" (§4.C), so a
/// null device's inclusion must not depend on whether some unrelated
/// emulator was ever used, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubCategory {
    NullDevice,
    Emulator,
}

struct DeviceHistory {
    available: VecDeque<StateRecord>,
    allocated: VecDeque<StateRecord>,
    stub_category: Option<StubCategory>,
    ever_allocated: bool,
}

impl DeviceHistory {
    fn new(stub_category: Option<StubCategory>) -> Self {
        Self {
            available: VecDeque::new(),
            allocated: VecDeque::new(),
            stub_category,
            ever_allocated: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilizationStats {
    pub total_pct: u32,
    pub per_device_pct: HashMap<String, u32>,
}

/// Tracks per-device allocated/available intervals and answers sliding
/// 24h-window utilization queries. Internally synchronized: all public
/// methods see a coherent snapshot.
pub struct DeviceUtilStatsMonitor {
    window_ms: i64,
    stub_policy: StubDevicePolicy,
    devices: Mutex<HashMap<String, DeviceHistory>>,
}

impl DeviceUtilStatsMonitor {
    pub fn new(window_ms: i64, stub_policy: StubDevicePolicy) -> Self {
        Self {
            window_ms,
            stub_policy,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Records that `serial` just became available at `now`, closing any
    /// open allocated record.
    pub async fn record_available(&self, serial: &str, stub_category: Option<StubCategory>, now: DateTime<Utc>) {
        let mut devices = self.devices.lock().await;
        let history = devices
            .entry(serial.to_string())
            .or_insert_with(|| DeviceHistory::new(stub_category));

        if let Some(last) = history.allocated.back_mut() {
            if last.end.is_none() {
                last.end = Some(now);
            }
        }
        history.available.push_back(StateRecord {
            start: now,
            end: None,
        });
    }

    /// Records that `serial` just became allocated at `now`, closing any
    /// open available record.
    pub async fn record_allocated(&self, serial: &str, stub_category: Option<StubCategory>, now: DateTime<Utc>) {
        let mut devices = self.devices.lock().await;
        let history = devices
            .entry(serial.to_string())
            .or_insert_with(|| DeviceHistory::new(stub_category));

        if let Some(last) = history.available.back_mut() {
            if last.end.is_none() {
                last.end = Some(now);
            }
        }
        history.allocated.push_back(StateRecord {
            start: now,
            end: None,
        });
        history.ever_allocated = true;
    }

    /// Computes sliding-window utilization as of `now`, evicting records
    /// that have fully expired out of the window.
    pub async fn get_utilization_stats(&self, now: DateTime<Utc>) -> UtilizationStats {
        let window_start = now - chrono::Duration::milliseconds(self.window_ms);
        let mut devices = self.devices.lock().await;

        let null_device_used = self.stub_policy == StubDevicePolicy::IncludeIfUsed
            && devices
                .values()
                .any(|h| h.stub_category == Some(StubCategory::NullDevice) && h.ever_allocated);
        let emulator_used = self.stub_policy == StubDevicePolicy::IncludeIfUsed
            && devices
                .values()
                .any(|h| h.stub_category == Some(StubCategory::Emulator) && h.ever_allocated);

        let mut per_device_pct = HashMap::new();
        let mut total_alloc_ms: i64 = 0;
        let mut total_span_ms: i64 = 0;

        for (serial, history) in devices.iter_mut() {
            evict_expired(&mut history.available, window_start);
            evict_expired(&mut history.allocated, window_start);

            let include = match history.stub_category {
                None => true,
                Some(category) => match self.stub_policy {
                    StubDevicePolicy::AlwaysInclude => true,
                    StubDevicePolicy::Ignore => false,
                    StubDevicePolicy::IncludeIfUsed => {
                        let same_category_used = match category {
                            StubCategory::NullDevice => null_device_used,
                            StubCategory::Emulator => emulator_used,
                        };
                        same_category_used && history.ever_allocated
                    }
                },
            };
            if !include {
                continue;
            }

            let alloc_ms = clipped_duration_ms(&history.allocated, window_start, now);
            let avail_ms = clipped_duration_ms(&history.available, window_start, now);
            let span = alloc_ms + avail_ms;

            let pct = if span == 0 {
                0
            } else {
                ((alloc_ms as f64 / span as f64) * 100.0).floor() as u32
            };
            per_device_pct.insert(serial.clone(), pct);

            total_alloc_ms += alloc_ms;
            total_span_ms += span;
        }

        let total_pct = if total_span_ms == 0 {
            0
        } else {
            ((total_alloc_ms as f64 / total_span_ms as f64) * 100.0).floor() as u32
        };

        UtilizationStats {
            total_pct,
            per_device_pct,
        }
    }

    /// Returns the set of device serials currently tracked, for tests.
    pub async fn tracked(&self) -> HashSet<String> {
        self.devices.lock().await.keys().cloned().collect()
    }
}

/// Evicts records from the front of `records` that have fully expired
/// (ended before `window_start`), relying on the monotonic ordering
/// guaranteed by append-only insertion (UM-1).
fn evict_expired(records: &mut VecDeque<StateRecord>, window_start: DateTime<Utc>) {
    while let Some(front) = records.front() {
        match front.end {
            Some(end) if end < window_start => {
                records.pop_front();
            }
            _ => break,
        }
    }
}

fn clipped_duration_ms(
    records: &VecDeque<StateRecord>,
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> i64 {
    records
        .iter()
        .map(|r| {
            let start = r.start.max(window_start);
            let end = r.end.unwrap_or(now).min(now);
            (end - start).num_milliseconds().max(0)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn empty_history_is_zero() {
        let monitor = DeviceUtilStatsMonitor::new(86_400_000, StubDevicePolicy::Ignore);
        let stats = monitor.get_utilization_stats(t(0)).await;
        assert_eq!(stats.total_pct, 0);
    }

    #[tokio::test]
    async fn continuously_allocated_device_is_100_pct() {
        let monitor = DeviceUtilStatsMonitor::new(86_400_000, StubDevicePolicy::Ignore);
        monitor.record_allocated("d1", None, t(0)).await;

        let stats = monitor.get_utilization_stats(t(1000)).await;
        assert_eq!(stats.per_device_pct.get("d1"), Some(&100));
        assert_eq!(stats.total_pct, 100);
    }

    #[tokio::test]
    async fn alternating_equal_spans_is_50_pct() {
        let monitor = DeviceUtilStatsMonitor::new(86_400_000, StubDevicePolicy::Ignore);
        monitor.record_allocated("d1", None, t(0)).await;
        monitor.record_available("d1", None, t(100)).await;
        monitor.record_allocated("d1", None, t(200)).await;
        monitor.record_available("d1", None, t(300)).await;

        let stats = monitor.get_utilization_stats(t(300)).await;
        assert_eq!(stats.per_device_pct.get("d1"), Some(&50));
    }

    #[tokio::test]
    async fn expired_records_are_evicted() {
        let monitor = DeviceUtilStatsMonitor::new(1_000, StubDevicePolicy::Ignore);
        monitor.record_allocated("d1", None, t(0)).await;
        monitor.record_available("d1", None, t(1)).await;

        // far outside the 1s window
        let stats = monitor.get_utilization_stats(t(10_000)).await;
        assert_eq!(stats.total_pct, 0);
    }

    #[tokio::test]
    async fn stub_ignore_excludes_device() {
        let monitor = DeviceUtilStatsMonitor::new(86_400_000, StubDevicePolicy::Ignore);
        monitor
            .record_allocated("stub1", Some(StubCategory::NullDevice), t(0))
            .await;
        let stats = monitor.get_utilization_stats(t(100)).await;
        assert!(stats.per_device_pct.get("stub1").is_none());
    }

    #[tokio::test]
    async fn include_if_used_is_scoped_to_the_same_stub_category() {
        let monitor = DeviceUtilStatsMonitor::new(86_400_000, StubDevicePolicy::IncludeIfUsed);
        // A null device has been allocated, so same-category null devices
        // qualify. An emulator that has only ever been seen available (never
        // allocated) must stay excluded even though some stub category was
        // used elsewhere — inclusion is scoped per-category, not global.
        monitor
            .record_allocated("null1", Some(StubCategory::NullDevice), t(0))
            .await;
        monitor
            .record_available("emu1", Some(StubCategory::Emulator), t(0))
            .await;

        let stats = monitor.get_utilization_stats(t(100)).await;
        assert!(stats.per_device_pct.contains_key("null1"));
        assert!(!stats.per_device_pct.contains_key("emu1"));
    }
}
