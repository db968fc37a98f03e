// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Discard pool monitor
//!
//! The pool lives on the device thread and cannot be polled from elsewhere,
//! so the owner pushes a snapshot once per frame with
//! [`DiscardPoolMonitor::record`].

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tessera_core::telemetry::{MonitoredResourceType, ResourceMonitor, ResourceUsageReport};
use tessera_core::DiscardBufferStats;

/// Passive monitor over a [`DiscardBufferManager`](tessera_core::DiscardBufferManager).
#[derive(Debug)]
pub struct DiscardPoolMonitor {
    monitor_id: String,
    latest: Mutex<DiscardBufferStats>,
    peak_used_bytes: AtomicU64,
}

impl DiscardPoolMonitor {
    /// Create a new discard pool monitor
    pub fn new(monitor_id: String) -> Self {
        Self {
            monitor_id,
            latest: Mutex::new(DiscardBufferStats::default()),
            peak_used_bytes: AtomicU64::new(0),
        }
    }

    /// Stores the latest pool snapshot.
    pub fn record(&self, stats: DiscardBufferStats) {
        self.peak_used_bytes
            .fetch_max(stats.used_bytes(), Ordering::Relaxed);
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = stats;
    }

    /// The last snapshot passed to [`record`](Self::record).
    pub fn latest_stats(&self) -> DiscardBufferStats {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResourceMonitor for DiscardPoolMonitor {
    fn monitor_id(&self) -> Cow<'static, str> {
        Cow::Owned(self.monitor_id.clone())
    }

    fn resource_type(&self) -> MonitoredResourceType {
        MonitoredResourceType::DiscardPool
    }

    fn get_usage_report(&self) -> ResourceUsageReport {
        let stats = self.latest_stats();
        ResourceUsageReport {
            current_bytes: stats.used_bytes(),
            peak_bytes: Some(self.peak_used_bytes.load(Ordering::Relaxed)),
            total_capacity_bytes: Some(stats.capacity_bytes),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tracks_used_and_peak_bytes() {
        let monitor = DiscardPoolMonitor::new("pool".to_string());
        monitor.record(DiscardBufferStats {
            capacity_bytes: 4096,
            free_bytes: 1024,
            unsafe_bytes: 1024,
            ..Default::default()
        });
        monitor.record(DiscardBufferStats {
            capacity_bytes: 4096,
            free_bytes: 3072,
            ..Default::default()
        });

        let report = monitor.get_usage_report();
        assert_eq!(report.current_bytes, 1024);
        assert_eq!(report.peak_bytes, Some(2048));
        assert_eq!(report.total_capacity_bytes, Some(4096));
        assert_eq!(monitor.latest_stats().free_bytes, 3072);
    }
}
