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

//! Device memory monitor
//!
//! Reports buffer memory of any device implementing `DeviceMemoryProvider`
//! through the ResourceMonitor interface.

use std::borrow::Cow;
use std::sync::Weak;
use tessera_core::telemetry::{
    DeviceMemoryProvider, MonitoredResourceType, ResourceMonitor, ResourceUsageReport,
};

/// Monitor over the buffer memory of a device.
#[derive(Debug)]
pub struct DeviceMemoryMonitor {
    /// Weak reference so the monitor never keeps a device alive
    provider: Weak<dyn DeviceMemoryProvider>,
    monitor_id: String,
}

impl DeviceMemoryMonitor {
    /// Create a new device memory monitor
    pub fn new(provider: Weak<dyn DeviceMemoryProvider>, monitor_id: String) -> Self {
        Self {
            provider,
            monitor_id,
        }
    }
}

impl ResourceMonitor for DeviceMemoryMonitor {
    fn monitor_id(&self) -> Cow<'static, str> {
        Cow::Owned(self.monitor_id.clone())
    }

    fn resource_type(&self) -> MonitoredResourceType {
        MonitoredResourceType::Vram
    }

    fn get_usage_report(&self) -> ResourceUsageReport {
        match self.provider.upgrade() {
            Some(provider) => ResourceUsageReport {
                current_bytes: provider.allocated_bytes(),
                peak_bytes: Some(provider.peak_bytes()),
                total_capacity_bytes: provider.capacity_bytes(),
            },
            // Device is gone
            None => ResourceUsageReport::default(),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
