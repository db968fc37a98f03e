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

//! Hardware buffers, their backends and the device contract they run on.

mod device;
mod discard_storage;
mod hardware_buffer;
mod manager;
mod persistent;
mod storage;
mod usage;

pub use device::*;
pub use discard_storage::DiscardStorage;
pub use hardware_buffer::{BufferLockGuard, HardwareBuffer};
pub use manager::{HardwareBufferDescriptor, HardwareBufferManager};
pub use persistent::PersistentRingStorage;
pub use storage::{BufferStorage, DeviceStorage, StorageKind, SystemMemoryStorage};
pub use usage::{BufferUsage, LockOptions, UsageClass};
