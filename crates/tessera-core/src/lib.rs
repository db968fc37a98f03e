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

//! # Tessera Core
//!
//! Backend-agnostic GPU buffer lifecycle: the lock/unlock state machine of
//! [`HardwareBuffer`], the frame fence rule of [`FrameTracker`], the best-fit
//! [`BlockAllocator`] and the [`DiscardBufferManager`] that emulates discard
//! semantics on top of one growable backing store.
//!
//! Concrete devices live in `tessera-infra`; everything here talks to them
//! through the [`BufferDevice`] trait and opaque [`BufferId`] handles.
//!
//! ```text
//! HardwareBuffer::lock(opts)
//!       │
//!       ▼
//!   BufferStorage ──► SystemMemory | Device | PersistentRing | Discard
//!                                                              │
//!                                                              ▼
//!                                          DiscardBufferManager::map()
//!                                           ├─ reuse (fence expired)
//!                                           ├─ UnsafeBlock queue
//!                                           ├─ BlockAllocator best-fit
//!                                           └─ grow backing store + stall
//! ```

#![warn(missing_docs)]

pub mod allocator;
pub mod buffer;
pub mod config;
pub mod discard;
pub mod error;
pub mod frame;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_utils;

pub use allocator::{Allocation, Block, BlockAllocator, UnsafeBlock};
pub use buffer::{
    BufferDescriptor, BufferDevice, BufferId, BufferLockGuard, BufferStorage, BufferUsage,
    DeviceStorage, DiscardStorage, HardwareBuffer, HardwareBufferDescriptor,
    HardwareBufferManager, LockOptions, MemoryFlags, PersistentRingStorage, StorageKind,
    SystemMemoryStorage, UsageClass,
};
pub use config::BufferSettings;
pub use discard::{
    DiscardBuffer, DiscardBufferId, DiscardBufferManager, DiscardBufferStats, MappedRegion,
};
pub use error::{BufferError, ResourceError};
pub use frame::FrameTracker;
