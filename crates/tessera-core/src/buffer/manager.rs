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

//! Creates [`HardwareBuffer`]s and picks their backend.

use super::device::{BufferDevice, MemoryFlags};
use super::discard_storage::DiscardStorage;
use super::hardware_buffer::HardwareBuffer;
use super::persistent::PersistentRingStorage;
use super::storage::{BufferStorage, DeviceStorage, SystemMemoryStorage};
use super::usage::{BufferUsage, UsageClass};
use crate::config::BufferSettings;
use crate::discard::{DiscardBufferManager, DiscardBufferStats};
use crate::error::BufferError;
use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// A descriptor used to create a [`HardwareBuffer`].
#[derive(Debug, Clone)]
pub struct HardwareBufferDescriptor<'a> {
    /// An optional debug label for the buffer.
    pub label: Option<Cow<'a, str>>,
    /// The total size of the buffer in bytes.
    pub size: u64,
    /// How the application uses the buffer.
    pub usage: BufferUsage,
    /// Keep a host copy that serves reads.
    pub shadow: bool,
    /// Contents never change after `initial_data` is uploaded.
    pub immutable: bool,
    /// Bytes uploaded once at creation.
    pub initial_data: Option<&'a [u8]>,
}

impl<'a> HardwareBufferDescriptor<'a> {
    /// An unlabeled, mutable buffer without shadow or initial data.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
            shadow: false,
            immutable: false,
            initial_data: None,
        }
    }
}

/// Owns the device handle and the discard pool of one rendering context.
///
/// Not `Send`: the discard pool is shared with the buffers it created through
/// `Rc<RefCell<_>>`, and all of them live on the device thread.
#[derive(Debug)]
pub struct HardwareBufferManager {
    device: Arc<dyn BufferDevice>,
    settings: BufferSettings,
    discard: Rc<RefCell<DiscardBufferManager>>,
}

impl HardwareBufferManager {
    /// Validates `settings` and creates the discard pool.
    ///
    /// # Errors
    /// * `InvalidArgument` if the settings are invalid or their
    ///   `dynamic_buffer_multiplier` differs from the device's frame tracker.
    pub fn new(device: Arc<dyn BufferDevice>, settings: BufferSettings) -> Result<Self, BufferError> {
        settings.validate()?;
        let device_multiplier = device.frame_tracker().dynamic_buffer_multiplier();
        if settings.dynamic_buffer_multiplier != device_multiplier {
            return Err(BufferError::InvalidArgument(format!(
                "Settings keep {} frames in flight but the device keeps {}",
                settings.dynamic_buffer_multiplier, device_multiplier
            )));
        }
        let discard = DiscardBufferManager::from_settings(device.as_ref(), &settings)?;
        log::debug!(
            "HardwareBufferManager: {} frames in flight, discard pool of {} bytes, persistent mapping {}",
            device.frame_tracker().dynamic_buffer_multiplier(),
            settings.initial_discard_capacity,
            if settings.persistent_mapping { "on" } else { "off" }
        );
        Ok(Self {
            device,
            settings,
            discard: Rc::new(RefCell::new(discard)),
        })
    }

    /// Creates a buffer with the backend its usage calls for.
    ///
    /// | usage                          | backend          |
    /// |--------------------------------|------------------|
    /// | dynamic, write-only, discardable | discard pool   |
    /// | `CpuOnly`                      | system memory    |
    /// | `CpuToGpu`                     | persistent ring (or device buffer) |
    /// | `GpuOnly`, `GpuToCpu`          | device buffer    |
    pub fn create_buffer(
        &self,
        descriptor: &HardwareBufferDescriptor,
    ) -> Result<HardwareBuffer, BufferError> {
        if descriptor.size == 0 {
            return Err(BufferError::InvalidArgument(
                "Buffer size must be non-zero".to_string(),
            ));
        }
        if let Some(data) = descriptor.initial_data {
            if data.len() as u64 > descriptor.size {
                return Err(BufferError::InvalidArgument(format!(
                    "Initial data of {} bytes does not fit in a buffer of {} bytes",
                    data.len(),
                    descriptor.size
                )));
            }
        }

        let usage = if descriptor.shadow {
            descriptor.usage.with_shadow()
        } else {
            descriptor.usage
        };

        if descriptor.immutable {
            if usage.usage_class() != UsageClass::GpuOnly {
                return Err(BufferError::InvalidArgument(format!(
                    "Immutable buffers must be GPU-only, got {:?}",
                    usage.usage_class()
                )));
            }
            if descriptor.initial_data.is_none() {
                return Err(BufferError::InvalidArgument(
                    "Immutable buffers need initial data".to_string(),
                ));
            }
        }

        let label = descriptor.label.as_deref();
        let mut storage = self.create_storage(label, descriptor.size, usage, descriptor.immutable)?;
        if let Some(data) = descriptor.initial_data {
            storage.first_upload(0, data)?;
        }

        log::debug!(
            "HardwareBufferManager: created {:?} buffer '{}' ({} bytes, {:?})",
            storage.kind(),
            label.unwrap_or("unnamed"),
            descriptor.size,
            usage
        );

        let mut buffer = HardwareBuffer::new(
            label.map(str::to_string),
            descriptor.usage,
            storage,
            descriptor.shadow,
        );
        if let (true, Some(data)) = (descriptor.shadow, descriptor.initial_data) {
            buffer.seed_shadow(data);
        }
        Ok(buffer)
    }

    fn create_storage(
        &self,
        label: Option<&str>,
        size: u64,
        usage: BufferUsage,
        immutable: bool,
    ) -> Result<Box<dyn BufferStorage>, BufferError> {
        if usage.is_discardable() && !immutable {
            return Ok(Box::new(DiscardStorage::new(
                self.device.clone(),
                self.discard.clone(),
                size,
                self.settings.discard_alignment,
            )?));
        }

        let storage: Box<dyn BufferStorage> = match usage.usage_class() {
            UsageClass::CpuOnly => Box::new(SystemMemoryStorage::new(size)),
            UsageClass::CpuToGpu if self.settings.persistent_mapping => Box::new(
                PersistentRingStorage::new(self.device.clone(), label, size)?,
            ),
            UsageClass::CpuToGpu => Box::new(DeviceStorage::new(
                self.device.clone(),
                label,
                size,
                MemoryFlags::UPLOAD,
                false,
            )?),
            UsageClass::GpuOnly => Box::new(DeviceStorage::new(
                self.device.clone(),
                label,
                size,
                MemoryFlags::DEVICE_LOCAL | MemoryFlags::COPY_SRC | MemoryFlags::COPY_DST,
                immutable,
            )?),
            UsageClass::GpuToCpu => Box::new(DeviceStorage::new(
                self.device.clone(),
                label,
                size,
                MemoryFlags::DEVICE_LOCAL
                    | MemoryFlags::HOST_VISIBLE
                    | MemoryFlags::COPY_SRC
                    | MemoryFlags::COPY_DST,
                false,
            )?),
        };
        Ok(storage)
    }

    /// Waits for the GPU and lets the discard pool reclaim everything.
    pub fn stall(&self) -> Result<(), BufferError> {
        self.device.stall()?;
        let frames = self.device.frame_tracker();
        self.discard.borrow_mut().notify_device_stalled(&frames);
        Ok(())
    }

    /// The device every buffer of this manager lives on.
    pub fn device(&self) -> &Arc<dyn BufferDevice> {
        &self.device
    }

    /// The settings this manager was created with.
    pub fn settings(&self) -> &BufferSettings {
        &self.settings
    }

    /// Shared handle to the discard pool.
    pub fn discard_manager(&self) -> Rc<RefCell<DiscardBufferManager>> {
        self.discard.clone()
    }

    /// A snapshot of the discard pool counters.
    pub fn discard_stats(&self) -> DiscardBufferStats {
        self.discard.borrow().stats()
    }

    /// Releases the discard backing store.
    ///
    /// Buffers still alive that use the pool fail to release afterwards.
    pub fn destroy(&self) -> Result<(), BufferError> {
        self.discard.borrow_mut().destroy(self.device.as_ref())
    }
}
