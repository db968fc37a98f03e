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

//! The backend side of a [`HardwareBuffer`](super::HardwareBuffer).
//!
//! A storage is picked once, when the buffer is created, and never changes.
//! The façade only sees this trait.

use super::device::{BufferDescriptor, BufferDevice, BufferId, MemoryFlags};
use super::usage::LockOptions;
use crate::error::BufferError;
use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;

/// Which strategy backs a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Plain host memory.
    SystemMemory,
    /// A dedicated device buffer.
    Device,
    /// A region of the shared discard backing store.
    Discard,
    /// One device buffer holding a copy per frame in flight.
    PersistentRing,
}

/// Capability set every buffer backend implements.
///
/// Offsets are relative to the logical buffer. Range checks happen in the
/// façade before any of these methods is called.
pub trait BufferStorage: Debug {
    /// The strategy behind this storage.
    fn kind(&self) -> StorageKind;

    /// Logical size in bytes.
    fn size_bytes(&self) -> u64;

    /// Host memory the CPU can use in place, if any.
    fn host_memory(&self) -> Option<&[u8]> {
        None
    }

    /// Mutable access to [`host_memory`](Self::host_memory).
    fn host_memory_mut(&mut self) -> Option<&mut [u8]> {
        None
    }

    /// Copies current contents into `dest`. May stall the device.
    fn read(&self, offset: u64, dest: &mut [u8]) -> Result<(), BufferError>;

    /// Uploads `src` at `offset` under the given lock options.
    fn write(&mut self, offset: u64, src: &[u8], options: LockOptions) -> Result<(), BufferError>;

    /// The native buffer and base offset of the current contents, for GPU
    /// copies and command recording.
    fn device_range(&self) -> Option<(BufferId, u64)> {
        None
    }

    /// Copies `length` bytes from a native buffer on the GPU.
    ///
    /// Returns `Ok(false)` when this storage cannot be a copy destination, in
    /// which case the caller falls back to a CPU round trip.
    fn copy_from_device(
        &mut self,
        _source: BufferId,
        _source_offset: u64,
        _dest_offset: u64,
        _length: u64,
        _options: LockOptions,
    ) -> Result<bool, BufferError> {
        Ok(false)
    }

    /// Pushes initial contents, bypassing immutability.
    fn first_upload(&mut self, offset: u64, src: &[u8]) -> Result<(), BufferError> {
        self.write(offset, src, LockOptions::Discard)
    }

    /// Whether updates always replace the whole buffer.
    fn is_discardable(&self) -> bool {
        false
    }

    /// Gives the backing memory back. Called exactly once.
    fn release(&mut self) -> Result<(), BufferError> {
        Ok(())
    }
}

/// Host memory, used for CPU-only buffers.
#[derive(Debug, Clone)]
pub struct SystemMemoryStorage {
    data: Vec<u8>,
}

impl SystemMemoryStorage {
    /// Allocates `size` zeroed bytes.
    pub fn new(size: u64) -> Self {
        Self {
            data: vec![0; size as usize],
        }
    }
}

impl BufferStorage for SystemMemoryStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::SystemMemory
    }

    fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    fn host_memory(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn host_memory_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.data)
    }

    fn read(&self, offset: u64, dest: &mut [u8]) -> Result<(), BufferError> {
        let start = offset as usize;
        dest.copy_from_slice(&self.data[start..start + dest.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u64, src: &[u8], _options: LockOptions) -> Result<(), BufferError> {
        let start = offset as usize;
        self.data[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }
}

/// A dedicated device buffer.
///
/// Reads stall the device: the GPU may still be writing the buffer.
#[derive(Debug)]
pub struct DeviceStorage {
    device: Arc<dyn BufferDevice>,
    id: BufferId,
    size: u64,
    immutable: bool,
}

impl DeviceStorage {
    /// Creates the backing device buffer.
    pub fn new(
        device: Arc<dyn BufferDevice>,
        label: Option<&str>,
        size: u64,
        memory: MemoryFlags,
        immutable: bool,
    ) -> Result<Self, BufferError> {
        let id = device.create_buffer(&BufferDescriptor {
            label: label.map(|l| Cow::Owned(l.to_string())),
            size,
            memory,
        })?;
        Ok(Self {
            device,
            id,
            size,
            immutable,
        })
    }

    /// The native buffer.
    pub fn buffer_id(&self) -> BufferId {
        self.id
    }
}

impl BufferStorage for DeviceStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Device
    }

    fn size_bytes(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, dest: &mut [u8]) -> Result<(), BufferError> {
        self.device.stall()?;
        self.device.read_buffer(self.id, offset, dest)?;
        Ok(())
    }

    fn write(&mut self, offset: u64, src: &[u8], _options: LockOptions) -> Result<(), BufferError> {
        if self.immutable {
            return Err(BufferError::InvalidState(
                "Immutable buffers only accept their initial upload".to_string(),
            ));
        }
        self.device.write_buffer(self.id, offset, src)?;
        Ok(())
    }

    fn device_range(&self) -> Option<(BufferId, u64)> {
        Some((self.id, 0))
    }

    fn copy_from_device(
        &mut self,
        source: BufferId,
        source_offset: u64,
        dest_offset: u64,
        length: u64,
        _options: LockOptions,
    ) -> Result<bool, BufferError> {
        if self.immutable {
            return Err(BufferError::InvalidState(
                "Immutable buffers cannot be copy destinations".to_string(),
            ));
        }
        self.device
            .copy_buffer_to_buffer(source, source_offset, self.id, dest_offset, length)?;
        Ok(true)
    }

    fn first_upload(&mut self, offset: u64, src: &[u8]) -> Result<(), BufferError> {
        self.device.write_buffer(self.id, offset, src)?;
        Ok(())
    }

    fn release(&mut self) -> Result<(), BufferError> {
        self.device.destroy_buffer(self.id)?;
        Ok(())
    }
}
