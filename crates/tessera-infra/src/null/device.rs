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

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tessera_core::telemetry::DeviceMemoryProvider;
use tessera_core::{
    BufferDescriptor, BufferDevice, BufferId, BufferSettings, FrameTracker, MemoryFlags,
    ResourceError,
};

#[derive(Debug)]
struct NullBufferEntry {
    data: Vec<u8>,
    memory: MemoryFlags,
    label: Option<String>,
}

/// Shared state of a [`NullDevice`], protected by an Arc.
#[derive(Debug)]
struct NullDeviceInternal {
    buffers: Mutex<HashMap<BufferId, NullBufferEntry>>,
    frames: Mutex<FrameTracker>,
    next_buffer_id: AtomicUsize,

    // Memory accounting
    allocated_bytes: AtomicU64,
    peak_bytes: AtomicU64,
    memory_limit: Option<u64>,

    stall_count: AtomicU64,
    copy_count: AtomicU64,
}

/// A device that keeps every buffer in host memory and completes GPU work
/// instantly.
///
/// It stands in for a real GPU in tests and tools. Stalls return immediately
/// but are counted, and an optional memory limit makes allocation failures
/// reproducible.
#[derive(Debug, Clone)]
pub struct NullDevice {
    internal: Arc<NullDeviceInternal>,
}

impl NullDevice {
    /// Creates a device keeping `dynamic_buffer_multiplier` frames in flight.
    pub fn new(dynamic_buffer_multiplier: u32) -> Self {
        Self::build(dynamic_buffer_multiplier, None)
    }

    /// Creates a device configured from `settings`.
    pub fn from_settings(settings: &BufferSettings) -> Self {
        Self::build(settings.dynamic_buffer_multiplier, None)
    }

    /// Creates a device that refuses to hold more than `limit_bytes`.
    pub fn with_memory_limit(dynamic_buffer_multiplier: u32, limit_bytes: u64) -> Self {
        Self::build(dynamic_buffer_multiplier, Some(limit_bytes))
    }

    fn build(dynamic_buffer_multiplier: u32, memory_limit: Option<u64>) -> Self {
        Self {
            internal: Arc::new(NullDeviceInternal {
                buffers: Mutex::new(HashMap::new()),
                frames: Mutex::new(FrameTracker::new(dynamic_buffer_multiplier)),
                next_buffer_id: AtomicUsize::new(0),
                allocated_bytes: AtomicU64::new(0),
                peak_bytes: AtomicU64::new(0),
                memory_limit,
                stall_count: AtomicU64::new(0),
                copy_count: AtomicU64::new(0),
            }),
        }
    }

    /// Submits the frame: the frame counter moves on.
    pub fn end_frame(&self) {
        let mut frames = self.frames();
        frames.advance();
        log::trace!("NullDevice: frame {} begins", frames.current_frame());
    }

    /// The frame currently being recorded.
    pub fn current_frame(&self) -> u64 {
        self.frames().current_frame()
    }

    /// Number of full stalls requested so far.
    pub fn stall_count(&self) -> u64 {
        self.internal.stall_count.load(Ordering::Relaxed)
    }

    /// Number of buffer-to-buffer copies recorded so far.
    pub fn copy_count(&self) -> u64 {
        self.internal.copy_count.load(Ordering::Relaxed)
    }

    /// Bytes held by live buffers.
    pub fn allocated_bytes(&self) -> u64 {
        self.internal.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Highest value [`allocated_bytes`](Self::allocated_bytes) reached.
    pub fn peak_bytes(&self) -> u64 {
        self.internal.peak_bytes.load(Ordering::Relaxed)
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers().map(|b| b.len()).unwrap_or(0)
    }

    /// Size of a live buffer.
    pub fn buffer_size(&self, id: BufferId) -> Option<u64> {
        let buffers = self.buffers().ok()?;
        buffers.get(&id).map(|entry| entry.data.len() as u64)
    }

    /// Memory flags a live buffer was created with.
    pub fn buffer_memory(&self, id: BufferId) -> Option<MemoryFlags> {
        let buffers = self.buffers().ok()?;
        buffers.get(&id).map(|entry| entry.memory)
    }

    /// Label a live buffer was created with.
    pub fn buffer_label(&self, id: BufferId) -> Option<String> {
        let buffers = self.buffers().ok()?;
        buffers.get(&id).and_then(|entry| entry.label.clone())
    }

    /// A weak handle for memory monitors.
    pub fn memory_provider(&self) -> Weak<dyn DeviceMemoryProvider> {
        let weak: Weak<NullDeviceInternal> = Arc::downgrade(&self.internal);
        weak
    }

    fn frames(&self) -> MutexGuard<'_, FrameTracker> {
        // FrameTracker is Copy and always consistent, so a poisoned lock is still usable.
        self.internal
            .frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn buffers(&self) -> Result<MutexGuard<'_, HashMap<BufferId, NullBufferEntry>>, ResourceError> {
        self.internal
            .buffers
            .lock()
            .map_err(|e| ResourceError::BackendError(format!("Mutex poisoned (buffers): {e}")))
    }

    fn range(offset: u64, len: usize, size: usize) -> Result<std::ops::Range<usize>, ResourceError> {
        let start = usize::try_from(offset).map_err(|_| ResourceError::OutOfBounds)?;
        let end = start.checked_add(len).ok_or(ResourceError::OutOfBounds)?;
        if end > size {
            return Err(ResourceError::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl BufferDevice for NullDevice {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let internal = &self.internal;
        let current = internal.allocated_bytes.load(Ordering::Relaxed);
        if let Some(limit) = internal.memory_limit {
            if current.saturating_add(descriptor.size) > limit {
                log::error!(
                    "NullDevice: cannot allocate {} bytes, {} of {} bytes in use",
                    descriptor.size,
                    current,
                    limit
                );
                return Err(ResourceError::OutOfMemory {
                    requested_bytes: descriptor.size,
                });
            }
        }
        let len = usize::try_from(descriptor.size).map_err(|_| ResourceError::OutOfMemory {
            requested_bytes: descriptor.size,
        })?;

        let id = BufferId(internal.next_buffer_id.fetch_add(1, Ordering::Relaxed));
        self.buffers()?.insert(
            id,
            NullBufferEntry {
                data: vec![0; len],
                memory: descriptor.memory,
                label: descriptor.label.as_ref().map(|l| l.to_string()),
            },
        );

        let allocated = internal
            .allocated_bytes
            .fetch_add(descriptor.size, Ordering::Relaxed)
            + descriptor.size;
        internal.peak_bytes.fetch_max(allocated, Ordering::Relaxed);

        log::debug!(
            "NullDevice: Created buffer '{}' with ID: {:?}, size: {} bytes",
            descriptor.label.as_deref().unwrap_or_default(),
            id,
            descriptor.size
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        let entry = self.buffers()?.remove(&id).ok_or(ResourceError::NotFound)?;
        self.internal
            .allocated_bytes
            .fetch_sub(entry.data.len() as u64, Ordering::Relaxed);
        log::debug!("NullDevice: Destroyed buffer with ID: {id:?}");
        Ok(())
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut buffers = self.buffers()?;
        let entry = buffers.get_mut(&id).ok_or(ResourceError::NotFound)?;
        let range = Self::range(offset, data.len(), entry.data.len())?;
        entry.data[range].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, id: BufferId, offset: u64, dest: &mut [u8]) -> Result<(), ResourceError> {
        let buffers = self.buffers()?;
        let entry = buffers.get(&id).ok_or(ResourceError::NotFound)?;
        let range = Self::range(offset, dest.len(), entry.data.len())?;
        dest.copy_from_slice(&entry.data[range]);
        Ok(())
    }

    fn copy_buffer_to_buffer(
        &self,
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), ResourceError> {
        let len = usize::try_from(size).map_err(|_| ResourceError::OutOfBounds)?;
        let mut buffers = self.buffers()?;

        let src = buffers.get(&source).ok_or(ResourceError::NotFound)?;
        let src_range = Self::range(source_offset, len, src.data.len())?;
        let bytes = src.data[src_range].to_vec();

        let dst = buffers.get_mut(&destination).ok_or(ResourceError::NotFound)?;
        let dst_range = Self::range(destination_offset, len, dst.data.len())?;
        dst.data[dst_range].copy_from_slice(&bytes);

        self.internal.copy_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stall(&self) -> Result<(), ResourceError> {
        let stalls = self.internal.stall_count.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!(
            "NullDevice: stall #{} at frame {}",
            stalls,
            self.current_frame()
        );
        Ok(())
    }

    fn frame_tracker(&self) -> FrameTracker {
        *self.frames()
    }
}

impl DeviceMemoryProvider for NullDeviceInternal {
    fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.load(Ordering::SeqCst)
    }

    fn peak_bytes(&self) -> u64 {
        self.peak_bytes.load(Ordering::SeqCst)
    }

    fn capacity_bytes(&self) -> Option<u64> {
        self.memory_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn descriptor(size: u64) -> BufferDescriptor<'static> {
        BufferDescriptor {
            label: Some(Cow::Borrowed("test")),
            size,
            memory: MemoryFlags::UPLOAD,
        }
    }

    #[test]
    fn buffers_round_trip_and_are_accounted() {
        let device = NullDevice::new(3);
        let a = device.create_buffer(&descriptor(64)).unwrap();
        let b = device.create_buffer(&descriptor(32)).unwrap();
        assert_ne!(a, b);
        assert_eq!(device.allocated_bytes(), 96);
        assert_eq!(device.buffer_label(a).as_deref(), Some("test"));

        device.write_buffer(a, 8, &[1, 2, 3]).unwrap();
        let mut out = [0u8; 3];
        device.read_buffer(a, 8, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);

        device.destroy_buffer(a).unwrap();
        assert_eq!(device.allocated_bytes(), 32);
        assert_eq!(device.peak_bytes(), 96);
        assert_eq!(device.destroy_buffer(a), Err(ResourceError::NotFound));
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let device = NullDevice::new(3);
        let id = device.create_buffer(&descriptor(16)).unwrap();
        assert_eq!(
            device.write_buffer(id, 12, &[0; 8]),
            Err(ResourceError::OutOfBounds)
        );
        let mut out = [0u8; 4];
        assert_eq!(
            device.read_buffer(id, u64::MAX, &mut out),
            Err(ResourceError::OutOfBounds)
        );
    }

    #[test]
    fn copies_between_buffers() {
        let device = NullDevice::new(3);
        let src = device.create_buffer(&descriptor(16)).unwrap();
        let dst = device.create_buffer(&descriptor(16)).unwrap();
        device.write_buffer(src, 0, &[5; 16]).unwrap();

        device.copy_buffer_to_buffer(src, 4, dst, 8, 8).unwrap();

        let mut out = [0u8; 16];
        device.read_buffer(dst, 0, &mut out).unwrap();
        assert_eq!(&out[..8], &[0; 8]);
        assert_eq!(&out[8..], &[5; 8]);
        assert_eq!(device.copy_count(), 1);
    }

    #[test]
    fn memory_limit_yields_out_of_memory() {
        let device = NullDevice::with_memory_limit(3, 100);
        device.create_buffer(&descriptor(64)).unwrap();
        assert_eq!(
            device.create_buffer(&descriptor(64)),
            Err(ResourceError::OutOfMemory {
                requested_bytes: 64
            })
        );
        assert_eq!(device.buffer_count(), 1);
    }

    #[test]
    fn end_frame_advances_the_shared_tracker() {
        let device = NullDevice::new(2);
        let clone = device.clone();
        device.end_frame();
        device.end_frame();
        assert_eq!(clone.frame_tracker().current_frame(), 2);
        assert_eq!(clone.frame_tracker().dynamic_buffer_multiplier(), 2);
    }

    #[test]
    fn memory_provider_is_weak() {
        let device = NullDevice::with_memory_limit(3, 1024);
        let provider = device.memory_provider();
        device.create_buffer(&descriptor(128)).unwrap();

        let strong = provider.upgrade().unwrap();
        assert_eq!(strong.allocated_bytes(), 128);
        assert_eq!(strong.capacity_bytes(), Some(1024));
        drop(strong);

        drop(device);
        assert!(provider.upgrade().is_none());
    }
}
