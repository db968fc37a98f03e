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

use super::device::{BufferDevice, BufferId};
use super::storage::{BufferStorage, StorageKind};
use super::usage::LockOptions;
use crate::discard::{DiscardBufferId, DiscardBufferManager};
use crate::error::BufferError;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Storage backed by a region of the shared discard pool.
///
/// `Discard` writes may move the buffer to a new region; every other write
/// maps with `no_overwrite` and lands in the current one.
#[derive(Debug)]
pub struct DiscardStorage {
    device: Arc<dyn BufferDevice>,
    manager: Rc<RefCell<DiscardBufferManager>>,
    id: DiscardBufferId,
    size: u64,
}

impl DiscardStorage {
    /// Registers a new discard buffer with `manager`.
    pub fn new(
        device: Arc<dyn BufferDevice>,
        manager: Rc<RefCell<DiscardBufferManager>>,
        size: u64,
        alignment: u64,
    ) -> Result<Self, BufferError> {
        let frames = device.frame_tracker();
        let id = manager
            .borrow_mut()
            .create_discard_buffer(device.as_ref(), &frames, size, alignment)?;
        Ok(Self {
            device,
            manager,
            id,
            size,
        })
    }

    /// The handle inside the pool.
    pub fn discard_buffer_id(&self) -> DiscardBufferId {
        self.id
    }
}

impl BufferStorage for DiscardStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Discard
    }

    fn size_bytes(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, dest: &mut [u8]) -> Result<(), BufferError> {
        self.device.stall()?;
        let frames = self.device.frame_tracker();
        let mut manager = self.manager.borrow_mut();
        manager.notify_device_stalled(&frames);
        manager.read(self.device.as_ref(), self.id, offset, dest)
    }

    fn write(&mut self, offset: u64, src: &[u8], options: LockOptions) -> Result<(), BufferError> {
        let frames = self.device.frame_tracker();
        let mut manager = self.manager.borrow_mut();
        let no_overwrite = options != LockOptions::Discard;
        manager.map(self.device.as_ref(), &frames, self.id, no_overwrite)?;
        let written = manager.write(self.device.as_ref(), self.id, offset, src);
        manager.unmap(self.id)?;
        written
    }

    fn device_range(&self) -> Option<(BufferId, u64)> {
        self.manager.borrow().buffer_name_and_offset(self.id).ok()
    }

    fn copy_from_device(
        &mut self,
        source: BufferId,
        source_offset: u64,
        dest_offset: u64,
        length: u64,
        options: LockOptions,
    ) -> Result<bool, BufferError> {
        let frames = self.device.frame_tracker();
        let mut manager = self.manager.borrow_mut();
        let no_overwrite = options != LockOptions::Discard;
        let region = manager.map(self.device.as_ref(), &frames, self.id, no_overwrite)?;
        let copied = self
            .device
            .copy_buffer_to_buffer(source, source_offset, region.buffer, region.offset + dest_offset, length)
            .map_err(BufferError::from);
        manager.unmap(self.id)?;
        copied.map(|_| true)
    }

    fn is_discardable(&self) -> bool {
        true
    }

    fn release(&mut self) -> Result<(), BufferError> {
        let frames = self.device.frame_tracker();
        self.manager
            .borrow_mut()
            .destroy_discard_buffer(&frames, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockBufferDevice;

    fn setup() -> (Arc<MockBufferDevice>, Rc<RefCell<DiscardBufferManager>>) {
        let device = Arc::new(MockBufferDevice::new(3));
        let manager = DiscardBufferManager::new(device.as_ref(), "Test Pool", 4096).unwrap();
        (device, Rc::new(RefCell::new(manager)))
    }

    #[test]
    fn discard_write_moves_to_a_new_region() {
        let (device, manager) = setup();
        let mut storage = DiscardStorage::new(device.clone(), manager.clone(), 256, 256).unwrap();

        storage.write(0, &[1; 256], LockOptions::Discard).unwrap();
        let first = storage.device_range().unwrap();
        storage.write(0, &[2; 256], LockOptions::Discard).unwrap();
        let second = storage.device_range().unwrap();

        assert_ne!(first.1, second.1);
        assert_eq!(device.contents(first.0, first.1, 256), vec![1; 256]);
        assert_eq!(device.contents(second.0, second.1, 256), vec![2; 256]);
    }

    #[test]
    fn no_overwrite_write_stays_in_place() {
        let (device, manager) = setup();
        let mut storage = DiscardStorage::new(device.clone(), manager, 256, 256).unwrap();

        storage.write(0, &[1; 256], LockOptions::Discard).unwrap();
        let before = storage.device_range().unwrap();
        storage.write(128, &[3; 16], LockOptions::NoOverwrite).unwrap();
        assert_eq!(storage.device_range().unwrap(), before);

        let mut out = [0u8; 16];
        storage.read(128, &mut out).unwrap();
        assert_eq!(out, [3; 16]);
        assert_eq!(device.stall_count(), 1);
    }

    #[test]
    fn release_hands_the_region_back_to_the_pool() {
        let (device, manager) = setup();
        let mut storage = DiscardStorage::new(device.clone(), manager.clone(), 256, 256).unwrap();
        assert_eq!(manager.borrow().live_buffers(), 1);

        storage.release().unwrap();
        assert_eq!(manager.borrow().live_buffers(), 0);
    }
}
