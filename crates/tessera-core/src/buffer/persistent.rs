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

//! Persistently mapped multi-frame storage.
//!
//! One device buffer holds `dynamic_buffer_multiplier` copies of the logical
//! buffer. The CPU always writes the current slot while the GPU reads the
//! slots of previous frames.
//!
//! ```text
//! multiplier = 3, size = S
//! [ slot 0 | slot 1 | slot 2 ]
//!   0        S        2S
//! frame N:   CPU -> slot 1, GPU <- slot 0
//! frame N+1: CPU -> slot 2, GPU <- slot 1, slot 0
//! ```

use super::device::{BufferDescriptor, BufferDevice, BufferId, MemoryFlags};
use super::storage::{BufferStorage, StorageKind};
use super::usage::LockOptions;
use crate::error::BufferError;
use std::borrow::Cow;
use std::sync::Arc;

/// A CPU-to-GPU buffer mapped once for all frames in flight.
///
/// The first `Discard` write of a frame moves to the next slot. Bytes of the
/// new slot outside the written range are whatever that slot held
/// `multiplier` frames ago.
#[derive(Debug)]
pub struct PersistentRingStorage {
    device: Arc<dyn BufferDevice>,
    id: BufferId,
    size: u64,
    multiplier: u32,
    current_slot: u32,
    last_frame_advanced: Option<u64>,
}

impl PersistentRingStorage {
    /// Creates the `size × multiplier` device buffer.
    pub fn new(
        device: Arc<dyn BufferDevice>,
        label: Option<&str>,
        size: u64,
    ) -> Result<Self, BufferError> {
        let multiplier = device.frame_tracker().dynamic_buffer_multiplier();
        let id = device.create_buffer(&BufferDescriptor {
            label: label.map(|l| Cow::Owned(format!("{l} (persistent x{multiplier})"))),
            size: size * u64::from(multiplier),
            memory: MemoryFlags::UPLOAD,
        })?;
        Ok(Self {
            device,
            id,
            size,
            multiplier,
            current_slot: 0,
            last_frame_advanced: None,
        })
    }

    /// Moves to the next per-frame slot.
    pub fn advance_frame(&mut self) {
        self.current_slot = (self.current_slot + 1) % self.multiplier;
    }

    /// Undoes one [`advance_frame`](Self::advance_frame).
    pub fn regress_frame(&mut self) {
        self.current_slot = (self.current_slot + self.multiplier - 1) % self.multiplier;
    }

    /// The slot the CPU currently writes.
    pub fn current_slot(&self) -> u32 {
        self.current_slot
    }

    /// Byte offset of the current slot in the device buffer.
    pub fn slot_offset(&self) -> u64 {
        u64::from(self.current_slot) * self.size
    }

    fn begin_write(&mut self, options: LockOptions) {
        if options != LockOptions::Discard {
            return;
        }
        let frame = self.device.frame_tracker().current_frame();
        if self.last_frame_advanced != Some(frame) {
            self.advance_frame();
            self.last_frame_advanced = Some(frame);
        }
    }
}

impl BufferStorage for PersistentRingStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::PersistentRing
    }

    fn size_bytes(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, dest: &mut [u8]) -> Result<(), BufferError> {
        self.device
            .read_buffer(self.id, self.slot_offset() + offset, dest)?;
        Ok(())
    }

    fn write(&mut self, offset: u64, src: &[u8], options: LockOptions) -> Result<(), BufferError> {
        self.begin_write(options);
        self.device
            .write_buffer(self.id, self.slot_offset() + offset, src)?;
        Ok(())
    }

    fn device_range(&self) -> Option<(BufferId, u64)> {
        Some((self.id, self.slot_offset()))
    }

    fn copy_from_device(
        &mut self,
        source: BufferId,
        source_offset: u64,
        dest_offset: u64,
        length: u64,
        options: LockOptions,
    ) -> Result<bool, BufferError> {
        self.begin_write(options);
        self.device.copy_buffer_to_buffer(
            source,
            source_offset,
            self.id,
            self.slot_offset() + dest_offset,
            length,
        )?;
        Ok(true)
    }

    fn release(&mut self) -> Result<(), BufferError> {
        self.device.destroy_buffer(self.id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockBufferDevice;

    #[test]
    fn allocates_one_slot_per_frame_in_flight() {
        let device = Arc::new(MockBufferDevice::new(3));
        let storage = PersistentRingStorage::new(device.clone(), Some("ubo"), 64).unwrap();
        let (id, offset) = storage.device_range().unwrap();
        assert_eq!(device.buffer_len(id), Some(192));
        assert_eq!(offset, 0);
    }

    #[test]
    fn advance_and_regress_cycle_modulo_multiplier() {
        let device = Arc::new(MockBufferDevice::new(3));
        let mut storage = PersistentRingStorage::new(device, None, 64).unwrap();

        storage.advance_frame();
        storage.advance_frame();
        assert_eq!(storage.current_slot(), 2);
        storage.advance_frame();
        assert_eq!(storage.current_slot(), 0);
        storage.regress_frame();
        assert_eq!(storage.current_slot(), 2);
        assert_eq!(storage.slot_offset(), 128);
    }

    #[test]
    fn first_discard_of_each_frame_advances_once() {
        let device = Arc::new(MockBufferDevice::new(2));
        let mut storage = PersistentRingStorage::new(device.clone(), None, 16).unwrap();

        storage.write(0, &[1; 16], LockOptions::Discard).unwrap();
        assert_eq!(storage.current_slot(), 1);
        storage.write(0, &[2; 16], LockOptions::Discard).unwrap();
        assert_eq!(storage.current_slot(), 1, "same frame, same slot");
        storage.write(0, &[3; 4], LockOptions::NoOverwrite).unwrap();
        assert_eq!(storage.current_slot(), 1);

        device.advance_frame();
        storage.write(0, &[4; 16], LockOptions::Discard).unwrap();
        assert_eq!(storage.current_slot(), 0);

        let mut out = [0u8; 16];
        storage.read(0, &mut out).unwrap();
        assert_eq!(out, [4; 16]);
        let (id, _) = storage.device_range().unwrap();
        assert_eq!(device.contents(id, 16, 4), vec![3; 4]);
    }
}
