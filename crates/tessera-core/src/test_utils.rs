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

//! Host-memory device double shared by the unit tests of this crate.

use crate::buffer::{BufferDescriptor, BufferDevice, BufferId};
use crate::error::ResourceError;
use crate::frame::FrameTracker;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
pub(crate) struct MockBufferDevice {
    buffers: Mutex<HashMap<BufferId, Vec<u8>>>,
    next_id: AtomicUsize,
    frames: Mutex<FrameTracker>,
    stalls: AtomicUsize,
    copies: AtomicUsize,
    reads: AtomicUsize,
    failing_stalls: AtomicBool,
}

impl MockBufferDevice {
    pub(crate) fn new(dynamic_buffer_multiplier: u32) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            frames: Mutex::new(FrameTracker::new(dynamic_buffer_multiplier)),
            stalls: AtomicUsize::new(0),
            copies: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            failing_stalls: AtomicBool::new(false),
        }
    }

    pub(crate) fn advance_frame(&self) {
        self.frames.lock().unwrap().advance();
    }

    /// Makes every following `stall` fail until switched off again.
    pub(crate) fn fail_stalls(&self, fail: bool) {
        self.failing_stalls.store(fail, Ordering::Relaxed);
    }

    pub(crate) fn stall_count(&self) -> usize {
        self.stalls.load(Ordering::Relaxed)
    }

    pub(crate) fn copy_count(&self) -> usize {
        self.copies.load(Ordering::Relaxed)
    }

    pub(crate) fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub(crate) fn buffer_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    pub(crate) fn buffer_len(&self, id: BufferId) -> Option<usize> {
        self.buffers.lock().unwrap().get(&id).map(Vec::len)
    }

    pub(crate) fn contents(&self, id: BufferId, offset: u64, len: usize) -> Vec<u8> {
        let buffers = self.buffers.lock().unwrap();
        let start = offset as usize;
        buffers[&id][start..start + len].to_vec()
    }
}

impl BufferDevice for MockBufferDevice {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.buffers
            .lock()
            .unwrap()
            .insert(id, vec![0; descriptor.size as usize]);
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        self.buffers
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(ResourceError::NotFound)
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut buffers = self.buffers.lock().unwrap();
        let buffer = buffers.get_mut(&id).ok_or(ResourceError::NotFound)?;
        let start = offset as usize;
        let end = start + data.len();
        if end > buffer.len() {
            return Err(ResourceError::OutOfBounds);
        }
        buffer[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, id: BufferId, offset: u64, dest: &mut [u8]) -> Result<(), ResourceError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let buffers = self.buffers.lock().unwrap();
        let buffer = buffers.get(&id).ok_or(ResourceError::NotFound)?;
        let start = offset as usize;
        let end = start + dest.len();
        if end > buffer.len() {
            return Err(ResourceError::OutOfBounds);
        }
        dest.copy_from_slice(&buffer[start..end]);
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
        self.copies.fetch_add(1, Ordering::Relaxed);
        let mut buffers = self.buffers.lock().unwrap();
        let src = buffers.get(&source).ok_or(ResourceError::NotFound)?;
        let start = source_offset as usize;
        let bytes = src
            .get(start..start + size as usize)
            .ok_or(ResourceError::OutOfBounds)?
            .to_vec();
        let dst = buffers.get_mut(&destination).ok_or(ResourceError::NotFound)?;
        let start = destination_offset as usize;
        dst.get_mut(start..start + bytes.len())
            .ok_or(ResourceError::OutOfBounds)?
            .copy_from_slice(&bytes);
        Ok(())
    }

    fn stall(&self) -> Result<(), ResourceError> {
        if self.failing_stalls.load(Ordering::Relaxed) {
            return Err(ResourceError::BackendError("device lost".to_string()));
        }
        self.stalls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn frame_tracker(&self) -> FrameTracker {
        *self.frames.lock().unwrap()
    }
}
