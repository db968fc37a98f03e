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

//! The discard buffer pool.
//!
//! # Architecture
//!
//! ```text
//!  map(id, no_overwrite = false)
//!        │
//!        ▼
//!  fence expired? ──yes──► keep the current region
//!        │ no
//!        ▼
//!  current region ──► unsafe list (sorted by last_frame_used)
//!        │
//!        ▼
//!  promote expired unsafe blocks ──► BlockAllocator::allocate
//!        │ no fit
//!        ▼
//!  grow: new store, copy live regions, stall, retry once
//! ```
//!
//! Discard buffers only store offsets. The backing store is resolved through
//! the manager on every access, so growth can replace it freely.

use super::stats::DiscardBufferStats;
use crate::allocator::{Block, BlockAllocator, UnsafeBlock};
use crate::buffer::{BufferDescriptor, BufferDevice, BufferId, MemoryFlags};
use crate::config::BufferSettings;
use crate::error::BufferError;
use crate::frame::FrameTracker;
use std::borrow::Cow;
use std::collections::HashMap;

/// Handle to a discard buffer tracked by a [`DiscardBufferManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiscardBufferId(pub usize);

/// A logical buffer living inside the manager's backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardBuffer {
    buffer_size: u64,
    alignment: u64,
    block_offset: u64,
    block_pre_padding: u64,
    last_frame_used: u64,
    bound: bool,
    mapped: bool,
}

impl DiscardBuffer {
    /// Usable size in bytes.
    pub fn size(&self) -> u64 {
        self.buffer_size
    }

    /// Alignment of the data offset.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Start of the owned block, pre-padding included.
    pub fn block_offset(&self) -> u64 {
        self.block_offset
    }

    /// Bytes between the block start and the aligned data offset.
    pub fn block_pre_padding(&self) -> u64 {
        self.block_pre_padding
    }

    /// Aligned offset of the data inside the backing store.
    pub fn data_offset(&self) -> u64 {
        self.block_offset + self.block_pre_padding
    }

    /// The last frame this buffer was mapped in.
    pub fn last_frame_used(&self) -> u64 {
        self.last_frame_used
    }

    /// Whether the buffer currently owns a region.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Whether the buffer is between `map` and `unmap`.
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// The owned block, pre-padding included.
    pub fn block(&self) -> Block {
        Block::new(self.block_offset, self.block_pre_padding + self.buffer_size)
    }
}

/// The result of [`DiscardBufferManager::map`]: where the caller may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRegion {
    /// The backing store in use at the time of the map.
    pub buffer: BufferId,
    /// Aligned data offset inside `buffer`.
    pub offset: u64,
    /// Usable size of the region.
    pub size: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    reuse_count: u64,
    fresh_allocations: u64,
    growth_count: u64,
    stall_notifications: u64,
}

/// Hands out fence-safe regions of one growable backing store.
///
/// The manager has no internal locking. It is driven from the thread that owns
/// the device, which passes its [`FrameTracker`] into every call that needs the
/// current frame.
#[derive(Debug)]
pub struct DiscardBufferManager {
    label: String,
    backing: BufferId,
    allocator: BlockAllocator,
    unsafe_blocks: Vec<UnsafeBlock>,
    buffers: HashMap<DiscardBufferId, DiscardBuffer>,
    next_id: usize,
    generation: u32,
    counters: Counters,
    destroyed: bool,
}

impl DiscardBufferManager {
    /// Creates a manager with a backing store of `initial_capacity` bytes.
    pub fn new(
        device: &dyn BufferDevice,
        label: &str,
        initial_capacity: u64,
    ) -> Result<Self, BufferError> {
        if initial_capacity == 0 {
            return Err(BufferError::InvalidArgument(
                "Discard backing store capacity must be non-zero".to_string(),
            ));
        }

        let backing = device.create_buffer(&BufferDescriptor {
            label: Some(Cow::Owned(format!("{label} backing store #0"))),
            size: initial_capacity,
            memory: MemoryFlags::UPLOAD,
        })?;

        log::debug!(
            "DiscardBufferManager({}): created backing store {:?} of {} bytes",
            label,
            backing,
            initial_capacity
        );

        Ok(Self {
            label: label.to_string(),
            backing,
            allocator: BlockAllocator::new(initial_capacity),
            unsafe_blocks: Vec::new(),
            buffers: HashMap::new(),
            next_id: 0,
            generation: 0,
            counters: Counters::default(),
            destroyed: false,
        })
    }

    /// Creates a manager sized by [`BufferSettings::initial_discard_capacity`].
    pub fn from_settings(
        device: &dyn BufferDevice,
        settings: &BufferSettings,
    ) -> Result<Self, BufferError> {
        Self::new(device, "Discard Pool", settings.initial_discard_capacity)
    }

    /// Creates a discard buffer and grants it a region immediately.
    ///
    /// The new buffer starts with a stale fence frame, so its first discard map
    /// keeps that region instead of allocating another one.
    pub fn create_discard_buffer(
        &mut self,
        device: &dyn BufferDevice,
        frames: &FrameTracker,
        size: u64,
        alignment: u64,
    ) -> Result<DiscardBufferId, BufferError> {
        self.ensure_alive()?;
        if size == 0 {
            return Err(BufferError::InvalidArgument(
                "Discard buffer size must be non-zero".to_string(),
            ));
        }
        if alignment == 0 {
            return Err(BufferError::InvalidArgument(
                "Discard buffer alignment must be non-zero".to_string(),
            ));
        }

        let id = DiscardBufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(
            id,
            DiscardBuffer {
                buffer_size: size,
                alignment,
                block_offset: 0,
                block_pre_padding: 0,
                last_frame_used: frames.stale_frame(),
                bound: false,
                mapped: false,
            },
        );

        if let Err(err) = self.get_block(device, frames, id) {
            self.buffers.remove(&id);
            return Err(err);
        }

        Ok(id)
    }

    /// Forgets a discard buffer. Its region waits in the unsafe list until the
    /// GPU can no longer be reading it.
    pub fn destroy_discard_buffer(
        &mut self,
        frames: &FrameTracker,
        id: DiscardBufferId,
    ) -> Result<(), BufferError> {
        let buffer = self
            .buffers
            .remove(&id)
            .ok_or(BufferError::UnknownDiscardBuffer(id))?;

        if buffer.mapped {
            log::warn!(
                "DiscardBufferManager({}): {:?} destroyed while mapped",
                self.label,
                id
            );
        }

        if buffer.bound {
            if frames.is_safe(buffer.last_frame_used) {
                self.allocator.release(buffer.block());
            } else {
                self.push_unsafe(UnsafeBlock {
                    block: buffer.block(),
                    last_frame_used: buffer.last_frame_used,
                });
            }
        }
        Ok(())
    }

    /// Maps a discard buffer for writing.
    ///
    /// With `no_overwrite` the current region is returned as is: the caller
    /// promises not to touch bytes the GPU may still read. Otherwise the call
    /// discards, which may move the buffer to a different region.
    pub fn map(
        &mut self,
        device: &dyn BufferDevice,
        frames: &FrameTracker,
        id: DiscardBufferId,
        no_overwrite: bool,
    ) -> Result<MappedRegion, BufferError> {
        self.ensure_alive()?;
        let buffer = self.buffer(id)?;
        if buffer.mapped {
            return Err(BufferError::InvalidState(format!(
                "Discard buffer {id:?} is already mapped"
            )));
        }

        if !no_overwrite || !buffer.bound {
            self.get_block(device, frames, id)?;
        }

        let backing = self.backing;
        let buffer = self.buffer_mut(id)?;
        buffer.last_frame_used = frames.current_frame();
        buffer.mapped = true;

        Ok(MappedRegion {
            buffer: backing,
            offset: buffer.data_offset(),
            size: buffer.buffer_size,
        })
    }

    /// Ends a mapping started by [`map`](Self::map).
    pub fn unmap(&mut self, id: DiscardBufferId) -> Result<(), BufferError> {
        let buffer = self.buffer_mut(id)?;
        if !buffer.mapped {
            return Err(BufferError::InvalidState(format!(
                "Discard buffer {id:?} is not mapped"
            )));
        }
        buffer.mapped = false;
        Ok(())
    }

    /// Writes into a mapped discard buffer. `offset` is relative to the buffer.
    pub fn write(
        &self,
        device: &dyn BufferDevice,
        id: DiscardBufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BufferError> {
        let buffer = self.buffer(id)?;
        if !buffer.mapped {
            return Err(BufferError::InvalidState(format!(
                "Discard buffer {id:?} must be mapped before writing"
            )));
        }
        Self::check_range(buffer, offset, data.len() as u64)?;
        device.write_buffer(self.backing, buffer.data_offset() + offset, data)?;
        Ok(())
    }

    /// Reads the current contents of a discard buffer.
    ///
    /// The caller stalls first if the GPU may still be writing the region.
    pub fn read(
        &self,
        device: &dyn BufferDevice,
        id: DiscardBufferId,
        offset: u64,
        dest: &mut [u8],
    ) -> Result<(), BufferError> {
        let buffer = self.bound_buffer(id)?;
        Self::check_range(buffer, offset, dest.len() as u64)?;
        device.read_buffer(self.backing, buffer.data_offset() + offset, dest)?;
        Ok(())
    }

    /// The native buffer and byte offset to bind for GPU commands.
    pub fn buffer_name_and_offset(
        &self,
        id: DiscardBufferId,
    ) -> Result<(BufferId, u64), BufferError> {
        let buffer = self.bound_buffer(id)?;
        Ok((self.backing, buffer.data_offset()))
    }

    /// Called after a full device stall: every region is safe again.
    ///
    /// All unsafe blocks go back to the free list and every live buffer is
    /// backdated so its next discard keeps its current region.
    pub fn notify_device_stalled(&mut self, frames: &FrameTracker) {
        for unsafe_block in self.unsafe_blocks.drain(..) {
            self.allocator.release(unsafe_block.block);
        }
        let stale = frames.stale_frame();
        for buffer in self.buffers.values_mut() {
            buffer.last_frame_used = stale;
        }
        self.counters.stall_notifications += 1;
    }

    /// Releases the backing store. The manager is unusable afterwards.
    pub fn destroy(&mut self, device: &dyn BufferDevice) -> Result<(), BufferError> {
        if self.destroyed {
            return Ok(());
        }
        if !self.buffers.is_empty() {
            log::warn!(
                "DiscardBufferManager({}): destroyed with {} live discard buffers",
                self.label,
                self.buffers.len()
            );
        }
        self.destroyed = true;
        self.buffers.clear();
        self.unsafe_blocks.clear();
        device.destroy_buffer(self.backing)?;
        Ok(())
    }

    /// The label used in log messages and backing-store names.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The current backing store.
    pub fn backing_buffer(&self) -> BufferId {
        self.backing
    }

    /// Current capacity of the backing store in bytes.
    pub fn capacity(&self) -> u64 {
        self.allocator.capacity()
    }

    /// The free list, sorted by offset.
    pub fn free_blocks(&self) -> &[Block] {
        self.allocator.free_blocks()
    }

    /// Regions waiting for their fence, oldest first.
    pub fn unsafe_blocks(&self) -> &[UnsafeBlock] {
        &self.unsafe_blocks
    }

    /// Looks up a live discard buffer.
    pub fn discard_buffer(&self, id: DiscardBufferId) -> Option<&DiscardBuffer> {
        self.buffers.get(&id)
    }

    /// Number of live discard buffers.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// A snapshot of the pool counters.
    pub fn stats(&self) -> DiscardBufferStats {
        DiscardBufferStats {
            capacity_bytes: self.allocator.capacity(),
            live_buffers: self.buffers.len(),
            free_bytes: self.allocator.free_bytes(),
            free_block_count: self.allocator.free_blocks().len(),
            unsafe_bytes: self.unsafe_blocks.iter().map(|b| b.block.size).sum(),
            unsafe_block_count: self.unsafe_blocks.len(),
            reuse_count: self.counters.reuse_count,
            fresh_allocations: self.counters.fresh_allocations,
            growth_count: self.counters.growth_count,
            stall_notifications: self.counters.stall_notifications,
        }
    }

    fn ensure_alive(&self) -> Result<(), BufferError> {
        if self.destroyed {
            return Err(BufferError::InvalidState(format!(
                "DiscardBufferManager({}) has been destroyed",
                self.label
            )));
        }
        Ok(())
    }

    fn buffer(&self, id: DiscardBufferId) -> Result<&DiscardBuffer, BufferError> {
        self.buffers
            .get(&id)
            .ok_or(BufferError::UnknownDiscardBuffer(id))
    }

    fn bound_buffer(&self, id: DiscardBufferId) -> Result<&DiscardBuffer, BufferError> {
        let buffer = self.buffer(id)?;
        if !buffer.bound {
            return Err(BufferError::InvalidState(format!(
                "Discard buffer {id:?} does not own a region"
            )));
        }
        Ok(buffer)
    }

    fn buffer_mut(&mut self, id: DiscardBufferId) -> Result<&mut DiscardBuffer, BufferError> {
        self.buffers
            .get_mut(&id)
            .ok_or(BufferError::UnknownDiscardBuffer(id))
    }

    fn check_range(buffer: &DiscardBuffer, offset: u64, length: u64) -> Result<(), BufferError> {
        match offset.checked_add(length) {
            Some(end) if end <= buffer.buffer_size => Ok(()),
            _ => Err(BufferError::out_of_bounds(offset, length, buffer.buffer_size)),
        }
    }

    /// Inserts keeping the list sorted by `last_frame_used`, oldest first.
    fn push_unsafe(&mut self, unsafe_block: UnsafeBlock) {
        let index = self
            .unsafe_blocks
            .partition_point(|b| b.last_frame_used <= unsafe_block.last_frame_used);
        self.unsafe_blocks.insert(index, unsafe_block);
    }

    /// Moves every unsafe block whose fence expired to the free list.
    fn promote_safe_blocks(&mut self, frames: &FrameTracker) {
        let expired = self
            .unsafe_blocks
            .partition_point(|b| frames.is_safe(b.last_frame_used));
        for unsafe_block in self.unsafe_blocks.drain(..expired) {
            self.allocator.release(unsafe_block.block);
        }
    }

    /// Makes sure `id` owns a region it may overwrite right now.
    fn get_block(
        &mut self,
        device: &dyn BufferDevice,
        frames: &FrameTracker,
        id: DiscardBufferId,
    ) -> Result<(), BufferError> {
        let buffer = self.buffer(id)?.clone();

        let mut retired = None;
        if buffer.bound {
            if frames.is_safe(buffer.last_frame_used) {
                self.counters.reuse_count += 1;
                return Ok(());
            }
            let unsafe_block = UnsafeBlock {
                block: buffer.block(),
                last_frame_used: buffer.last_frame_used,
            };
            self.push_unsafe(unsafe_block);
            self.buffer_mut(id)?.bound = false;
            retired = Some(unsafe_block);
        }

        self.promote_safe_blocks(frames);

        let allocation = match self.allocator.allocate(buffer.buffer_size, buffer.alignment) {
            Some(allocation) => allocation,
            None => {
                // Worst-case padding is `alignment - 1`, so the grown tail always fits.
                let extra = buffer.buffer_size + buffer.alignment - 1;
                if let Err(err) = self.grow_to_fit(device, frames, extra, Some(id)) {
                    self.restore_binding(id, retired);
                    return Err(err);
                }
                self.promote_safe_blocks(frames);
                self.allocator
                    .allocate(buffer.buffer_size, buffer.alignment)
                    .ok_or(BufferError::ResourceExhausted {
                        requested_bytes: buffer.buffer_size,
                    })?
            }
        };

        self.counters.fresh_allocations += 1;
        let buffer = self.buffer_mut(id)?;
        buffer.block_offset = allocation.block.offset;
        buffer.block_pre_padding = allocation.pre_padding;
        buffer.bound = true;
        Ok(())
    }

    /// Gives a failed discard its previous region back.
    ///
    /// The region never left the backing store, so the old binding is still
    /// valid and must not be handed out to another buffer.
    fn restore_binding(&mut self, id: DiscardBufferId, retired: Option<UnsafeBlock>) {
        let Some(retired) = retired else {
            return;
        };
        if let Some(index) = self.unsafe_blocks.iter().position(|b| *b == retired) {
            self.unsafe_blocks.remove(index);
            if let Some(buffer) = self.buffers.get_mut(&id) {
                buffer.bound = true;
            }
        }
    }

    fn abort_growth(&self, device: &dyn BufferDevice, new_backing: BufferId) {
        if let Err(cleanup) = device.destroy_buffer(new_backing) {
            log::error!(
                "DiscardBufferManager({}): failed to release aborted store {:?}: {}",
                self.label,
                new_backing,
                cleanup
            );
        }
    }

    /// Replaces the backing store with a larger one.
    ///
    /// Live regions keep their offsets, so nothing but the store id changes for
    /// the buffers. `exclude` is about to be re-bound and is not copied.
    fn grow_to_fit(
        &mut self,
        device: &dyn BufferDevice,
        frames: &FrameTracker,
        extra: u64,
        exclude: Option<DiscardBufferId>,
    ) -> Result<(), BufferError> {
        let old_capacity = self.allocator.capacity();
        let new_capacity = old_capacity
            .checked_add(extra)
            .ok_or(BufferError::ResourceExhausted {
                requested_bytes: extra,
            })?
            .max(old_capacity + old_capacity / 2);

        let generation = self.generation + 1;
        let new_backing = device.create_buffer(&BufferDescriptor {
            label: Some(Cow::Owned(format!(
                "{} backing store #{}",
                self.label, generation
            ))),
            size: new_capacity,
            memory: MemoryFlags::UPLOAD,
        })?;

        let mut copied = 0usize;
        for (id, buffer) in &self.buffers {
            if Some(*id) == exclude || !buffer.bound {
                continue;
            }
            let block = buffer.block();
            if let Err(err) =
                device.copy_buffer_to_buffer(self.backing, block.offset, new_backing, block.offset, block.size)
            {
                self.abort_growth(device, new_backing);
                return Err(err.into());
            }
            copied += 1;
        }

        // The old store may only go away once the copies and every in-flight
        // frame reading it have retired.
        if let Err(err) = device.stall() {
            self.abort_growth(device, new_backing);
            return Err(err.into());
        }
        let old_backing = std::mem::replace(&mut self.backing, new_backing);
        self.generation = generation;
        self.allocator.grow(new_capacity);
        self.notify_device_stalled(frames);
        device.destroy_buffer(old_backing)?;

        self.counters.growth_count += 1;
        log::warn!(
            "DiscardBufferManager({}): backing store grew from {} to {} bytes ({} regions copied). \
             This stalls the GPU; consider a larger initial capacity.",
            self.label,
            old_capacity,
            new_capacity,
            copied
        );
        Ok(())
    }
}
