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

//! The device collaborator the buffer layer is written against.

use crate::error::ResourceError;
use crate::frame::FrameTracker;
use bitflags::bitflags;
use std::borrow::Cow;
use std::fmt::Debug;

bitflags! {
    /// Memory properties requested for a raw device buffer.
    ///
    /// The device uses them to pick a heap. A backend that cannot honour a flag
    /// exactly is free to pick the closest match.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryFlags: u32 {
        /// Fast GPU memory, not necessarily visible to the CPU.
        const DEVICE_LOCAL = 1 << 0;
        /// The CPU can map the buffer.
        const HOST_VISIBLE = 1 << 1;
        /// CPU writes become visible without explicit flushes.
        const HOST_COHERENT = 1 << 2;
        /// The buffer can be the source of a copy.
        const COPY_SRC = 1 << 3;
        /// The buffer can be the destination of a copy.
        const COPY_DST = 1 << 4;

        /// A mappable upload heap, the kind used for discard backing stores.
        const UPLOAD = Self::HOST_VISIBLE.bits()
            | Self::HOST_COHERENT.bits()
            | Self::COPY_SRC.bits()
            | Self::COPY_DST.bits();
    }
}

/// A descriptor used to create a raw device buffer.
#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    /// An optional debug label for the buffer.
    pub label: Option<Cow<'a, str>>,
    /// The total size of the buffer in bytes.
    pub size: u64,
    /// Requested memory properties.
    pub memory: MemoryFlags,
}

/// An opaque handle to a raw device buffer.
///
/// This ID is returned by [`BufferDevice::create_buffer`] and is the "native
/// handle" handed to command recording together with a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

/// The GPU device as seen by the buffer layer.
///
/// Implementations own the frame counter and the queue. The buffer layer never
/// keeps pointers into device memory: every access goes through a [`BufferId`]
/// and an offset, so a backing store can be replaced without dangling
/// references.
pub trait BufferDevice: Send + Sync + Debug {
    /// Creates a new raw buffer.
    /// ## Arguments
    /// * `descriptor` - Size, label and memory properties of the buffer.
    /// ## Returns
    /// The ID of the created buffer.
    /// ## Errors
    /// * `ResourceError::OutOfMemory` - If the device heap cannot hold the buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Destroys a raw buffer.
    /// ## Arguments
    /// * `id` - The ID of the buffer to be destroyed.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Writes data into a buffer.
    /// ## Arguments
    /// * `id` - The ID of the buffer to write to.
    /// * `offset` - The offset in the buffer where the data will be written.
    /// * `data` - The bytes to write.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Reads data back from a buffer.
    ///
    /// The caller is responsible for stalling first if the GPU may still be
    /// writing the range.
    /// ## Arguments
    /// * `id` - The ID of the buffer to read from.
    /// * `offset` - The offset in the buffer where reading starts.
    /// * `dest` - Receives `dest.len()` bytes.
    fn read_buffer(&self, id: BufferId, offset: u64, dest: &mut [u8]) -> Result<(), ResourceError>;

    /// Records a GPU-side copy between two buffers.
    fn copy_buffer_to_buffer(
        &self,
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), ResourceError>;

    /// Blocks until every submitted GPU command has retired.
    fn stall(&self) -> Result<(), ResourceError>;

    /// A snapshot of the device's frame counter and in-flight depth.
    fn frame_tracker(&self) -> FrameTracker;
}
