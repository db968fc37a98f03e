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

//! Statistics for the discard buffer pool.

/// A snapshot of a [`DiscardBufferManager`](super::DiscardBufferManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscardBufferStats {
    /// Size of the current backing store in bytes.
    pub capacity_bytes: u64,
    /// Number of discard buffers currently tracked.
    pub live_buffers: usize,
    /// Bytes available for immediate allocation.
    pub free_bytes: u64,
    /// Number of nodes in the free list.
    pub free_block_count: usize,
    /// Bytes waiting for their fence frame to expire.
    pub unsafe_bytes: u64,
    /// Number of blocks waiting for their fence frame to expire.
    pub unsafe_block_count: usize,
    /// Discards that kept their region because its fence had expired.
    pub reuse_count: u64,
    /// Regions carved out of the free list.
    pub fresh_allocations: u64,
    /// Times the backing store had to grow.
    pub growth_count: u64,
    /// Device stalls the pool was notified of, growth stalls included.
    pub stall_notifications: u64,
}

impl DiscardBufferStats {
    /// Bytes owned by live discard buffers, alignment padding included.
    pub fn used_bytes(&self) -> u64 {
        self.capacity_bytes
            .saturating_sub(self.free_bytes)
            .saturating_sub(self.unsafe_bytes)
    }
}
