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

//! Free-list allocator with best-fit search and immediate coalescing.
//!
//! The allocator only tracks *free* ranges. In-use ranges are owned by whoever
//! received them (a discard buffer, typically) and come back through
//! [`BlockAllocator::release`].
//!
//! ```text
//! capacity 4096, align 256
//! free: [0..4096)
//! allocate(1000) -> [0..1000)          free: [1000..4096)
//! allocate(512)  -> [1000..1536)       padding 24, data at 1024
//! release([0..1000))                   free: [0..1000) [1536..4096)
//! ```

/// A contiguous byte range inside the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    /// Start of the range in bytes.
    pub offset: u64,
    /// Length of the range in bytes.
    pub size: u64,
}

impl Block {
    /// Creates a new block.
    pub const fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// One past the last byte of the block.
    pub const fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Returns `true` if the two ranges share at least one byte.
    pub fn overlaps(&self, other: &Block) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// A block that the GPU may still be reading.
///
/// It waits in the manager's unsafe list until its fence frame expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsafeBlock {
    /// The range being held back.
    pub block: Block,
    /// The frame at which the GPU was last known to touch the range.
    pub last_frame_used: u64,
}

/// The result of a successful [`BlockAllocator::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// The carved range, including the alignment pre-padding.
    pub block: Block,
    /// Bytes skipped at the start of `block` to reach the requested alignment.
    pub pre_padding: u64,
}

impl Allocation {
    /// The aligned offset where usable data starts.
    pub fn data_offset(&self) -> u64 {
        self.block.offset + self.pre_padding
    }
}

/// Rounds `value` up to the next multiple of `alignment` (any non-zero value,
/// not only powers of two).
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0, "alignment must be non-zero");
    value.div_ceil(alignment) * alignment
}

/// A best-fit free-list allocator over one backing store.
///
/// Free blocks are kept sorted by offset, never overlap and are never adjacent:
/// every release merges with both neighbours.
#[derive(Debug, Clone, Default)]
pub struct BlockAllocator {
    free_blocks: Vec<Block>,
    capacity: u64,
}

impl BlockAllocator {
    /// Creates an allocator whose whole `capacity` is free.
    pub fn new(capacity: u64) -> Self {
        let free_blocks = if capacity > 0 {
            vec![Block::new(0, capacity)]
        } else {
            Vec::new()
        };
        Self {
            free_blocks,
            capacity,
        }
    }

    /// Total size of the managed range.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The free list, sorted by offset.
    pub fn free_blocks(&self) -> &[Block] {
        &self.free_blocks
    }

    /// Sum of all free bytes.
    pub fn free_bytes(&self) -> u64 {
        self.free_blocks.iter().map(|b| b.size).sum()
    }

    /// Size of the largest free block, or 0 when full.
    pub fn largest_free_block(&self) -> u64 {
        self.free_blocks.iter().map(|b| b.size).max().unwrap_or(0)
    }

    /// Carves `size` bytes aligned to `alignment` out of the smallest free
    /// block that can hold them after padding.
    ///
    /// Returns `None` when no block is large enough; growing the store is the
    /// caller's decision.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<Allocation> {
        let alignment = alignment.max(1);

        let mut best: Option<(usize, u64)> = None;
        for (index, block) in self.free_blocks.iter().enumerate() {
            let padding = align_up(block.offset, alignment) - block.offset;
            if size + padding > block.size {
                continue;
            }
            match best {
                Some((best_index, _)) if self.free_blocks[best_index].size <= block.size => {}
                _ => best = Some((index, padding)),
            }
        }

        let (index, padding) = best?;
        let chosen = &mut self.free_blocks[index];
        let allocation = Allocation {
            block: Block::new(chosen.offset, padding + size),
            pre_padding: padding,
        };

        chosen.offset += padding + size;
        chosen.size -= padding + size;
        if chosen.size == 0 {
            self.free_blocks.remove(index);
        }

        Some(allocation)
    }

    /// Returns a range to the free list and merges it with adjacent free blocks.
    pub fn release(&mut self, block: Block) {
        if block.size == 0 {
            return;
        }

        let index = self
            .free_blocks
            .partition_point(|free| free.offset < block.offset);

        debug_assert!(
            index == 0 || !self.free_blocks[index - 1].overlaps(&block),
            "released block {block:?} overlaps a free block"
        );
        debug_assert!(
            index == self.free_blocks.len() || !self.free_blocks[index].overlaps(&block),
            "released block {block:?} overlaps a free block"
        );

        self.free_blocks.insert(index, block);

        // Merge with the following block first so `index` stays valid.
        if index + 1 < self.free_blocks.len()
            && self.free_blocks[index].end() == self.free_blocks[index + 1].offset
        {
            let next = self.free_blocks.remove(index + 1);
            self.free_blocks[index].size += next.size;
        }

        if index > 0 && self.free_blocks[index - 1].end() == self.free_blocks[index].offset {
            let current = self.free_blocks.remove(index);
            self.free_blocks[index - 1].size += current.size;
        }
    }

    /// Extends the managed range to `new_capacity`; the new tail becomes free.
    ///
    /// Shrinking is not supported and is ignored.
    pub fn grow(&mut self, new_capacity: u64) {
        if new_capacity <= self.capacity {
            return;
        }
        let tail = Block::new(self.capacity, new_capacity - self.capacity);
        self.capacity = new_capacity;
        self.release(tail);
    }
}
