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

//! Frame fence tracking.
//!
//! The GPU runs up to `dynamic_buffer_multiplier` frames behind the CPU. A
//! memory region last touched at frame `F` may still be referenced by in-flight
//! GPU work until `current_frame - F >= dynamic_buffer_multiplier`.
//!
//! ```text
//! multiplier = 3
//! frame:      F     F+1    F+2    F+3
//! region:   [used] [busy] [busy] [safe]
//! ```
//!
//! The comparison is conservative: a region may be held one frame longer than
//! strictly needed, never released one frame too early.

/// The default number of frames kept in flight (triple buffering).
pub const DEFAULT_DYNAMIC_BUFFER_MULTIPLIER: u32 = 3;

/// The frame counter of a device/queue together with its in-flight depth.
///
/// A `FrameTracker` is owned by the device collaborator and handed to the
/// buffer layer by reference, so the layer never reads a global frame counter.
/// All arithmetic is wrapping, which lets [`stale_frame`](Self::stale_frame)
/// produce a valid "already safe" sentinel even at frame 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTracker {
    current_frame: u64,
    dynamic_buffer_multiplier: u32,
}

impl Default for FrameTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DYNAMIC_BUFFER_MULTIPLIER)
    }
}

impl FrameTracker {
    /// Creates a tracker at frame 0. A multiplier of 0 is clamped to 1.
    pub fn new(dynamic_buffer_multiplier: u32) -> Self {
        Self::with_frame(0, dynamic_buffer_multiplier)
    }

    /// Creates a tracker positioned at `current_frame`.
    pub fn with_frame(current_frame: u64, dynamic_buffer_multiplier: u32) -> Self {
        Self {
            current_frame,
            dynamic_buffer_multiplier: dynamic_buffer_multiplier.max(1),
        }
    }

    /// The frame currently being recorded by the CPU.
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    /// The number of frames the pipeline keeps in flight.
    pub fn dynamic_buffer_multiplier(&self) -> u32 {
        self.dynamic_buffer_multiplier
    }

    /// Moves to the next frame. Called by the device at the end of each frame.
    pub fn advance(&mut self) {
        self.current_frame = self.current_frame.wrapping_add(1);
    }

    /// Number of frames elapsed since `last_frame_used`.
    pub fn frames_since(&self, last_frame_used: u64) -> u64 {
        self.current_frame.wrapping_sub(last_frame_used)
    }

    /// Returns `true` once the GPU can no longer reference a region last used at
    /// `last_frame_used`.
    pub fn is_safe(&self, last_frame_used: u64) -> bool {
        self.frames_since(last_frame_used) >= u64::from(self.dynamic_buffer_multiplier)
    }

    /// A frame number that [`is_safe`](Self::is_safe) already considers expired.
    ///
    /// Used to backdate regions after a full device stall or a backing-store
    /// growth.
    pub fn stale_frame(&self) -> u64 {
        self.current_frame
            .wrapping_sub(u64::from(self.dynamic_buffer_multiplier))
    }

    /// The per-frame slot of a multi-frame ring (`current_frame % multiplier`).
    pub fn ring_index(&self) -> usize {
        (self.current_frame % u64::from(self.dynamic_buffer_multiplier)) as usize
    }
}
