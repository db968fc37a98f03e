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

//! Usage flags, usage classes and lock options.

use bitflags::bitflags;

bitflags! {
    /// How the application intends to use a [`HardwareBuffer`](super::HardwareBuffer).
    ///
    /// `STATIC` and `DYNAMIC` are mutually exclusive in intent; `DYNAMIC` wins
    /// when both are present.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Rarely modified after creation. Lives in device-local memory.
        const STATIC = 1 << 0;
        /// Modified often. Lives in host-visible memory.
        const DYNAMIC = 1 << 1;
        /// The application never reads the buffer back.
        const WRITE_ONLY = 1 << 2;
        /// Every update rewrites the whole buffer, so old contents may be
        /// thrown away.
        const DISCARDABLE = 1 << 3;

        /// Static, never read back.
        const STATIC_WRITE_ONLY = Self::STATIC.bits() | Self::WRITE_ONLY.bits();
        /// Dynamic, never read back.
        const DYNAMIC_WRITE_ONLY = Self::DYNAMIC.bits() | Self::WRITE_ONLY.bits();
        /// Dynamic, never read back, always fully rewritten.
        const DYNAMIC_WRITE_ONLY_DISCARDABLE =
            Self::DYNAMIC_WRITE_ONLY.bits() | Self::DISCARDABLE.bits();
    }
}

/// Where a buffer's memory lives and which way data flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageClass {
    /// Device-local, written by uploads, never read by the CPU.
    GpuOnly,
    /// Host memory the CPU both reads and writes.
    CpuOnly,
    /// Host-visible memory the CPU streams into every frame.
    CpuToGpu,
    /// Device memory the CPU reads back.
    GpuToCpu,
}

impl BufferUsage {
    /// The CPU may map this buffer directly.
    pub fn is_host_visible(&self) -> bool {
        self.contains(BufferUsage::DYNAMIC)
    }

    /// The application promised never to read this buffer back.
    pub fn is_write_only(&self) -> bool {
        self.contains(BufferUsage::WRITE_ONLY)
    }

    /// Eligible for the discard ring: dynamic, write-only and discardable.
    pub fn is_discardable(&self) -> bool {
        self.contains(BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE)
    }

    /// Derives the usage class from the host-visible and write-only bits.
    pub fn usage_class(&self) -> UsageClass {
        match (self.is_host_visible(), self.is_write_only()) {
            (false, true) => UsageClass::GpuOnly,
            (true, true) => UsageClass::CpuToGpu,
            (true, false) => UsageClass::CpuOnly,
            (false, false) => UsageClass::GpuToCpu,
        }
    }

    /// The usage the hardware buffer gets when a shadow copy serves reads.
    ///
    /// Reads never reach the device, so the device side becomes write-only.
    pub fn with_shadow(self) -> Self {
        self | BufferUsage::WRITE_ONLY
    }
}

/// How a locked range is going to be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockOptions {
    /// Read and write, preserving contents. May require a GPU readback.
    #[default]
    Normal,
    /// The whole locked range will be overwritten; old contents may be lost.
    Discard,
    /// Read only. Nothing is uploaded on unlock.
    ReadOnly,
    /// The caller will not touch anything the GPU may still be using.
    NoOverwrite,
    /// Write only; the initial contents of the range are undefined.
    WriteOnly,
}

impl LockOptions {
    /// The locked range must hold the current contents.
    pub fn reads_contents(&self) -> bool {
        matches!(self, LockOptions::Normal | LockOptions::ReadOnly)
    }

    /// Changes made through the lock must reach the buffer.
    pub fn writes_contents(&self) -> bool {
        !matches!(self, LockOptions::ReadOnly)
    }
}
