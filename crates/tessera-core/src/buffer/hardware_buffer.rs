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

//! The lockable buffer façade.
//!
//! A [`HardwareBuffer`] hides where its bytes live. Locking hands out a byte
//! slice that is one of three things:
//!
//! ```text
//! shadow copy present?      ──yes──► slice of the shadow
//!        │ no
//! storage has host memory?  ──yes──► slice of that memory
//!        │ no
//! staging vector (filled from the storage for Normal / ReadOnly)
//! ```
//!
//! Unlocking pushes whatever the lock changed back to the storage.

use super::device::BufferId;
use super::storage::{BufferStorage, StorageKind};
use super::usage::{BufferUsage, LockOptions, UsageClass};
use crate::error::BufferError;
use std::ops::{Deref, DerefMut};

#[derive(Debug)]
enum LockMode {
    Shadow,
    Direct,
    Staged(Vec<u8>),
}

#[derive(Debug)]
struct LockState {
    start: u64,
    size: u64,
    options: LockOptions,
    mode: LockMode,
}

#[derive(Debug)]
struct ShadowCopy {
    data: Vec<u8>,
    /// Half-open byte range not yet uploaded.
    dirty: Option<(u64, u64)>,
}

impl ShadowCopy {
    fn mark_dirty(&mut self, start: u64, end: u64) {
        self.dirty = Some(match self.dirty {
            Some((s, e)) => (s.min(start), e.max(end)),
            None => (start, end),
        });
    }
}

/// A GPU buffer with a lock/unlock access protocol.
///
/// At most one lock is outstanding at a time. The backend is chosen at
/// creation (see [`HardwareBufferManager`](super::HardwareBufferManager)) and
/// never changes.
#[derive(Debug)]
pub struct HardwareBuffer {
    label: Option<String>,
    size: u64,
    usage: BufferUsage,
    storage: Box<dyn BufferStorage>,
    shadow: Option<ShadowCopy>,
    lock: Option<LockState>,
    suppress_hardware_update: bool,
    performance_warnings: u64,
    released: bool,
}

impl HardwareBuffer {
    /// Wraps `storage` in the lock protocol.
    ///
    /// With `use_shadow`, reads are served from a host copy and the usage seen
    /// by the hardware is upgraded to write-only.
    pub fn new(
        label: Option<String>,
        usage: BufferUsage,
        storage: Box<dyn BufferStorage>,
        use_shadow: bool,
    ) -> Self {
        let size = storage.size_bytes();
        let (usage, shadow) = if use_shadow {
            (
                usage.with_shadow(),
                Some(ShadowCopy {
                    data: vec![0; size as usize],
                    dirty: None,
                }),
            )
        } else {
            (usage, None)
        };
        Self {
            label,
            size,
            usage,
            storage,
            shadow,
            lock: None,
            suppress_hardware_update: false,
            performance_warnings: 0,
            released: false,
        }
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.size
    }

    /// The usage the hardware side was created with.
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Usage class derived from [`usage`](Self::usage).
    pub fn usage_class(&self) -> UsageClass {
        self.usage.usage_class()
    }

    /// The backend strategy.
    pub fn storage_kind(&self) -> StorageKind {
        self.storage.kind()
    }

    /// Debug label, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Whether a host shadow copy serves reads.
    pub fn has_shadow(&self) -> bool {
        self.shadow.is_some()
    }

    /// Whether a lock is outstanding.
    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// `(start, size)` of the outstanding lock.
    pub fn lock_range(&self) -> Option<(u64, u64)> {
        self.lock.as_ref().map(|l| (l.start, l.size))
    }

    /// Options of the outstanding lock.
    pub fn lock_options(&self) -> Option<LockOptions> {
        self.lock.as_ref().map(|l| l.options)
    }

    /// Number of slow usage patterns this buffer has reported.
    pub fn performance_warnings(&self) -> u64 {
        self.performance_warnings
    }

    /// Whether shadow uploads are currently held back.
    pub fn is_hardware_update_suppressed(&self) -> bool {
        self.suppress_hardware_update
    }

    /// Native buffer and offset to bind for GPU commands.
    pub fn device_range(&self) -> Option<(BufferId, u64)> {
        self.storage.device_range()
    }

    /// Locks `length` bytes starting at `offset`.
    ///
    /// # Errors
    /// * `InvalidState` if the buffer is already locked.
    /// * `InvalidArgument` if the range does not fit in the buffer.
    pub fn lock(
        &mut self,
        offset: u64,
        length: u64,
        options: LockOptions,
    ) -> Result<&mut [u8], BufferError> {
        if self.lock.is_some() {
            return Err(BufferError::InvalidState(format!(
                "HardwareBuffer({}) is already locked",
                self.display_name()
            )));
        }
        match offset.checked_add(length) {
            Some(end) if end <= self.size => {}
            _ => return Err(BufferError::out_of_bounds(offset, length, self.size)),
        }

        self.check_usage_pattern(options);

        let mode = if self.shadow.is_some() {
            LockMode::Shadow
        } else if self.storage.host_memory().is_some() {
            LockMode::Direct
        } else {
            let mut staging = vec![0; length as usize];
            if options.reads_contents() {
                self.storage.read(offset, &mut staging)?;
            }
            LockMode::Staged(staging)
        };

        self.lock = Some(LockState {
            start: offset,
            size: length,
            options,
            mode,
        });
        self.locked_bytes_mut()
    }

    /// Locks the whole buffer.
    pub fn lock_all(&mut self, options: LockOptions) -> Result<&mut [u8], BufferError> {
        self.lock(0, self.size, options)
    }

    /// Locks and returns a guard that unlocks when dropped.
    pub fn lock_guard(
        &mut self,
        offset: u64,
        length: u64,
        options: LockOptions,
    ) -> Result<BufferLockGuard<'_>, BufferError> {
        self.lock(offset, length, options)?;
        Ok(BufferLockGuard {
            buffer: self,
            unlocked: false,
        })
    }

    /// Releases the outstanding lock and uploads what it changed.
    ///
    /// # Errors
    /// * `InvalidState` if the buffer is not locked.
    pub fn unlock(&mut self) -> Result<(), BufferError> {
        let state = self.lock.take().ok_or_else(|| {
            BufferError::InvalidState(format!(
                "HardwareBuffer({}) is not locked",
                self.display_name()
            ))
        })?;

        match state.mode {
            LockMode::Direct => Ok(()),
            LockMode::Staged(staging) => {
                if state.options.writes_contents() {
                    self.storage.write(state.start, &staging, state.options)
                } else {
                    Ok(())
                }
            }
            LockMode::Shadow => {
                if state.options.writes_contents() {
                    if let Some(shadow) = self.shadow.as_mut() {
                        shadow.mark_dirty(state.start, state.start + state.size);
                    }
                }
                self.update_from_shadow()
            }
        }
    }

    /// Copies `dest.len()` bytes starting at `offset` into `dest`.
    pub fn read_data(&mut self, offset: u64, dest: &mut [u8]) -> Result<(), BufferError> {
        let locked = self.lock(offset, dest.len() as u64, LockOptions::ReadOnly)?;
        dest.copy_from_slice(locked);
        self.unlock()
    }

    /// Writes `src` at `offset`.
    ///
    /// With `discard_whole_buffer` the previous contents of the entire buffer
    /// may be thrown away.
    pub fn write_data(
        &mut self,
        offset: u64,
        src: &[u8],
        discard_whole_buffer: bool,
    ) -> Result<(), BufferError> {
        let options = if discard_whole_buffer {
            LockOptions::Discard
        } else {
            LockOptions::WriteOnly
        };
        let locked = self.lock(offset, src.len() as u64, options)?;
        locked.copy_from_slice(src);
        self.unlock()
    }

    /// Writes a plain-old-data value at `offset`.
    pub fn write_pod<T: bytemuck::Pod>(&mut self, offset: u64, value: &T) -> Result<(), BufferError> {
        self.write_data(offset, bytemuck::bytes_of(value), false)
    }

    /// Writes a slice of plain-old-data values at `offset`.
    pub fn write_slice<T: bytemuck::Pod>(
        &mut self,
        offset: u64,
        values: &[T],
        discard_whole_buffer: bool,
    ) -> Result<(), BufferError> {
        self.write_data(offset, bytemuck::cast_slice(values), discard_whole_buffer)
    }

    /// Reads a plain-old-data value from `offset`.
    pub fn read_pod<T: bytemuck::Pod>(&mut self, offset: u64) -> Result<T, BufferError> {
        let mut value = T::zeroed();
        self.read_data(offset, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    /// Copies `length` bytes from `source`.
    ///
    /// Uses a GPU copy when `source` is device resident and this buffer's
    /// backend accepts device copies. Otherwise the bytes go through the CPU.
    pub fn copy_data(
        &mut self,
        source: &mut HardwareBuffer,
        source_offset: u64,
        dest_offset: u64,
        length: u64,
        discard_whole_buffer: bool,
    ) -> Result<(), BufferError> {
        if self.is_locked() || source.is_locked() {
            return Err(BufferError::InvalidState(
                "Cannot copy between buffers while either is locked".to_string(),
            ));
        }
        match source_offset.checked_add(length) {
            Some(end) if end <= source.size => {}
            _ => return Err(BufferError::out_of_bounds(source_offset, length, source.size)),
        }
        match dest_offset.checked_add(length) {
            Some(end) if end <= self.size => {}
            _ => return Err(BufferError::out_of_bounds(dest_offset, length, self.size)),
        }

        let source_is_current = source.shadow.as_ref().is_none_or(|s| s.dirty.is_none());
        if self.shadow.is_none() && source_is_current {
            if let Some((native, base)) = source.storage.device_range() {
                let options = if discard_whole_buffer {
                    LockOptions::Discard
                } else {
                    LockOptions::WriteOnly
                };
                if self
                    .storage
                    .copy_from_device(native, base + source_offset, dest_offset, length, options)?
                {
                    return Ok(());
                }
            }
        }

        let mut bytes = vec![0; length as usize];
        source.read_data(source_offset, &mut bytes)?;
        self.write_data(dest_offset, &bytes, discard_whole_buffer)
    }

    /// Copies as much of `source` as fits, discarding the previous contents.
    pub fn copy_all(&mut self, source: &mut HardwareBuffer) -> Result<(), BufferError> {
        let length = self.size.min(source.size);
        self.copy_data(source, 0, 0, length, true)
    }

    /// Holds back shadow uploads while `suppress` is set.
    ///
    /// Dirty ranges accumulate meanwhile and are uploaded in one go when the
    /// suppression is lifted.
    pub fn suppress_hardware_update(&mut self, suppress: bool) -> Result<(), BufferError> {
        self.suppress_hardware_update = suppress;
        if !suppress && !self.is_locked() {
            self.update_from_shadow()?;
        }
        Ok(())
    }

    /// Releases the backend now instead of on drop.
    pub fn destroy(mut self) -> Result<(), BufferError> {
        if self.lock.take().is_some() {
            log::warn!(
                "HardwareBuffer({}): destroyed while locked, pending changes are lost",
                self.display_name()
            );
        }
        self.released = true;
        self.storage.release()
    }

    /// Copies creation-time contents into the shadow without marking it dirty.
    pub(crate) fn seed_shadow(&mut self, data: &[u8]) {
        if let Some(shadow) = self.shadow.as_mut() {
            shadow.data[..data.len()].copy_from_slice(data);
        }
    }

    fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or("unnamed")
    }

    fn check_usage_pattern(&mut self, options: LockOptions) {
        if self.shadow.is_some() {
            return;
        }
        if options.reads_contents() && self.usage.is_write_only() {
            self.performance_warnings += 1;
            log::warn!(
                "HardwareBuffer({}): {:?} lock on a write-only buffer forces a GPU stall and readback. \
                 Use a shadow copy if the data must be read back.",
                self.display_name(),
                options
            );
        } else if options == LockOptions::Discard && !self.usage.is_host_visible() {
            self.performance_warnings += 1;
            log::warn!(
                "HardwareBuffer({}): Discard lock on a static buffer. \
                 Create it as dynamic if it is rewritten often.",
                self.display_name()
            );
        }
    }

    fn locked_bytes(&self) -> Option<&[u8]> {
        let state = self.lock.as_ref()?;
        let range = state.start as usize..(state.start + state.size) as usize;
        match &state.mode {
            LockMode::Staged(staging) => Some(staging.as_slice()),
            LockMode::Shadow => self.shadow.as_ref().map(|s| &s.data[range]),
            LockMode::Direct => self.storage.host_memory().map(|m| &m[range]),
        }
    }

    fn locked_bytes_mut(&mut self) -> Result<&mut [u8], BufferError> {
        let state = self.lock.as_mut().ok_or_else(|| {
            BufferError::InvalidState("Buffer is not locked".to_string())
        })?;
        let range = state.start as usize..(state.start + state.size) as usize;
        let bytes = match &mut state.mode {
            LockMode::Staged(staging) => Some(staging.as_mut_slice()),
            LockMode::Shadow => self.shadow.as_mut().map(|s| &mut s.data[range]),
            LockMode::Direct => self.storage.host_memory_mut().map(|m| &mut m[range]),
        };
        bytes.ok_or_else(|| BufferError::InvalidState("Locked memory is unavailable".to_string()))
    }

    /// Pushes the dirty part of the shadow to the storage.
    fn update_from_shadow(&mut self) -> Result<(), BufferError> {
        if self.suppress_hardware_update {
            return Ok(());
        }
        let Some(shadow) = self.shadow.as_mut() else {
            return Ok(());
        };
        let Some(dirty) = shadow.dirty.take() else {
            return Ok(());
        };

        // A discardable backend loses everything outside the written range.
        let (start, end) = if self.storage.is_discardable() {
            (0, self.size)
        } else {
            dirty
        };
        let options = if start == 0 && end == self.size {
            LockOptions::Discard
        } else {
            LockOptions::WriteOnly
        };

        let result = self
            .storage
            .write(start, &shadow.data[start as usize..end as usize], options);
        if result.is_err() {
            shadow.dirty = Some(dirty);
        }
        result
    }
}

impl Drop for HardwareBuffer {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.storage.release() {
            log::error!(
                "HardwareBuffer({}): failed to release storage: {}",
                self.display_name(),
                err
            );
        }
    }
}

/// Keeps a [`HardwareBuffer`] locked for its lifetime.
///
/// Dereferences to the locked bytes. Dropping the guard unlocks; use
/// [`unlock`](Self::unlock) to observe upload errors.
#[derive(Debug)]
pub struct BufferLockGuard<'a> {
    buffer: &'a mut HardwareBuffer,
    unlocked: bool,
}

impl BufferLockGuard<'_> {
    /// Unlocks now and reports the result.
    pub fn unlock(mut self) -> Result<(), BufferError> {
        self.unlocked = true;
        self.buffer.unlock()
    }
}

impl Deref for BufferLockGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.locked_bytes().unwrap_or_default()
    }
}

impl DerefMut for BufferLockGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self.buffer.locked_bytes_mut() {
            Ok(bytes) => bytes,
            Err(_) => &mut [],
        }
    }
}

impl Drop for BufferLockGuard<'_> {
    fn drop(&mut self) {
        if self.unlocked {
            return;
        }
        if let Err(err) = self.buffer.unlock() {
            log::error!("BufferLockGuard: unlock failed: {}", err);
        }
    }
}
