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

//! Defines the hierarchy of error types for the buffer subsystem.
//!
//! [`ResourceError`] is what a [`BufferDevice`](crate::buffer::BufferDevice)
//! reports. [`BufferError`] is what the buffer layer reports to its callers and
//! wraps device errors.

use crate::discard::DiscardBufferId;
use std::fmt;

/// An error reported by a device while creating or accessing a raw GPU buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A buffer could not be found for the given ID.
    NotFound,
    /// The handle or ID used to reference a buffer is invalid.
    InvalidHandle,
    /// An access went past the end of the buffer.
    OutOfBounds,
    /// The device could not satisfy an allocation.
    OutOfMemory {
        /// The size of the allocation that failed.
        requested_bytes: u64,
    },
    /// An error originating from the specific graphics backend implementation.
    BackendError(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::NotFound => write!(f, "Resource not found with ID."),
            ResourceError::InvalidHandle => write!(f, "Invalid resource handle or ID."),
            ResourceError::OutOfBounds => write!(f, "Resource access out of bounds."),
            ResourceError::OutOfMemory { requested_bytes } => {
                write!(f, "Device out of memory: requested {requested_bytes} bytes.")
            }
            ResourceError::BackendError(msg) => {
                write!(f, "Backend-specific resource error: {msg}")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

/// An error reported by the buffer layer.
///
/// `InvalidState` and `InvalidArgument` are caller bugs. `ResourceExhausted` is
/// fatal for the resource being created: the host or device ran out of memory
/// while the backing store was growing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Lock/unlock or map/unmap misuse (double lock, unlock without lock, ...).
    InvalidState(String),
    /// A range or parameter was rejected before touching memory.
    InvalidArgument(String),
    /// The underlying allocation primitive failed.
    ResourceExhausted {
        /// The size of the allocation that failed.
        requested_bytes: u64,
    },
    /// The discard buffer is not (or no longer) tracked by its manager.
    UnknownDiscardBuffer(DiscardBufferId),
    /// A device-level error that is not an allocation failure.
    Resource(ResourceError),
}

impl BufferError {
    pub(crate) fn out_of_bounds(offset: u64, length: u64, size: u64) -> Self {
        BufferError::InvalidArgument(format!(
            "Range [{offset}, {offset} + {length}) is out of bounds for a buffer of {size} bytes"
        ))
    }

    /// Returns `true` for contract violations (`InvalidState`).
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, BufferError::InvalidState(_))
    }

    /// Returns `true` for rejected parameters (`InvalidArgument`).
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, BufferError::InvalidArgument(_))
    }
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::InvalidState(msg) => write!(f, "Invalid buffer state: {msg}"),
            BufferError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            BufferError::ResourceExhausted { requested_bytes } => write!(
                f,
                "Buffer memory exhausted while allocating {requested_bytes} bytes"
            ),
            BufferError::UnknownDiscardBuffer(id) => {
                write!(f, "Discard buffer {id:?} is not tracked by this manager")
            }
            BufferError::Resource(err) => write!(f, "Device resource error: {err}"),
        }
    }
}

impl std::error::Error for BufferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BufferError::Resource(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceError> for BufferError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::OutOfMemory { requested_bytes } => {
                BufferError::ResourceExhausted { requested_bytes }
            }
            ResourceError::OutOfBounds => {
                BufferError::InvalidArgument("Device access out of bounds".to_string())
            }
            other => BufferError::Resource(other),
        }
    }
}
