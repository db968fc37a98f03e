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

//! Tunables of the buffer subsystem.

use crate::error::BufferError;
use crate::frame::DEFAULT_DYNAMIC_BUFFER_MULTIPLIER;
use serde::{Deserialize, Serialize};

/// Settings shared by the device and the buffer managers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Frames the pipeline keeps in flight (2 for double, 3 for triple buffering).
    pub dynamic_buffer_multiplier: u32,
    /// Initial size of the discard backing store in bytes. It grows on demand.
    pub initial_discard_capacity: u64,
    /// Default alignment of discardable buffers in bytes.
    pub discard_alignment: u64,
    /// Map CPU-to-GPU buffers once for all frames instead of per lock.
    pub persistent_mapping: bool,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            dynamic_buffer_multiplier: DEFAULT_DYNAMIC_BUFFER_MULTIPLIER,
            initial_discard_capacity: 4 * 1024 * 1024,
            discard_alignment: 256,
            persistent_mapping: true,
        }
    }
}

impl BufferSettings {
    /// Load settings from a JSON string. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load settings from a JSON file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }

    /// Save settings to a JSON file
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Rejects values the buffer layer cannot work with.
    pub fn validate(&self) -> Result<(), BufferError> {
        if self.dynamic_buffer_multiplier == 0 {
            return Err(BufferError::InvalidArgument(
                "dynamic_buffer_multiplier must be at least 1".to_string(),
            ));
        }
        if self.discard_alignment == 0 {
            return Err(BufferError::InvalidArgument(
                "discard_alignment must be non-zero".to_string(),
            ));
        }
        if self.initial_discard_capacity == 0 {
            return Err(BufferError::InvalidArgument(
                "initial_discard_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
