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

//! # Tessera Infra
//!
//! Concrete implementations of the contracts in `tessera-core`: the
//! [`NullDevice`](null::NullDevice) that keeps buffers in host memory, and
//! resource monitors reporting device memory and discard pool usage.

pub mod null;
pub mod telemetry;

pub use null::NullDevice;
pub use telemetry::{DeviceMemoryMonitor, DiscardPoolMonitor};
