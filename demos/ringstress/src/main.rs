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

//! Drives discardable buffers through a frame loop on the NULL device and
//! reports how the discard pool behaves.
//!
//! ```bash
//! ringstress --frames 240 --buffers 16 --size 4096
//! ringstress --config buffers.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use clap::Parser;
use tessera_core::telemetry::ResourceMonitor;
use tessera_core::{
    BufferSettings, BufferUsage, HardwareBuffer, HardwareBufferDescriptor, HardwareBufferManager,
};
use tessera_infra::{DeviceMemoryMonitor, DiscardPoolMonitor, NullDevice};

#[derive(Parser)]
#[command(
    name = "ringstress",
    about = "Stress the discard buffer pool over many frames",
    version
)]
struct Cli {
    /// Buffer settings as JSON. Flags below override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of frames to simulate.
    #[arg(short, long, default_value_t = 120)]
    frames: u32,

    /// Long-lived discardable buffers rewritten every frame.
    #[arg(short, long, default_value_t = 8)]
    buffers: usize,

    /// Size of each buffer in bytes.
    #[arg(short, long, default_value_t = 4096)]
    size: u64,

    /// Frames the GPU may lag behind the CPU.
    #[arg(short, long)]
    multiplier: Option<u32>,

    /// Initial capacity of the discard pool in bytes.
    #[arg(long)]
    pool_capacity: Option<u64>,

    /// Discards per buffer and frame.
    #[arg(long, default_value_t = 2)]
    discards_per_frame: u32,

    /// Log pool statistics every N frames.
    #[arg(long, default_value_t = 30)]
    report_every: u32,
}

/// What one draw call would upload per discard.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DrawConstants {
    frame: u32,
    buffer: u32,
    pass: u32,
    _pad: u32,
}

fn load_settings(cli: &Cli) -> Result<BufferSettings> {
    let mut settings = match &cli.config {
        Some(path) => {
            let path = path.to_str().context("config path is not valid UTF-8")?;
            BufferSettings::from_file(path)
                .map_err(|e| anyhow!("failed to load {path}: {e}"))?
        }
        None => BufferSettings::default(),
    };
    if let Some(multiplier) = cli.multiplier {
        settings.dynamic_buffer_multiplier = multiplier;
    }
    if let Some(capacity) = cli.pool_capacity {
        settings.initial_discard_capacity = capacity;
    }
    settings.validate()?;
    Ok(settings)
}

fn log_pool(frame: u32, pool: &DiscardPoolMonitor) {
    let stats = pool.latest_stats();
    log::info!(
        "frame {:>5}: pool {} B, used {} B, free {} B in {} blocks, unsafe {} B in {} blocks, {} growths",
        frame,
        stats.capacity_bytes,
        stats.used_bytes(),
        stats.free_bytes,
        stats.free_block_count,
        stats.unsafe_bytes,
        stats.unsafe_block_count,
        stats.growth_count
    );
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    log::info!(
        "ringstress: {} frames, {} buffers of {} bytes, {} frames in flight, pool of {} bytes",
        cli.frames,
        cli.buffers,
        cli.size,
        settings.dynamic_buffer_multiplier,
        settings.initial_discard_capacity
    );

    let device = NullDevice::from_settings(&settings);
    let manager = HardwareBufferManager::new(Arc::new(device.clone()), settings)?;
    let vram = DeviceMemoryMonitor::new(device.memory_provider(), "null_vram".to_string());
    let pool = DiscardPoolMonitor::new("discard_pool".to_string());

    let constants_len = std::mem::size_of::<DrawConstants>() as u64;
    let size = cli.size.max(constants_len);
    let mut buffers = (0..cli.buffers)
        .map(|i| {
            let mut descriptor =
                HardwareBufferDescriptor::new(size, BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE);
            descriptor.label = Some(format!("stress #{i}").into());
            manager.create_buffer(&descriptor)
        })
        .collect::<Result<Vec<HardwareBuffer>, _>>()?;

    let mut transient: Option<HardwareBuffer> = None;
    for frame in 0..cli.frames {
        for (index, buffer) in buffers.iter_mut().enumerate() {
            for pass in 0..cli.discards_per_frame {
                let constants = DrawConstants {
                    frame,
                    buffer: index as u32,
                    pass,
                    _pad: 0,
                };
                buffer.write_slice(0, &[constants], true)?;
            }
        }

        // A short-lived buffer every few frames churns the free list.
        if frame % 4 == 0 {
            if let Some(old) = transient.take() {
                old.destroy()?;
            }
            let descriptor = HardwareBufferDescriptor::new(
                size / 2 + constants_len,
                BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE,
            );
            let mut buffer = manager.create_buffer(&descriptor)?;
            buffer.write_data(0, &vec![frame as u8; descriptor.size as usize], true)?;
            transient = Some(buffer);
        }

        pool.record(manager.discard_stats());
        if cli.report_every > 0 && frame % cli.report_every == 0 {
            log_pool(frame, &pool);
        }
        device.end_frame();
    }

    // Every buffer must still hold the constants of its last pass.
    if let Some(last_frame) = cli.frames.checked_sub(1) {
        for (index, buffer) in buffers.iter_mut().enumerate() {
            let constants: DrawConstants = buffer.read_pod(0)?;
            if constants.frame != last_frame || constants.buffer != index as u32 {
                return Err(anyhow!(
                    "buffer {index} holds {constants:?}, expected frame {last_frame}"
                ));
            }
        }
    }

    let stats = pool.latest_stats();
    let pool_report = pool.get_usage_report();
    let vram_report = vram.get_usage_report();
    log::info!(
        "done: {} fresh allocations, {} reuses, {} growths, {} stalls",
        stats.fresh_allocations,
        stats.reuse_count,
        stats.growth_count,
        device.stall_count()
    );
    log::info!(
        "pool peak {} B of {} B, device memory {} B (peak {} B)",
        pool_report.peak_bytes.unwrap_or(0),
        pool_report.total_capacity_bytes.unwrap_or(0),
        vram_report.current_bytes,
        vram_report.peak_bytes.unwrap_or(0)
    );

    if let Some(buffer) = transient {
        buffer.destroy()?;
    }
    for buffer in buffers {
        buffer.destroy()?;
    }
    manager.destroy()?;
    Ok(())
}
