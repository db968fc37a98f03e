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

//! End-to-end buffer lifecycle tests on the NULL device.

use std::sync::Arc;

use tessera_core::telemetry::ResourceMonitor;
use tessera_core::{
    Block, BufferDevice, BufferError, BufferSettings, BufferUsage, DiscardBufferId,
    DiscardBufferManager, HardwareBuffer, HardwareBufferDescriptor, HardwareBufferManager,
    LockOptions, StorageKind,
};
use tessera_infra::{DeviceMemoryMonitor, DiscardPoolMonitor, NullDevice};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_pool() -> BufferSettings {
    BufferSettings {
        initial_discard_capacity: 4096,
        ..Default::default()
    }
}

fn setup(settings: BufferSettings) -> (NullDevice, HardwareBufferManager) {
    init_logger();
    let device = NullDevice::from_settings(&settings);
    let manager = HardwareBufferManager::new(Arc::new(device.clone()), settings).unwrap();
    (device, manager)
}

fn create(manager: &HardwareBufferManager, size: u64, usage: BufferUsage) -> HardwareBuffer {
    manager
        .create_buffer(&HardwareBufferDescriptor::new(size, usage))
        .unwrap()
}

fn ranges_overlap(a: (u64, u64), b: (u64, u64)) -> bool {
    a.0 < b.0 + b.1 && b.0 < a.0 + a.1
}

/// Tiny deterministic generator so the stress loops are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[test]
fn discard_maps_in_one_frame_use_disjoint_regions() {
    init_logger();
    let device = NullDevice::new(3);
    let mut pool = DiscardBufferManager::new(&device, "Ring", 4096).unwrap();
    let frames = device.frame_tracker();

    let id = pool
        .create_discard_buffer(&device, &frames, 1024, 256)
        .unwrap();
    let buffer = pool.discard_buffer(id).unwrap();
    assert_eq!(buffer.data_offset(), 0);
    assert_eq!(buffer.block_pre_padding(), 0);

    let mut regions = Vec::new();
    for _ in 0..4 {
        let region = pool.map(&device, &frames, id, false).unwrap();
        pool.unmap(id).unwrap();
        regions.push((region.offset, region.size));
    }
    assert_eq!(regions[0].0, 0);
    for (i, a) in regions.iter().enumerate() {
        for b in &regions[i + 1..] {
            assert!(!ranges_overlap(*a, *b), "{a:?} overlaps {b:?}");
        }
    }
    assert_eq!(pool.capacity(), 4096, "four maps fit without growth");

    pool.map(&device, &frames, id, false).unwrap();
    pool.unmap(id).unwrap();
    assert!(pool.capacity() > 4096, "the fifth map must grow the store");
    assert_eq!(device.stall_count(), 1);
}

#[test]
fn growth_preserves_live_buffers() {
    let (device, manager) = setup(small_pool());

    let mut buffers: Vec<HardwareBuffer> = (0..4u8)
        .map(|i| {
            let mut buffer = create(&manager, 1024, BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE);
            buffer.write_data(0, &[i + 1; 1024], false).unwrap();
            buffer
        })
        .collect();
    let old_store = buffers[0].device_range().unwrap().0;
    assert_eq!(manager.discard_stats().free_bytes, 0);

    let _fifth = create(&manager, 1024, BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE);

    let stats = manager.discard_stats();
    assert!(stats.capacity_bytes >= 5120);
    assert_eq!(stats.growth_count, 1);
    assert_eq!(device.buffer_size(old_store), None);

    for (i, buffer) in buffers.iter_mut().enumerate() {
        let mut contents = vec![0u8; 1024];
        buffer.read_data(0, &mut contents).unwrap();
        assert_eq!(contents, vec![i as u8 + 1; 1024], "buffer {i} changed across growth");
    }
}

#[test]
fn read_only_lock_on_gpu_only_buffer_reads_back() {
    let (device, manager) = setup(small_pool());
    let mut buffer = create(&manager, 256, BufferUsage::STATIC_WRITE_ONLY);
    let pattern: Vec<u8> = (0..=255).collect();
    buffer.write_data(0, &pattern, false).unwrap();
    let stalls_before = device.stall_count();

    let read_back = buffer.lock_all(LockOptions::ReadOnly).unwrap().to_vec();
    buffer.unlock().unwrap();

    assert_eq!(read_back, pattern);
    assert_eq!(buffer.performance_warnings(), 1);
    assert_eq!(device.stall_count(), stalls_before + 1);
}

#[test]
fn every_backend_allows_a_single_lock() {
    let (_device, manager) = setup(small_pool());
    for usage in [
        BufferUsage::DYNAMIC,
        BufferUsage::STATIC,
        BufferUsage::STATIC_WRITE_ONLY,
        BufferUsage::DYNAMIC_WRITE_ONLY,
        BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE,
    ] {
        let mut buffer = create(&manager, 512, usage);
        buffer.lock(0, 128, LockOptions::WriteOnly).unwrap();
        let err = buffer.lock(128, 128, LockOptions::WriteOnly).unwrap_err();
        assert!(err.is_invalid_state(), "{usage:?}: {err}");
        buffer.unlock().unwrap();
        assert!(buffer.unlock().unwrap_err().is_invalid_state(), "{usage:?}");
    }
}

#[test]
fn out_of_bounds_locks_are_rejected_on_every_backend() {
    let (_device, manager) = setup(small_pool());
    for usage in [
        BufferUsage::DYNAMIC,
        BufferUsage::STATIC_WRITE_ONLY,
        BufferUsage::DYNAMIC_WRITE_ONLY,
        BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE,
    ] {
        let mut buffer = create(&manager, 512, usage);
        for (offset, length) in [(0, 513), (512, 1), (500, 13), (u64::MAX, 1)] {
            let err = buffer
                .lock(offset, length, LockOptions::Discard)
                .unwrap_err();
            assert!(matches!(err, BufferError::InvalidArgument(_)), "{usage:?}");
        }
        assert!(!buffer.is_locked());
        buffer.lock(512, 0, LockOptions::Discard).unwrap();
        buffer.unlock().unwrap();
    }
}

#[test]
fn regions_are_never_reused_inside_the_fence_window() {
    init_logger();
    let device = NullDevice::new(3);
    let mut pool = DiscardBufferManager::new(&device, "Fence", 64 * 1024).unwrap();
    let mut rng = Lcg(7);

    let mut live: Vec<DiscardBufferId> = Vec::new();
    // (offset, size, frame) of every region handed out by a discard map.
    let mut history: Vec<(u64, u64, u64)> = Vec::new();
    let mut growths = 0;

    for _ in 0..60 {
        let frames = device.frame_tracker();
        for _ in 0..6 {
            match rng.next() % 6 {
                0 if live.len() < 8 => {
                    let size = 64 * (1 + rng.next() % 8);
                    live.push(pool.create_discard_buffer(&device, &frames, size, 64).unwrap());
                }
                1 if !live.is_empty() => {
                    let index = (rng.next() as usize) % live.len();
                    let id = live.swap_remove(index);
                    pool.destroy_discard_buffer(&frames, id).unwrap();
                }
                _ if !live.is_empty() => {
                    let id = live[(rng.next() as usize) % live.len()];
                    let region = pool.map(&device, &frames, id, false).unwrap();
                    pool.unmap(id).unwrap();

                    // A growth stalls the device, which retires every fence.
                    if pool.stats().growth_count != growths {
                        growths = pool.stats().growth_count;
                        history.clear();
                    }
                    let now = frames.current_frame();
                    for &(offset, size, used) in &history {
                        if ranges_overlap((offset, size), (region.offset, region.size)) {
                            assert!(
                                now - used >= 3,
                                "region at {} reused {} frames after use",
                                region.offset,
                                now - used
                            );
                        }
                    }
                    history.retain(|&(_, _, used)| now - used < 3);
                    history.push((region.offset, region.size, now));
                }
                _ => {}
            }
        }
        device.end_frame();
    }
}

#[test]
fn released_blocks_coalesce_back_into_one() {
    init_logger();
    let device = NullDevice::new(2);
    let mut pool = DiscardBufferManager::new(&device, "Coalesce", 8192).unwrap();
    let frames = device.frame_tracker();

    let ids: Vec<DiscardBufferId> = (0..16)
        .map(|_| pool.create_discard_buffer(&device, &frames, 512, 512).unwrap())
        .collect();
    assert!(pool.free_blocks().is_empty());

    // Every other buffer first: the free list holds isolated holes.
    for id in ids.iter().step_by(2) {
        pool.destroy_discard_buffer(&frames, *id).unwrap();
    }
    assert_eq!(pool.free_blocks().len(), 8);

    for id in ids.iter().skip(1).step_by(2) {
        pool.destroy_discard_buffer(&frames, *id).unwrap();
    }
    assert_eq!(pool.free_blocks(), &[Block::new(0, 8192)]);
}

#[test]
fn round_trip_for_readable_classes() {
    let (_device, manager) = setup(small_pool());
    for usage in [BufferUsage::DYNAMIC, BufferUsage::STATIC] {
        let mut buffer = create(&manager, 64, usage);
        let data: Vec<u8> = (0..64).map(|i| i * 3).collect();
        buffer.write_data(0, &data, false).unwrap();

        let mut out = vec![0u8; 64];
        buffer.read_data(0, &mut out).unwrap();
        assert_eq!(out, data, "{usage:?}");
    }
}

#[test]
fn write_only_classes_round_trip_through_copy_data() {
    let (device, manager) = setup(small_pool());
    for usage in [
        BufferUsage::STATIC_WRITE_ONLY,
        BufferUsage::DYNAMIC_WRITE_ONLY,
        BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE,
    ] {
        let mut source = create(&manager, 128, usage);
        let data: Vec<u8> = (0..128).map(|i| 255 - i).collect();
        source.write_data(0, &data, false).unwrap();

        let mut readable = create(&manager, 128, BufferUsage::STATIC);
        let copies_before = device.copy_count();
        readable.copy_data(&mut source, 0, 0, 128, false).unwrap();
        assert_eq!(device.copy_count(), copies_before + 1, "{usage:?} stays on the GPU");
        assert_eq!(source.performance_warnings(), 0);

        let mut out = vec![0u8; 128];
        readable.read_data(0, &mut out).unwrap();
        assert_eq!(out, data, "{usage:?}");
    }
}

#[test]
fn stall_reclaims_everything() {
    let (_device, manager) = setup(BufferSettings {
        initial_discard_capacity: 64 * 1024,
        ..Default::default()
    });
    let mut buffers: Vec<HardwareBuffer> = (0..4)
        .map(|_| create(&manager, 1024, BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE))
        .collect();
    for _ in 0..3 {
        for buffer in &mut buffers {
            buffer.write_data(0, &[1; 1024], true).unwrap();
        }
    }
    assert!(manager.discard_stats().unsafe_block_count > 0);

    manager.stall().unwrap();
    let after_stall = manager.discard_stats();
    assert_eq!(after_stall.unsafe_block_count, 0);
    assert_eq!(after_stall.unsafe_bytes, 0);

    let ranges: Vec<_> = buffers.iter().map(|b| b.device_range().unwrap()).collect();
    for buffer in &mut buffers {
        buffer.write_data(0, &[2; 1024], true).unwrap();
    }
    let after_discard = manager.discard_stats();
    assert_eq!(after_discard.fresh_allocations, after_stall.fresh_allocations);
    assert_eq!(after_discard.reuse_count, after_stall.reuse_count + 4);
    for (buffer, range) in buffers.iter().zip(ranges) {
        assert_eq!(buffer.device_range().unwrap(), range);
    }
}

#[test]
fn device_exhaustion_during_growth_is_resource_exhausted() {
    init_logger();
    let settings = small_pool();
    let device = NullDevice::with_memory_limit(3, 8192);
    let manager = HardwareBufferManager::new(Arc::new(device.clone()), settings).unwrap();

    let mut kept: Vec<HardwareBuffer> = (0..4)
        .map(|_| create(&manager, 1024, BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE))
        .collect();
    kept[0].write_data(0, &[9; 1024], false).unwrap();

    let err = manager
        .create_buffer(&HardwareBufferDescriptor::new(
            1024,
            BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE,
        ))
        .unwrap_err();
    assert_eq!(
        err,
        BufferError::ResourceExhausted {
            requested_bytes: 6144
        }
    );

    // The pool is untouched by the failed growth.
    let stats = manager.discard_stats();
    assert_eq!(stats.capacity_bytes, 4096);
    assert_eq!(stats.live_buffers, 4);
    assert_eq!(kept[0].read_pod::<[u8; 4]>(0).unwrap(), [9; 4]);
}

#[test]
fn device_exhaustion_during_discard_keeps_the_current_region() {
    init_logger();
    let device = NullDevice::with_memory_limit(3, 8192);
    let manager = HardwareBufferManager::new(Arc::new(device.clone()), small_pool()).unwrap();

    let mut buffers: Vec<HardwareBuffer> = (0..4)
        .map(|_| create(&manager, 1024, BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE))
        .collect();
    buffers[0].write_data(0, &[1; 1024], false).unwrap();
    let region = buffers[0].device_range().unwrap();

    // Used this frame and the pool is full: the discard has to grow and cannot.
    let err = buffers[0].write_data(0, &[2; 1024], true).unwrap_err();
    assert_eq!(
        err,
        BufferError::ResourceExhausted {
            requested_bytes: 6144
        }
    );
    assert!(!buffers[0].is_locked());
    assert_eq!(manager.discard_stats().unsafe_block_count, 0);
    assert_eq!(buffers[0].device_range().unwrap(), region);

    for _ in 0..3 {
        device.end_frame();
    }
    if let Some(last) = buffers.pop() {
        last.destroy().unwrap();
    }
    let mut later = create(&manager, 1024, BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE);
    later.write_data(0, &[7; 1024], false).unwrap();

    assert_ne!(later.device_range().unwrap(), region);
    assert_eq!(buffers[0].read_pod::<[u8; 4]>(0).unwrap(), [1; 4]);
}

#[test]
fn persistent_ring_cycles_slots_per_frame() {
    let (device, manager) = setup(small_pool());
    let mut buffer = create(&manager, 256, BufferUsage::DYNAMIC_WRITE_ONLY);
    assert_eq!(buffer.storage_kind(), StorageKind::PersistentRing);

    let mut offsets = Vec::new();
    for frame in 0..4u8 {
        buffer.write_data(0, &[frame; 256], true).unwrap();
        buffer.write_data(0, &[frame; 256], true).unwrap();
        offsets.push(buffer.device_range().unwrap().1);
        device.end_frame();
    }
    assert_eq!(offsets, vec![256, 512, 0, 256]);
}

#[test]
fn monitors_report_device_and_pool_usage() {
    let (device, manager) = setup(small_pool());
    let vram = DeviceMemoryMonitor::new(device.memory_provider(), "null_vram".to_string());
    let pool = DiscardPoolMonitor::new("discard_pool".to_string());

    let _a = create(&manager, 1024, BufferUsage::DYNAMIC_WRITE_ONLY_DISCARDABLE);
    let _b = create(&manager, 512, BufferUsage::STATIC_WRITE_ONLY);
    pool.record(manager.discard_stats());

    assert_eq!(vram.get_usage_report().current_bytes, 4096 + 512);
    let report = pool.get_usage_report();
    assert_eq!(report.current_bytes, 1024);
    assert_eq!(report.total_capacity_bytes, Some(4096));
}
