//! Constant Buffer Manager Tests
//!
//! Tests for:
//! - Size class selection ({256, 1024, 4096}: 300 → 1024, 5000 → new class or error)
//! - Rejection of empty buffers
//! - 256-byte alignment of every resolved offset
//! - Buffered rotation: period N, distinct bytes per slot
//! - Typed updates through bytemuck

use bytemuck::{Pod, Zeroable};

use sirmetal::renderer::memory::{ConstantBufferFlags, ConstantBufferManager, GpuMemoryAllocator};
use sirmetal::settings::{AllocatorSettings, ConstantBufferSettings};
use sirmetal::{ConstantBufferHandle, HeadlessDevice, SirMetalError};

const FRAMES: u32 = 3;

struct Fixture {
    device: HeadlessDevice,
    allocator: GpuMemoryAllocator<HeadlessDevice>,
    manager: ConstantBufferManager,
}

impl Fixture {
    fn new() -> Self {
        Self::with_settings(&ConstantBufferSettings::default())
    }

    fn with_settings(settings: &ConstantBufferSettings) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            device: HeadlessDevice::new(),
            allocator: GpuMemoryAllocator::new(AllocatorSettings::default()),
            manager: ConstantBufferManager::new(settings, FRAMES),
        }
    }

    fn allocate(&mut self, size: u64, flags: ConstantBufferFlags) -> ConstantBufferHandle {
        self.manager
            .allocate(&self.device, &mut self.allocator, size, flags)
            .unwrap()
    }

    fn offset(&self, handle: ConstantBufferHandle, frame: u64) -> u64 {
        self.manager
            .get_bind_info(&self.allocator, handle, frame)
            .unwrap()
            .offset
    }

    fn read(&self, handle: ConstantBufferHandle, frame: u64, len: usize) -> Vec<u8> {
        let bind = self
            .manager
            .get_bind_info(&self.allocator, handle, frame)
            .unwrap();
        bind.buffer.read(bind.offset, len)
    }
}

// ============================================================================
// Size Class Tests
// ============================================================================

#[test]
fn request_of_300_bytes_uses_the_1024_class() {
    let mut fx = Fixture::new();
    let index = fx
        .manager
        .find_allocator(300, ConstantBufferFlags::empty())
        .unwrap();
    assert_eq!(fx.manager.size_classes()[index], 1024);

    let h = fx.allocate(300, ConstantBufferFlags::empty());
    assert_eq!(fx.manager.slot_size(h), 1024);
    assert_eq!(fx.manager.requested_size(h), 300);
}

#[test]
fn request_of_5000_bytes_adds_a_larger_class() {
    let mut fx = Fixture::new();

    let h = fx.allocate(5000, ConstantBufferFlags::empty());

    assert_eq!(fx.manager.size_classes(), vec![256, 1024, 4096, 8192]);
    assert!(fx.manager.slot_size(h) >= 5000);
    let bind = fx.manager.get_bind_info(&fx.allocator, h, 0).unwrap();
    assert_eq!(bind.size, 5000);
}

#[test]
fn request_larger_than_a_pool_fails_explicitly() {
    let mut fx = Fixture::with_settings(&ConstantBufferSettings {
        pool_size: 4096,
        size_classes: vec![256, 1024, 4096],
    });

    let err = fx.manager.allocate(
        &fx.device,
        &mut fx.allocator,
        5000,
        ConstantBufferFlags::empty(),
    );

    assert!(matches!(
        err,
        Err(SirMetalError::AllocationTooLarge { requested: 5000, .. })
    ));
    assert_eq!(fx.manager.size_classes(), vec![256, 1024, 4096]);
    assert!(fx.manager.is_empty());
}

#[test]
fn buffered_reservation_must_fit_all_frames() {
    let mut fx = Fixture::with_settings(&ConstantBufferSettings {
        pool_size: 8192,
        size_classes: vec![256],
    });

    // 4096 * 3 frames > 8192: rejected even though one slot would fit.
    let buffered = fx.manager.allocate(
        &fx.device,
        &mut fx.allocator,
        4000,
        ConstantBufferFlags::BUFFERED,
    );
    assert!(matches!(buffered, Err(SirMetalError::AllocationTooLarge { .. })));

    let single = fx.manager.allocate(
        &fx.device,
        &mut fx.allocator,
        4000,
        ConstantBufferFlags::empty(),
    );
    assert!(single.is_ok());
}

#[test]
fn oversized_buffered_reservation_reserves_no_memory() {
    let mut fx = Fixture::with_settings(&ConstantBufferSettings {
        pool_size: 8192,
        size_classes: vec![4096],
    });

    // The 4096 class exists, but three copies do not fit in one pool.
    let err = fx.manager.allocate(
        &fx.device,
        &mut fx.allocator,
        4000,
        ConstantBufferFlags::BUFFERED,
    );

    assert!(matches!(err, Err(SirMetalError::AllocationTooLarge { .. })));
    assert_eq!(fx.manager.pool_count(), 0);
    assert_eq!(fx.allocator.live_allocations(), 0);
}

#[test]
fn empty_buffer_is_rejected_without_reserving_memory() {
    let mut fx = Fixture::new();

    for flags in [ConstantBufferFlags::empty(), ConstantBufferFlags::BUFFERED] {
        let err = fx.manager.allocate(&fx.device, &mut fx.allocator, 0, flags);
        assert!(matches!(err, Err(SirMetalError::ZeroSizedAllocation)));
    }

    assert!(fx.manager.is_empty());
    assert_eq!(fx.manager.pool_count(), 0);
    assert_eq!(fx.allocator.live_allocations(), 0);

    let smallest = fx.allocate(1, ConstantBufferFlags::empty());
    assert_eq!(fx.manager.slot_size(smallest), 256);
}

#[test]
fn unsorted_configured_classes_are_sorted() {
    let fx = Fixture::with_settings(&ConstantBufferSettings {
        pool_size: 64 * 1024,
        size_classes: vec![4096, 100, 1024, 256],
    });
    assert_eq!(fx.manager.size_classes(), vec![256, 1024, 4096]);
}

// ============================================================================
// Alignment Tests
// ============================================================================

#[test]
fn every_bind_offset_is_256_aligned() {
    let mut fx = Fixture::new();
    let sizes = [1u64, 16, 64, 200, 256, 300, 1000, 1025, 4096, 5000, 12];

    let handles: Vec<_> = sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let flags = if i % 2 == 0 {
                ConstantBufferFlags::BUFFERED
            } else {
                ConstantBufferFlags::empty()
            };
            fx.allocate(size, flags)
        })
        .collect();

    for &h in &handles {
        for frame in 0..6 {
            let offset = fx.offset(h, frame);
            assert_eq!(offset % 256, 0, "offset {offset} of {h:?} at frame {frame}");
        }
    }
}

// ============================================================================
// Buffered Rotation Tests
// ============================================================================

#[test]
fn buffered_offsets_rotate_with_period_n() {
    let mut fx = Fixture::new();
    let h = fx.allocate(64, ConstantBufferFlags::BUFFERED);
    assert!(fx.manager.is_buffered(h));

    let offsets: Vec<u64> = (0..5).map(|frame| fx.offset(h, frame)).collect();

    assert_eq!(offsets[3], offsets[0]);
    assert_eq!(offsets[4], offsets[1]);
    assert_ne!(offsets[0], offsets[1]);
    assert_ne!(offsets[1], offsets[2]);
    assert_ne!(offsets[0], offsets[2]);
}

#[test]
fn buffered_writes_do_not_alias_in_flight_frames() {
    let mut fx = Fixture::new();
    let h = fx.allocate(16, ConstantBufferFlags::BUFFERED);

    for frame in 0..3u64 {
        let payload = [frame as u8 + 1; 16];
        fx.manager
            .update(&fx.device, &fx.allocator, h, frame, &payload)
            .unwrap();
    }

    assert_eq!(fx.read(h, 0, 16), vec![1; 16]);
    assert_eq!(fx.read(h, 1, 16), vec![2; 16]);
    assert_eq!(fx.read(h, 2, 16), vec![3; 16]);

    // Frame 3 reuses frame 0's slot.
    fx.manager
        .update(&fx.device, &fx.allocator, h, 3, &[9; 16])
        .unwrap();
    assert_eq!(fx.read(h, 0, 16), vec![9; 16]);
    assert_eq!(fx.read(h, 1, 16), vec![2; 16]);
}

#[test]
fn unbuffered_buffer_has_a_single_slot() {
    let mut fx = Fixture::new();
    let h = fx.allocate(64, ConstantBufferFlags::empty());

    assert!(!fx.manager.is_buffered(h));
    assert_eq!(fx.offset(h, 0), fx.offset(h, 1));
    assert_eq!(fx.offset(h, 0), fx.offset(h, 2));
}

#[test]
fn distinct_buffers_never_share_bytes() {
    let mut fx = Fixture::new();
    let a = fx.allocate(256, ConstantBufferFlags::BUFFERED);
    let b = fx.allocate(256, ConstantBufferFlags::BUFFERED);

    let a_slots: Vec<u64> = (0..3).map(|f| fx.offset(a, f)).collect();
    let b_slots: Vec<u64> = (0..3).map(|f| fx.offset(b, f)).collect();
    for a_off in &a_slots {
        for b_off in &b_slots {
            assert!(a_off + 256 <= *b_off || b_off + 256 <= *a_off);
        }
    }
}

// ============================================================================
// Typed Update Tests
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CameraUniforms {
    view_proj: [f32; 16],
    position: [f32; 4],
}

#[test]
fn update_value_writes_pod_bytes() {
    let mut fx = Fixture::new();
    let size = std::mem::size_of::<CameraUniforms>() as u64;
    let h = fx.allocate(size, ConstantBufferFlags::BUFFERED);

    let camera = CameraUniforms {
        view_proj: [1.0; 16],
        position: [0.0, 2.0, 5.0, 1.0],
    };
    fx.manager
        .update_value(&fx.device, &fx.allocator, h, 1, &camera)
        .unwrap();

    let bytes = fx.read(h, 1, size as usize);
    assert_eq!(bytes, bytemuck::bytes_of(&camera));
    assert_eq!(fx.read(h, 0, 4), vec![0; 4]);
}
