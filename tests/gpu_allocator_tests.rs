//! GPU Memory Allocator Tests
//!
//! Tests for:
//! - Non-overlapping sub-allocations within a page
//! - Page segregation by memory location, dedicated pages for large requests
//! - Free / coalesce / reuse of ranges, stale handle detection
//! - Slot recycling with generations, live handle limit
//! - Host writes: bounds, alignment, GPU-only rejection, data landing at the right offset
//! - Out-of-memory propagation

use sirmetal::renderer::memory::{BufferRange, GpuMemoryAllocator, MAX_LIVE_ALLOCATIONS};
use sirmetal::settings::AllocatorSettings;
use sirmetal::{BufferFlags, BufferHandle, HeadlessDevice, SirMetalError};

const PAGE: u64 = 64 * 1024;

fn setup() -> (HeadlessDevice, GpuMemoryAllocator<HeadlessDevice>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let allocator = GpuMemoryAllocator::new(AllocatorSettings {
        page_size: PAGE,
        granularity: 256,
    });
    (HeadlessDevice::new(), allocator)
}

// ============================================================================
// Placement Tests
// ============================================================================

#[test]
fn allocations_in_a_page_never_overlap() {
    let (device, mut alloc) = setup();
    // Deterministic mix of awkward sizes.
    let sizes = (0..60u64).map(|i| (i * 37 + 11) % 2000 + 1);

    let handles: Vec<BufferHandle> = sizes
        .map(|size| {
            alloc
                .allocate(&device, size, "mixed", BufferFlags::empty())
                .unwrap()
        })
        .collect();

    let placed: Vec<(usize, BufferRange)> = handles
        .iter()
        .map(|&h| {
            let info = alloc.info(h).unwrap();
            (info.page, info.range)
        })
        .collect();

    for (i, (page_a, a)) in placed.iter().enumerate() {
        assert_eq!(a.offset % 256, 0);
        assert!(a.end() <= alloc.page_size(*page_a));
        for (page_b, b) in &placed[i + 1..] {
            if page_a == page_b {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?} in page {page_a}");
            }
        }
    }
}

#[test]
fn gpu_only_and_cpu_visible_use_separate_pages() {
    let (device, mut alloc) = setup();

    let host = alloc.allocate(&device, 256, "host", BufferFlags::empty()).unwrap();
    let gpu = alloc.allocate(&device, 256, "gpu", BufferFlags::GPU_ONLY).unwrap();

    assert_ne!(alloc.info(host).unwrap().page, alloc.info(gpu).unwrap().page);
    assert_eq!(alloc.page_count(), 2);
}

#[test]
fn oversized_request_gets_a_dedicated_page() {
    let (device, mut alloc) = setup();

    let big = alloc
        .allocate(&device, PAGE * 3 + 1, "ray buffer", BufferFlags::GPU_ONLY)
        .unwrap();
    let info = alloc.info(big).unwrap();

    assert_eq!(info.range.offset, 0);
    assert_eq!(alloc.page_size(info.page), (PAGE * 3 + 1).next_multiple_of(256));
    assert_eq!(alloc.page_free_bytes(info.page), 0);
}

#[test]
fn full_page_spills_into_a_new_page() {
    let (device, mut alloc) = setup();

    let first = alloc.allocate(&device, PAGE, "fill", BufferFlags::empty()).unwrap();
    let second = alloc.allocate(&device, 256, "spill", BufferFlags::empty()).unwrap();

    assert_eq!(alloc.info(first).unwrap().page, 0);
    assert_eq!(alloc.info(second).unwrap().page, 1);
}

// ============================================================================
// Free / Reuse Tests
// ============================================================================

#[test]
fn freed_range_is_reused_by_later_allocation() {
    let (device, mut alloc) = setup();

    let a = alloc.allocate(&device, 1024, "a", BufferFlags::empty()).unwrap();
    let _b = alloc.allocate(&device, 1024, "b", BufferFlags::empty()).unwrap();
    let a_offset = alloc.info(a).unwrap().range.offset;

    alloc.free(a).unwrap();
    let c = alloc.allocate(&device, 512, "c", BufferFlags::empty()).unwrap();

    assert_eq!(alloc.range(c).unwrap().offset, a_offset);
    assert_eq!(alloc.live_allocations(), 2);
    assert_eq!(alloc.allocated_bytes(), 1024 + 512);
}

#[test]
fn stale_handle_is_rejected_everywhere() {
    let (device, mut alloc) = setup();
    let h = alloc.allocate(&device, 64, "temp", BufferFlags::empty()).unwrap();
    alloc.free(h).unwrap();

    assert!(matches!(alloc.info(h), Err(SirMetalError::StaleHandle(_))));
    assert!(matches!(alloc.get_buffer(h), Err(SirMetalError::StaleHandle(_))));
    assert!(matches!(
        alloc.write(&device, h, 0, &[1, 2, 3, 4]),
        Err(SirMetalError::StaleHandle(_))
    ));
}

#[test]
fn freed_slots_are_recycled_and_old_handles_stay_stale() {
    let (device, mut alloc) = setup();

    let mut previous = alloc.allocate(&device, 64, "scratch0", BufferFlags::empty()).unwrap();
    for frame in 1..1000 {
        alloc.free(previous).unwrap();
        let next = alloc
            .allocate(&device, 64, &format!("scratch{frame}"), BufferFlags::empty())
            .unwrap();

        assert_ne!(next, previous);
        assert!(matches!(alloc.info(previous), Err(SirMetalError::StaleHandle(_))));
        assert!(matches!(alloc.free(previous), Err(SirMetalError::StaleHandle(_))));
        previous = next;
    }

    assert_eq!(alloc.live_allocations(), 1);
    assert_eq!(alloc.info(previous).unwrap().name, "scratch999");
}

#[test]
fn live_handle_limit_is_an_error_not_a_panic() {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = HeadlessDevice::new();
    let mut alloc = GpuMemoryAllocator::new(AllocatorSettings {
        page_size: (MAX_LIVE_ALLOCATIONS as u64) * 256,
        granularity: 256,
    });

    let handles: Vec<BufferHandle> = (0..MAX_LIVE_ALLOCATIONS)
        .map(|_| alloc.allocate(&device, 256, "cell", BufferFlags::empty()).unwrap())
        .collect();
    let pages = alloc.page_count();

    assert!(matches!(
        alloc.allocate(&device, 256, "overflow", BufferFlags::empty()),
        Err(SirMetalError::HandlesExhausted { max }) if max == MAX_LIVE_ALLOCATIONS
    ));
    assert_eq!(alloc.page_count(), pages);

    let freed_range = alloc.range(handles[17]).unwrap();
    alloc.free(handles[17]).unwrap();
    let reused = alloc.allocate(&device, 256, "reused", BufferFlags::empty()).unwrap();

    assert_ne!(reused, handles[17]);
    assert_eq!(alloc.range(reused).unwrap(), freed_range);
    assert!(matches!(alloc.info(handles[17]), Err(SirMetalError::StaleHandle(_))));
}

#[test]
fn clear_makes_every_handle_stale() {
    let (device, mut alloc) = setup();
    let h = alloc.allocate(&device, 64, "temp", BufferFlags::empty()).unwrap();

    alloc.clear();
    assert_eq!(alloc.page_count(), 0);
    assert!(matches!(alloc.get_buffer(h), Err(SirMetalError::StaleHandle(_))));
}

// ============================================================================
// Write Tests
// ============================================================================

#[test]
fn write_lands_at_base_offset() {
    let (device, mut alloc) = setup();
    let _pad = alloc.allocate(&device, 256, "pad", BufferFlags::empty()).unwrap();
    let h = alloc.allocate(&device, 16, "data", BufferFlags::empty()).unwrap();

    alloc.write(&device, h, 4, &[9, 8, 7, 6]).unwrap();

    let (buffer, base) = alloc.get_buffer(h).unwrap();
    assert_eq!(base, 256);
    assert_eq!(buffer.read(base, 8), vec![0, 0, 0, 0, 9, 8, 7, 6]);
}

#[test]
fn write_past_the_end_is_rejected() {
    let (device, mut alloc) = setup();
    let h = alloc.allocate(&device, 10, "small", BufferFlags::empty()).unwrap();

    // The range is padded to 256 bytes.
    assert!(alloc.write(&device, h, 252, &[0; 4]).is_ok());
    assert!(matches!(
        alloc.write(&device, h, 253, &[0; 4]),
        Err(SirMetalError::WriteOutOfBounds { size: 256, .. })
    ));
}

#[test]
fn unaligned_write_offset_is_rejected() {
    let (device, mut alloc) = setup();
    let h = alloc.allocate(&device, 64, "params", BufferFlags::empty()).unwrap();

    // Odd lengths are fine, odd offsets are not.
    alloc.write(&device, h, 8, &[1, 2, 3]).unwrap();
    assert!(matches!(
        alloc.write(&device, h, 6, &[1, 2, 3, 4]),
        Err(SirMetalError::BufferWrite { offset: 6, .. })
    ));

    let (buffer, base) = alloc.get_buffer(h).unwrap();
    assert_eq!(buffer.read(base + 4, 8), vec![0, 0, 0, 0, 1, 2, 3, 0]);
}

#[test]
fn write_to_gpu_only_memory_is_rejected() {
    let (device, mut alloc) = setup();
    let h = alloc.allocate(&device, 64, "gpu", BufferFlags::GPU_ONLY).unwrap();

    assert!(matches!(
        alloc.write(&device, h, 0, &[0; 4]),
        Err(SirMetalError::NotCpuVisible)
    ));
}

// ============================================================================
// Exhaustion Tests
// ============================================================================

#[test]
fn device_out_of_memory_is_reported() {
    let (device, mut alloc) = setup();
    device.set_memory_budget(PAGE);

    assert!(alloc.allocate(&device, 256, "fits", BufferFlags::empty()).is_ok());
    let err = alloc.allocate(&device, 256, "no page left", BufferFlags::GPU_ONLY);

    assert!(matches!(err, Err(SirMetalError::OutOfMemory { .. })));
    assert_eq!(alloc.page_count(), 1);
    assert_eq!(alloc.live_allocations(), 1);
}

#[test]
fn clear_returns_pages_to_the_device() {
    let (device, mut alloc) = setup();
    device.set_memory_budget(PAGE);

    alloc.allocate(&device, 256, "first", BufferFlags::empty()).unwrap();
    assert_eq!(device.allocated_bytes(), PAGE);
    assert!(alloc.allocate(&device, 256, "other", BufferFlags::GPU_ONLY).is_err());

    alloc.clear();

    assert_eq!(device.allocated_bytes(), 0);
    assert!(alloc.allocate(&device, 256, "other", BufferFlags::GPU_ONLY).is_ok());
}
