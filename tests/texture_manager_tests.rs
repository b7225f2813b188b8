//! Render Texture Manager Tests
//!
//! Tests for:
//! - Handles stay valid across resizes, natives are swapped behind them
//! - Atomic group resize: all textures change together or none do
//! - Attachment signatures derived from managed textures

use sirmetal::renderer::pipeline::DrawTracker;
use sirmetal::{AllocTextureRequest, HeadlessDevice, SirMetalError, TextureHandle, TextureManager};

fn setup() -> (HeadlessDevice, TextureManager<HeadlessDevice>) {
    let _ = env_logger::builder().is_test(true).try_init();
    (HeadlessDevice::new(), TextureManager::new())
}

/// Three screen-sized targets sampled together by one pass.
fn flood_group(
    device: &HeadlessDevice,
    textures: &mut TextureManager<HeadlessDevice>,
) -> [TextureHandle; 3] {
    ["floodMask", "floodPing", "floodPong"].map(|name| {
        textures
            .allocate(
                device,
                AllocTextureRequest::render_target(name, 800, 600, wgpu::TextureFormat::Rg16Float),
            )
            .unwrap()
    })
}

// ============================================================================
// Single Texture Tests
// ============================================================================

#[test]
fn allocate_registers_the_name() {
    let (device, mut textures) = setup();
    let request = AllocTextureRequest::render_target("gbuffer", 1280, 720, wgpu::TextureFormat::Rgba16Float);

    let handle = textures.allocate(&device, request).unwrap();

    assert_eq!(textures.get_handle_from_name("gbuffer"), Some(handle));
    assert_eq!(textures.get_handle_from_name("missing"), None);
    assert_eq!(textures.get_format(handle), wgpu::TextureFormat::Rgba16Float);
    assert_eq!(textures.get_size(handle), (1280, 720));
    assert_eq!(textures.get_native(handle).label, "gbuffer");
}

#[test]
fn resize_swaps_the_native_behind_a_stable_handle() {
    let (device, mut textures) = setup();
    let handle = textures
        .allocate(
            &device,
            AllocTextureRequest::render_target("color", 640, 480, wgpu::TextureFormat::Bgra8Unorm),
        )
        .unwrap();
    let old_id = textures.get_native(handle).id;

    assert!(textures.resize_texture(&device, handle, 1024, 768).unwrap());

    let native = textures.get_native(handle);
    assert_ne!(native.id, old_id);
    assert_eq!((native.width, native.height), (1024, 768));
    assert_eq!(native.format, wgpu::TextureFormat::Bgra8Unorm);
    assert_eq!(textures.generation(handle), 1);
}

#[test]
fn failed_allocation_registers_nothing() {
    let (device, mut textures) = setup();
    let result = textures.allocate(
        &device,
        AllocTextureRequest::render_target("empty", 0, 0, wgpu::TextureFormat::Rgba8Unorm),
    );

    assert!(matches!(result, Err(SirMetalError::TextureCreation { .. })));
    assert!(textures.is_empty());
    assert_eq!(textures.get_handle_from_name("empty"), None);
}

// ============================================================================
// Group Resize Tests
// ============================================================================

#[test]
fn group_resize_updates_every_texture() {
    let (device, mut textures) = setup();
    let group = flood_group(&device, &mut textures);

    assert!(textures.resize_textures(&device, &group, 1920, 1080).unwrap());

    for handle in group {
        let native = textures.get_native(handle);
        assert_eq!((native.width, native.height), (1920, 1080));
        assert_eq!(textures.get_size(handle), (1920, 1080));
        assert_eq!(textures.generation(handle), 1);
    }
}

#[test]
fn failed_group_resize_keeps_every_old_texture() {
    let (device, mut textures) = setup();
    let group = flood_group(&device, &mut textures);
    let old_ids: Vec<u64> = group.iter().map(|&h| textures.get_native(h).id).collect();

    device.set_max_texture_dimension(1024);
    let result = textures.resize_textures(&device, &group, 2048, 1024);

    match result {
        Err(SirMetalError::ResizeFailed { names, .. }) => {
            assert_eq!(names, "floodMask, floodPing, floodPong");
        }
        other => panic!("expected ResizeFailed, got {other:?}"),
    }
    for (handle, old_id) in group.iter().zip(old_ids) {
        let native = textures.get_native(*handle);
        assert_eq!(native.id, old_id);
        assert_eq!((native.width, native.height), (800, 600));
        assert_eq!(textures.generation(*handle), 0);
    }

    // Once the device accepts the size the same group resizes normally.
    device.set_max_texture_dimension(4096);
    assert!(textures.resize_textures(&device, &group, 2048, 1024).unwrap());
}

#[test]
fn group_resize_to_current_size_is_a_no_op() {
    let (device, mut textures) = setup();
    let group = flood_group(&device, &mut textures);

    assert!(!textures.resize_textures(&device, &group, 800, 600).unwrap());
    for handle in group {
        assert_eq!(textures.generation(handle), 0);
    }
}

#[test]
fn group_resize_only_replaces_mismatched_members() {
    let (device, mut textures) = setup();
    let group = flood_group(&device, &mut textures);
    textures.resize_texture(&device, group[0], 1024, 768).unwrap();

    assert!(textures.resize_textures(&device, &group, 1024, 768).unwrap());

    assert_eq!(textures.generation(group[0]), 1);
    assert_eq!(textures.generation(group[1]), 1);
    assert_eq!(textures.generation(group[2]), 1);
}

// ============================================================================
// Attachment Tests
// ============================================================================

#[test]
fn tracker_reads_attachment_state_from_managed_textures() {
    let (device, mut textures) = setup();
    let color = textures
        .allocate(
            &device,
            AllocTextureRequest::render_target("hdr", 256, 256, wgpu::TextureFormat::Rgba16Float),
        )
        .unwrap();
    let depth = textures
        .allocate(
            &device,
            AllocTextureRequest::render_target("depth", 256, 256, wgpu::TextureFormat::Depth32Float),
        )
        .unwrap();

    let mut tracker = DrawTracker::new();
    tracker
        .push_color_texture(&textures, color)
        .set_depth_texture(&textures, depth);

    assert_eq!(tracker.color_targets().len(), 1);
    assert_eq!(tracker.color_targets()[0].format, wgpu::TextureFormat::Rgba16Float);
    assert_eq!(
        tracker.depth_target().map(|d| d.format),
        Some(wgpu::TextureFormat::Depth32Float)
    );
    assert_eq!(tracker.sample_count(), 1);
}
