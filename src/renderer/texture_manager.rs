//! Render Texture Manager
//!
//! Name-indexed, handle-addressed textures, mostly render targets that follow
//! the screen size. Handles stay valid across resizes: a resize swaps the
//! native texture behind the handle and bumps its generation.
//!
//! Passes that sample several targets of the same size resize them with
//! [`TextureManager::resize_textures`], which is all-or-nothing. A failed
//! group resize leaves every texture at its previous size and returns
//! [`SirMetalError::ResizeFailed`]; the caller skips its pass for that frame.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::{Result, SirMetalError};
use crate::handle::TextureHandle;
use crate::renderer::device::{GpuDevice, TextureDescriptor};
use crate::renderer::pipeline::tracker::AttachmentDesc;

/// Description of a texture to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocTextureRequest {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub dimension: wgpu::TextureDimension,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

impl AllocTextureRequest {
    /// Single-mip, single-sample 2D render target that can also be sampled.
    #[must_use]
    pub fn render_target(
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        }
    }

    fn descriptor(&self) -> TextureDescriptor<'_> {
        TextureDescriptor {
            label: &self.name,
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
            mip_level_count: self.mip_level_count,
            sample_count: self.sample_count,
            dimension: self.dimension,
            format: self.format,
            usage: self.usage,
        }
    }
}

struct TextureEntry<T> {
    request: AllocTextureRequest,
    texture: T,
    /// Bumped every time the native texture is replaced.
    generation: u64,
}

pub struct TextureManager<D: GpuDevice> {
    textures: Vec<TextureEntry<D::Texture>>,
    name_to_handle: FxHashMap<String, TextureHandle>,
}

impl<D: GpuDevice> Default for TextureManager<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: GpuDevice> TextureManager<D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            textures: Vec::new(),
            name_to_handle: FxHashMap::default(),
        }
    }

    /// Creates a texture and registers it under `request.name`.
    ///
    /// Allocating a name that already exists replaces the texture behind the
    /// existing handle.
    pub fn allocate(&mut self, device: &D, request: AllocTextureRequest) -> Result<TextureHandle> {
        let texture = device.create_texture(&request.descriptor())?;

        if let Some(&handle) = self.name_to_handle.get(&request.name) {
            let entry = &mut self.textures[handle.index()];
            entry.texture = texture;
            entry.request = request;
            entry.generation += 1;
            return Ok(handle);
        }

        let handle = TextureHandle::new(self.textures.len() as u32);
        log::debug!(
            "Allocated texture '{}' {}x{} {:?}",
            request.name,
            request.width,
            request.height,
            request.format
        );
        self.name_to_handle.insert(request.name.clone(), handle);
        self.textures.push(TextureEntry {
            request,
            texture,
            generation: 0,
        });
        Ok(handle)
    }

    /// Resizes one texture. Returns `Ok(false)` when it already has the
    /// requested size.
    pub fn resize_texture(
        &mut self,
        device: &D,
        handle: TextureHandle,
        width: u32,
        height: u32,
    ) -> Result<bool> {
        self.resize_textures(device, &[handle], width, height)
    }

    /// Resizes a group of textures to the same size, atomically.
    ///
    /// Every replacement is created before any is committed; if one fails the
    /// group keeps its old textures and [`SirMetalError::ResizeFailed`] is
    /// returned. Returns `Ok(false)` when nothing needed resizing.
    pub fn resize_textures(
        &mut self,
        device: &D,
        handles: &[TextureHandle],
        width: u32,
        height: u32,
    ) -> Result<bool> {
        let stale: SmallVec<[TextureHandle; 4]> = handles
            .iter()
            .copied()
            .filter(|&h| {
                let request = &self.entry(h).request;
                request.width != width || request.height != height
            })
            .collect();
        if stale.is_empty() {
            return Ok(false);
        }

        let mut replacements: SmallVec<[(TextureHandle, AllocTextureRequest, D::Texture); 4]> =
            SmallVec::with_capacity(stale.len());
        for &handle in &stale {
            let mut request = self.entry(handle).request.clone();
            request.width = width;
            request.height = height;

            match device.create_texture(&request.descriptor()) {
                Ok(texture) => replacements.push((handle, request, texture)),
                Err(e) => {
                    let names = handles
                        .iter()
                        .map(|&h| self.entry(h).request.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    log::error!("Resize to {width}x{height} failed, keeping old textures: {e}");
                    return Err(SirMetalError::ResizeFailed {
                        names,
                        details: e.to_string(),
                    });
                }
            }
        }

        for (handle, request, texture) in replacements {
            let entry = &mut self.textures[handle.index()];
            entry.request = request;
            entry.texture = texture;
            entry.generation += 1;
        }
        log::debug!("Resized {} texture(s) to {width}x{height}", stale.len());
        Ok(true)
    }

    #[must_use]
    pub fn get_handle_from_name(&self, name: &str) -> Option<TextureHandle> {
        self.name_to_handle.get(name).copied()
    }

    /// The native texture. **Panics** if the handle was not minted here.
    #[must_use]
    pub fn get_native(&self, handle: TextureHandle) -> &D::Texture {
        &self.entry(handle).texture
    }

    #[must_use]
    pub fn get_format(&self, handle: TextureHandle) -> wgpu::TextureFormat {
        self.entry(handle).request.format
    }

    #[must_use]
    pub fn get_usage(&self, handle: TextureHandle) -> wgpu::TextureUsages {
        self.entry(handle).request.usage
    }

    /// `(width, height)` of the current native texture.
    #[must_use]
    pub fn get_size(&self, handle: TextureHandle) -> (u32, u32) {
        let request = &self.entry(handle).request;
        (request.width, request.height)
    }

    /// How many times the native texture behind `handle` has been replaced.
    #[must_use]
    pub fn generation(&self, handle: TextureHandle) -> u64 {
        self.entry(handle).generation
    }

    #[must_use]
    pub fn attachment_desc(&self, handle: TextureHandle) -> AttachmentDesc {
        let request = &self.entry(handle).request;
        AttachmentDesc {
            format: request.format,
            usage: request.usage,
            sample_count: request.sample_count,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    fn entry(&self, handle: TextureHandle) -> &TextureEntry<D::Texture> {
        let index = handle.index();
        assert!(
            index < self.textures.len(),
            "texture handle {:#010x} was not minted by this manager",
            handle.raw()
        );
        &self.textures[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::HeadlessDevice;

    #[test]
    fn same_size_resize_is_a_no_op() {
        let device = HeadlessDevice::new();
        let mut textures = TextureManager::new();
        let handle = textures
            .allocate(
                &device,
                AllocTextureRequest::render_target("color", 64, 64, wgpu::TextureFormat::Rgba8Unorm),
            )
            .unwrap();

        let id = textures.get_native(handle).id;
        assert!(!textures.resize_texture(&device, handle, 64, 64).unwrap());
        assert_eq!(textures.get_native(handle).id, id);
        assert_eq!(textures.generation(handle), 0);
    }

    #[test]
    fn reallocating_a_name_keeps_the_handle() {
        let device = HeadlessDevice::new();
        let mut textures = TextureManager::new();
        let request = AllocTextureRequest::render_target("depth", 32, 32, wgpu::TextureFormat::Depth32Float);

        let a = textures.allocate(&device, request.clone()).unwrap();
        let b = textures.allocate(&device, request).unwrap();
        assert_eq!(a, b);
        assert_eq!(textures.len(), 1);
        assert_eq!(textures.generation(a), 1);
    }
}
