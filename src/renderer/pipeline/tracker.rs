//! Attachment signature of the pass a draw is recorded into.

use smallvec::SmallVec;

use crate::handle::TextureHandle;
use crate::renderer::device::GpuDevice;
use crate::renderer::texture_manager::TextureManager;

/// Maximum number of simultaneously bound colour targets.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// What a pipeline needs to know about one render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDesc {
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
    pub sample_count: u32,
}

impl AttachmentDesc {
    /// Single-sampled render attachment, e.g. a swapchain image.
    #[must_use]
    pub fn render_target(format: wgpu::TextureFormat) -> Self {
        Self {
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            sample_count: 1,
        }
    }
}

/// Colour targets (in slot order) and an optional depth target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrawTracker {
    color_targets: SmallVec<[AttachmentDesc; 4]>,
    depth_target: Option<AttachmentDesc>,
}

impl DrawTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the next colour slot.
    ///
    /// # Panics
    ///
    /// Panics if all [`MAX_COLOR_ATTACHMENTS`] slots are taken.
    pub fn push_color(&mut self, desc: AttachmentDesc) -> &mut Self {
        assert!(
            self.color_targets.len() < MAX_COLOR_ATTACHMENTS,
            "at most {MAX_COLOR_ATTACHMENTS} colour attachments can be bound"
        );
        self.color_targets.push(desc);
        self
    }

    /// Binds a managed texture to the next colour slot.
    pub fn push_color_texture<D: GpuDevice>(
        &mut self,
        textures: &TextureManager<D>,
        handle: TextureHandle,
    ) -> &mut Self {
        self.push_color(textures.attachment_desc(handle))
    }

    pub fn set_depth(&mut self, desc: Option<AttachmentDesc>) -> &mut Self {
        self.depth_target = desc;
        self
    }

    pub fn set_depth_texture<D: GpuDevice>(
        &mut self,
        textures: &TextureManager<D>,
        handle: TextureHandle,
    ) -> &mut Self {
        self.set_depth(Some(textures.attachment_desc(handle)))
    }

    #[must_use]
    pub fn color_targets(&self) -> &[AttachmentDesc] {
        &self.color_targets
    }

    #[must_use]
    pub fn depth_target(&self) -> Option<&AttachmentDesc> {
        self.depth_target.as_ref()
    }

    /// Sample count of the pass, taken from the first bound attachment.
    #[must_use]
    pub fn sample_count(&self) -> u32 {
        self.color_targets
            .first()
            .or(self.depth_target.as_ref())
            .map_or(1, |a| a.sample_count)
    }

    /// Unbinds everything.
    pub fn reset(&mut self) {
        self.color_targets.clear();
        self.depth_target = None;
    }
}
