//! GPU Device Abstraction
//!
//! The memory and pipeline subsystems talk to the GPU only through the
//! [`GpuDevice`] trait. Two backends are provided:
//!
//! - [`WgpuDevice`]: the production backend built on `wgpu`.
//! - [`HeadlessDevice`]: a CPU-memory backend for tests and offline tools. It
//!   keeps buffer contents readable and can inject allocation, resize and
//!   compilation failures.
//!
//! Descriptor types reuse `wgpu`'s plain data enums (formats, usages, blend
//! and depth state) so that no translation layer is needed for the production
//! path.

pub mod headless;
pub mod wgpu_device;

pub use headless::HeadlessDevice;
pub use wgpu_device::WgpuDevice;

use crate::errors::Result;

bitflags::bitflags! {
    /// Placement flags for GPU memory allocator requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        /// Device-local memory the host never writes to.
        const GPU_ONLY = 1 << 0;
    }
}

impl BufferFlags {
    /// Buffer usages a page created for these flags must support.
    #[must_use]
    pub fn page_usages(self) -> wgpu::BufferUsages {
        let common = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::VERTEX
            | wgpu::BufferUsages::INDEX
            | wgpu::BufferUsages::COPY_SRC;
        if self.contains(Self::GPU_ONLY) {
            common | wgpu::BufferUsages::INDIRECT
        } else {
            common | wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST
        }
    }

    #[inline]
    #[must_use]
    pub fn is_cpu_visible(self) -> bool {
        !self.contains(Self::GPU_ONLY)
    }
}

/// Parameters for one real device buffer.
#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

/// Parameters for one device texture.
#[derive(Debug, Clone)]
pub struct TextureDescriptor<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub dimension: wgpu::TextureDimension,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

/// A shader module plus the entry point to run.
#[derive(Debug)]
pub struct ShaderStage<'a, M> {
    pub module: &'a M,
    pub entry_point: &'a str,
}

impl<M> Clone for ShaderStage<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for ShaderStage<'_, M> {}

/// Everything a backend needs to compile a render pipeline.
///
/// Vertex data is pulled from bound buffers by the shaders, so no vertex
/// buffer layouts are described here.
#[derive(Debug)]
pub struct RenderPipelineDescriptor<'a, M> {
    pub label: &'a str,
    pub vertex: ShaderStage<'a, M>,
    pub fragment: Option<ShaderStage<'a, M>>,
    pub color_targets: &'a [Option<wgpu::ColorTargetState>],
    pub depth_stencil: Option<wgpu::DepthStencilState>,
    pub sample_count: u32,
}

/// Everything a backend needs to compile a compute pipeline.
#[derive(Debug)]
pub struct ComputePipelineDescriptor<'a, M> {
    pub label: &'a str,
    pub stage: ShaderStage<'a, M>,
}

/// Device limits the managers consult before issuing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_buffer_size: u64,
    pub max_texture_dimension_2d: u32,
}

/// Callback invoked once the GPU has finished all work submitted so far.
pub type WorkDoneCallback = Box<dyn FnOnce() + Send + 'static>;

/// The backend seam used by every resource manager.
///
/// All creation methods are fallible: exhaustion and compilation failures are
/// reported as errors and never panic.
pub trait GpuDevice {
    type Buffer;
    type Texture;
    type ShaderModule;
    type RenderPipeline;
    type ComputePipeline;

    fn limits(&self) -> DeviceLimits;

    fn create_buffer(&self, desc: &BufferDescriptor<'_>) -> Result<Self::Buffer>;

    /// Copies `data` into `buffer` at byte `offset`. The write becomes visible
    /// to GPU work submitted afterwards. `offset` must be a multiple of
    /// [`wgpu::COPY_BUFFER_ALIGNMENT`].
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;

    fn create_texture(&self, desc: &TextureDescriptor<'_>) -> Result<Self::Texture>;

    /// Compiles WGSL source into a module.
    fn create_shader_module(&self, label: &str, source: &str) -> Result<Self::ShaderModule>;

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor<'_, Self::ShaderModule>,
    ) -> Result<Self::RenderPipeline>;

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor<'_, Self::ShaderModule>,
    ) -> Result<Self::ComputePipeline>;

    /// Registers `callback` to run when the work submitted so far completes.
    ///
    /// Callbacks only fire while the device is polled, see [`poll`](Self::poll).
    fn on_submitted_work_done(&self, callback: WorkDoneCallback);

    /// Processes finished work and runs its completion callbacks. With `wait`
    /// set, blocks until everything submitted so far has completed.
    fn poll(&self, wait: bool);
}
