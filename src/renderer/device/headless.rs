//! Headless Device
//!
//! A CPU-memory implementation of [`GpuDevice`]. Buffers are plain byte
//! vectors, textures and pipelines are metadata records with unique ids.
//!
//! Failure injection:
//! - [`HeadlessDevice::set_memory_budget`]: buffer creation beyond the budget
//!   fails with `OutOfMemory`.
//! - [`HeadlessDevice::set_max_texture_dimension`]: larger textures fail to
//!   create, which drives resize failures.
//! - [`HeadlessDevice::set_fail_pipeline_compilation`]: every pipeline build
//!   fails until cleared.
//!
//! Completion callbacks run immediately by default. With
//! [`HeadlessDevice::set_auto_complete`] turned off they are queued until
//! [`HeadlessDevice::complete_submitted_work`] or a waiting
//! [`GpuDevice::poll`] runs them, which models a GPU lagging behind the CPU.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{
    BufferDescriptor, ComputePipelineDescriptor, DeviceLimits, GpuDevice, RenderPipelineDescriptor,
    TextureDescriptor, WorkDoneCallback,
};
use crate::errors::{Result, SirMetalError};
use crate::renderer::pipeline::shader_manager::EntryPoints;

/// Host bytes of a buffer. Dropping the last clone returns its size to the
/// device budget.
#[derive(Debug)]
struct BufferStorage {
    bytes: Mutex<Vec<u8>>,
    device_allocated: Arc<AtomicU64>,
}

impl Drop for BufferStorage {
    fn drop(&mut self) {
        let size = self.bytes.get_mut().len() as u64;
        self.device_allocated.fetch_sub(size, Ordering::Relaxed);
    }
}

/// Buffer backed by host memory.
#[derive(Debug, Clone)]
pub struct HeadlessBuffer {
    pub id: u64,
    pub label: String,
    pub usage: wgpu::BufferUsages,
    data: Arc<BufferStorage>,
}

impl HeadlessBuffer {
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.bytes.lock().len() as u64
    }

    /// Copies `len` bytes starting at `offset` out of the buffer.
    #[must_use]
    pub fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        let data = self.data.bytes.lock();
        let start = offset as usize;
        data[start..start + len].to_vec()
    }
}

/// Texture metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessTexture {
    pub id: u64,
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
    pub sample_count: u32,
}

/// Shader module record.
#[derive(Debug, Clone)]
pub struct HeadlessShaderModule {
    pub id: u64,
    pub label: String,
    pub source: String,
    pub entry_points: EntryPoints,
}

/// Render pipeline record capturing the state it was compiled with.
#[derive(Debug, Clone)]
pub struct HeadlessRenderPipeline {
    pub id: u64,
    pub label: String,
    pub color_formats: Vec<Option<wgpu::TextureFormat>>,
    pub blend: Vec<Option<wgpu::BlendState>>,
    pub depth_stencil: Option<wgpu::DepthStencilState>,
}

/// Compute pipeline record.
#[derive(Debug, Clone)]
pub struct HeadlessComputePipeline {
    pub id: u64,
    pub label: String,
}

/// CPU-memory device.
pub struct HeadlessDevice {
    limits: DeviceLimits,
    next_id: AtomicU64,
    /// Shared with every live buffer so that drops release their bytes.
    allocated_bytes: Arc<AtomicU64>,
    memory_budget: AtomicU64,
    max_texture_dimension: AtomicU64,
    fail_pipelines: AtomicBool,
    auto_complete: AtomicBool,
    pipelines_compiled: AtomicU64,
    pending_callbacks: Mutex<Vec<WorkDoneCallback>>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    #[must_use]
    pub fn new() -> Self {
        let limits = DeviceLimits {
            max_buffer_size: 256 * 1024 * 1024,
            max_texture_dimension_2d: 8192,
        };
        Self {
            limits,
            next_id: AtomicU64::new(1),
            allocated_bytes: Arc::new(AtomicU64::new(0)),
            memory_budget: AtomicU64::new(u64::MAX),
            max_texture_dimension: AtomicU64::new(u64::from(limits.max_texture_dimension_2d)),
            fail_pipelines: AtomicBool::new(false),
            auto_complete: AtomicBool::new(true),
            pipelines_compiled: AtomicU64::new(0),
            pending_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Total bytes the device may hand out across all buffers.
    pub fn set_memory_budget(&self, bytes: u64) {
        self.memory_budget.store(bytes, Ordering::Relaxed);
    }

    /// Textures wider or taller than this fail to create.
    pub fn set_max_texture_dimension(&self, dimension: u32) {
        self.max_texture_dimension
            .store(u64::from(dimension), Ordering::Relaxed);
    }

    pub fn set_fail_pipeline_compilation(&self, fail: bool) {
        self.fail_pipelines.store(fail, Ordering::Relaxed);
    }

    pub fn set_auto_complete(&self, enabled: bool) {
        self.auto_complete.store(enabled, Ordering::Relaxed);
    }

    /// Runs every queued completion callback, oldest first.
    pub fn complete_submitted_work(&self) {
        let callbacks = std::mem::take(&mut *self.pending_callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }

    #[must_use]
    pub fn pending_work(&self) -> usize {
        self.pending_callbacks.lock().len()
    }

    /// Bytes held by buffers that are still alive.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Number of successful render and compute pipeline compilations.
    #[must_use]
    pub fn pipelines_compiled(&self) -> u64 {
        self.pipelines_compiled.load(Ordering::Relaxed)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn check_compilation(
        &self,
        label: &str,
        module: &HeadlessShaderModule,
        entry_point: &str,
    ) -> Result<()> {
        if self.fail_pipelines.load(Ordering::Relaxed) {
            return Err(SirMetalError::PipelineCompilation {
                label: label.to_string(),
                details: "compilation failure injected".to_string(),
            });
        }
        if !module.entry_points.contains(entry_point) {
            return Err(SirMetalError::PipelineCompilation {
                label: label.to_string(),
                details: format!("entry point '{entry_point}' not declared by '{}'", module.label),
            });
        }
        Ok(())
    }
}

impl GpuDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type ShaderModule = HeadlessShaderModule;
    type RenderPipeline = HeadlessRenderPipeline;
    type ComputePipeline = HeadlessComputePipeline;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&self, desc: &BufferDescriptor<'_>) -> Result<HeadlessBuffer> {
        let budget = self.memory_budget.load(Ordering::Relaxed);
        let allocated = self.allocated_bytes.load(Ordering::Relaxed);
        if desc.size > self.limits.max_buffer_size || allocated.saturating_add(desc.size) > budget
        {
            return Err(SirMetalError::OutOfMemory {
                label: desc.label.to_string(),
                requested: desc.size,
            });
        }
        self.allocated_bytes.fetch_add(desc.size, Ordering::Relaxed);

        Ok(HeadlessBuffer {
            id: self.next_id(),
            label: desc.label.to_string(),
            usage: desc.usage,
            data: Arc::new(BufferStorage {
                bytes: Mutex::new(vec![0; desc.size as usize]),
                device_allocated: Arc::clone(&self.allocated_bytes),
            }),
        })
    }

    fn write_buffer(&self, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut contents = buffer.data.bytes.lock();
        let end = offset + data.len() as u64;
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || end > contents.len() as u64 {
            return Err(SirMetalError::BufferWrite {
                offset,
                details: format!(
                    "{} bytes do not fit aligned into '{}' ({} bytes)",
                    data.len(),
                    buffer.label,
                    contents.len()
                ),
            });
        }
        contents[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn create_texture(&self, desc: &TextureDescriptor<'_>) -> Result<HeadlessTexture> {
        let max = self.max_texture_dimension.load(Ordering::Relaxed);
        if desc.width == 0 || desc.height == 0 {
            return Err(SirMetalError::TextureCreation {
                name: desc.label.to_string(),
                details: "zero sized texture".to_string(),
            });
        }
        if u64::from(desc.width) > max || u64::from(desc.height) > max {
            return Err(SirMetalError::TextureCreation {
                name: desc.label.to_string(),
                details: format!(
                    "{}x{} exceeds the maximum dimension {max}",
                    desc.width, desc.height
                ),
            });
        }

        Ok(HeadlessTexture {
            id: self.next_id(),
            label: desc.label.to_string(),
            width: desc.width,
            height: desc.height,
            format: desc.format,
            usage: desc.usage,
            sample_count: desc.sample_count,
        })
    }

    fn create_shader_module(&self, label: &str, source: &str) -> Result<HeadlessShaderModule> {
        Ok(HeadlessShaderModule {
            id: self.next_id(),
            label: label.to_string(),
            source: source.to_string(),
            entry_points: EntryPoints::scan(source),
        })
    }

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor<'_, HeadlessShaderModule>,
    ) -> Result<HeadlessRenderPipeline> {
        self.check_compilation(desc.label, desc.vertex.module, desc.vertex.entry_point)?;
        if let Some(fragment) = &desc.fragment {
            self.check_compilation(desc.label, fragment.module, fragment.entry_point)?;
        }
        self.pipelines_compiled.fetch_add(1, Ordering::Relaxed);

        Ok(HeadlessRenderPipeline {
            id: self.next_id(),
            label: desc.label.to_string(),
            color_formats: desc
                .color_targets
                .iter()
                .map(|t| t.as_ref().map(|t| t.format))
                .collect(),
            blend: desc
                .color_targets
                .iter()
                .map(|t| t.as_ref().and_then(|t| t.blend))
                .collect(),
            depth_stencil: desc.depth_stencil.clone(),
        })
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor<'_, HeadlessShaderModule>,
    ) -> Result<HeadlessComputePipeline> {
        self.check_compilation(desc.label, desc.stage.module, desc.stage.entry_point)?;
        self.pipelines_compiled.fetch_add(1, Ordering::Relaxed);

        Ok(HeadlessComputePipeline {
            id: self.next_id(),
            label: desc.label.to_string(),
        })
    }

    fn on_submitted_work_done(&self, callback: WorkDoneCallback) {
        if self.auto_complete.load(Ordering::Relaxed) {
            callback();
        } else {
            self.pending_callbacks.lock().push(callback);
        }
    }

    /// A non-blocking poll finds the simulated GPU still busy. Waiting
    /// finishes all queued work.
    fn poll(&self, wait: bool) {
        if wait {
            self.complete_submitted_work();
        }
    }
}
