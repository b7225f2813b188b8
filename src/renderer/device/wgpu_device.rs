//! wgpu Device
//!
//! The production [`GpuDevice`] backend. [`WgpuDevice`] owns the
//! `wgpu::Device` / `wgpu::Queue` pair; surfaces and presentation stay with
//! the windowing layer that created them.
//!
//! `wgpu` reports validation problems through the device's uncaptured-error
//! handler. To keep failures on the synchronous `Result` path the descriptors
//! are checked up front (buffer sizes against device limits, entry points
//! against the module's declared stages, attachment formats against their
//! role) and every call that can still fail runs inside a validation error
//! scope that is popped before returning.

use std::borrow::Cow;

use super::{
    BufferDescriptor, ComputePipelineDescriptor, DeviceLimits, GpuDevice, RenderPipelineDescriptor,
    TextureDescriptor, WorkDoneCallback,
};
use crate::errors::{Result, SirMetalError};
use crate::renderer::pipeline::shader_manager::EntryPoints;

/// A compiled WGSL module together with the entry points it declares.
#[derive(Debug)]
pub struct WgpuShaderModule {
    pub module: wgpu::ShaderModule,
    pub label: String,
    pub entry_points: EntryPoints,
}

/// Core wgpu handles used for resource creation and uploads.
pub struct WgpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl WgpuDevice {
    /// Wraps a device created elsewhere (usually by the windowing layer).
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    /// Acquires an adapter and device without a presentation surface.
    pub async fn request_headless(power_preference: wgpu::PowerPreference) -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| SirMetalError::AdapterRequestFailed(e.to_string()))?;

        let info = adapter.get_info();
        log::info!("Using adapter '{}' ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("SirMetal Device"),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        Ok(Self { device, queue })
    }

    /// Blocking variant of [`request_headless`](Self::request_headless).
    pub fn request_headless_blocking(power_preference: wgpu::PowerPreference) -> Result<Self> {
        pollster::block_on(Self::request_headless(power_preference))
    }

    /// Runs `create` inside a validation error scope and returns the captured
    /// error, if any.
    fn validated<T>(&self, create: impl FnOnce() -> T) -> std::result::Result<T, wgpu::Error> {
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create();
        match pollster::block_on(scope.pop()) {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }

    fn compilation_error(label: &str, error: &wgpu::Error) -> SirMetalError {
        SirMetalError::PipelineCompilation {
            label: label.to_string(),
            details: error.to_string(),
        }
    }

    fn check_entry_point(
        label: &str,
        module: &WgpuShaderModule,
        entry_point: &str,
    ) -> Result<()> {
        if module.entry_points.contains(entry_point) {
            Ok(())
        } else {
            Err(SirMetalError::PipelineCompilation {
                label: label.to_string(),
                details: format!(
                    "module '{}' does not declare entry point '{entry_point}'",
                    module.label
                ),
            })
        }
    }
}

impl GpuDevice for WgpuDevice {
    type Buffer = wgpu::Buffer;
    type Texture = wgpu::Texture;
    type ShaderModule = WgpuShaderModule;
    type RenderPipeline = wgpu::RenderPipeline;
    type ComputePipeline = wgpu::ComputePipeline;

    fn limits(&self) -> DeviceLimits {
        let limits = self.device.limits();
        DeviceLimits {
            max_buffer_size: limits.max_buffer_size,
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
        }
    }

    fn create_buffer(&self, desc: &BufferDescriptor<'_>) -> Result<wgpu::Buffer> {
        if desc.size > self.device.limits().max_buffer_size {
            return Err(SirMetalError::OutOfMemory {
                label: desc.label.to_string(),
                requested: desc.size,
            });
        }

        log::debug!("Creating buffer '{}' ({} bytes)", desc.label, desc.size);
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: desc.size,
            usage: desc.usage,
            mapped_at_creation: false,
        }))
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(SirMetalError::BufferWrite {
                offset,
                details: format!(
                    "offset is not a multiple of {} bytes",
                    wgpu::COPY_BUFFER_ALIGNMENT
                ),
            });
        }

        let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
        self.validated(|| {
            if data.len() % align == 0 {
                self.queue.write_buffer(buffer, offset, data);
            } else {
                // Copies must be a multiple of 4 bytes; allocations are 256-byte
                // aligned so the padding always stays inside the range.
                let mut padded = data.to_vec();
                padded.resize(data.len().next_multiple_of(align), 0);
                self.queue.write_buffer(buffer, offset, &padded);
            }
        })
        .map_err(|e| SirMetalError::BufferWrite {
            offset,
            details: e.to_string(),
        })
    }

    fn create_texture(&self, desc: &TextureDescriptor<'_>) -> Result<wgpu::Texture> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(SirMetalError::TextureCreation {
                name: desc.label.to_string(),
                details: format!(
                    "{}x{} is outside the supported range 1..={max}",
                    desc.width, desc.height
                ),
            });
        }

        self.validated(|| {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(desc.label),
                size: wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: desc.depth_or_array_layers,
                },
                mip_level_count: desc.mip_level_count,
                sample_count: desc.sample_count,
                dimension: desc.dimension,
                format: desc.format,
                usage: desc.usage,
                view_formats: &[],
            })
        })
        .map_err(|e| SirMetalError::TextureCreation {
            name: desc.label.to_string(),
            details: e.to_string(),
        })
    }

    fn create_shader_module(&self, label: &str, source: &str) -> Result<WgpuShaderModule> {
        let module = self
            .validated(|| {
                self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
                })
            })
            .map_err(|e| Self::compilation_error(label, &e))?;

        Ok(WgpuShaderModule {
            module,
            label: label.to_string(),
            entry_points: EntryPoints::scan(source),
        })
    }

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor<'_, WgpuShaderModule>,
    ) -> Result<wgpu::RenderPipeline> {
        Self::check_entry_point(desc.label, desc.vertex.module, desc.vertex.entry_point)?;
        if let Some(fragment) = &desc.fragment {
            Self::check_entry_point(desc.label, fragment.module, fragment.entry_point)?;
        }

        for target in desc.color_targets.iter().flatten() {
            if target.format.is_depth_stencil_format() {
                return Err(SirMetalError::PipelineCompilation {
                    label: desc.label.to_string(),
                    details: format!("{:?} cannot be used as a color target", target.format),
                });
            }
        }
        if let Some(depth) = &desc.depth_stencil
            && !depth.format.is_depth_stencil_format()
        {
            return Err(SirMetalError::PipelineCompilation {
                label: desc.label.to_string(),
                details: format!("{:?} is not a depth format", depth.format),
            });
        }

        let fragment = desc.fragment.map(|stage| wgpu::FragmentState {
            module: &stage.module.module,
            entry_point: Some(stage.entry_point),
            targets: desc.color_targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        self.validated(|| {
            self.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(desc.label),
                    layout: None,
                    vertex: wgpu::VertexState {
                        module: &desc.vertex.module.module,
                        entry_point: Some(desc.vertex.entry_point),
                        buffers: &[],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment,
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: desc.depth_stencil.clone(),
                    multisample: wgpu::MultisampleState {
                        count: desc.sample_count,
                        mask: !0,
                        alpha_to_coverage_enabled: false,
                    },
                    multiview_mask: None,
                    cache: None,
                })
        })
        .map_err(|e| Self::compilation_error(desc.label, &e))
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor<'_, WgpuShaderModule>,
    ) -> Result<wgpu::ComputePipeline> {
        Self::check_entry_point(desc.label, desc.stage.module, desc.stage.entry_point)?;

        self.validated(|| {
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(desc.label),
                    layout: None,
                    module: &desc.stage.module.module,
                    entry_point: Some(desc.stage.entry_point),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
        })
        .map_err(|e| Self::compilation_error(desc.label, &e))
    }

    fn on_submitted_work_done(&self, callback: WorkDoneCallback) {
        self.queue.on_submitted_work_done(callback);
    }

    fn poll(&self, wait: bool) {
        let poll_type = if wait {
            wgpu::PollType::wait_indefinitely()
        } else {
            wgpu::PollType::Poll
        };
        if let Err(e) = self.device.poll(poll_type) {
            log::error!("Device poll failed: {e}");
        }
    }
}
