//! Engine Context
//!
//! [`EngineContext`] owns the device and every resource manager. It is created
//! once at startup, passed by reference to whatever records frames, and torn
//! down with [`EngineContext::shutdown`]. There is no global engine state.
//!
//! # Frame loop
//!
//! ```rust,ignore
//! use sirmetal::{EngineContext, EngineSettings, WgpuDevice};
//!
//! let device = WgpuDevice::request_headless_blocking(wgpu::PowerPreference::HighPerformance)?;
//! let mut ctx = EngineContext::new(device, EngineSettings::default())?;
//! let camera = ctx.allocate_constant_buffer(64, ConstantBufferFlags::BUFFERED)?;
//!
//! loop {
//!     let frame = ctx.begin_frame(); // blocks while N frames are in flight
//!     ctx.update_constant_buffer(camera, bytemuck::bytes_of(&camera_data))?;
//!     let bind = ctx.constant_buffer_bind_info(camera)?;
//!     // ... encode and submit ...
//!     ctx.end_frame();
//! }
//! ```
//!
//! The managers are public fields so that a pass can borrow several of them
//! at once; the forwarding methods cover the common single-manager calls.

use smallvec::SmallVec;

use crate::errors::Result;
use crate::handle::{BufferHandle, ConstantBufferHandle, LibraryHandle, TextureHandle};
use crate::renderer::device::{BufferFlags, GpuDevice};
use crate::renderer::frame::{FrameInfo, FrameLimiter};
use crate::renderer::memory::{
    BindInfo, ConstantBufferFlags, ConstantBufferManager, GpuMemoryAllocator,
};
use crate::renderer::pipeline::{CachedPso, DrawTracker, Material, PipelineCache, ShaderManager};
use crate::renderer::texture_manager::{AllocTextureRequest, TextureManager};
use crate::settings::EngineSettings;

/// Explicit engine state shared by all rendering code.
pub struct EngineContext<D: GpuDevice> {
    pub device: D,
    pub gpu_allocator: GpuMemoryAllocator<D>,
    pub constant_buffers: ConstantBufferManager,
    pub shaders: ShaderManager<D>,
    pub textures: TextureManager<D>,
    pub pipelines: PipelineCache<D>,

    settings: EngineSettings,
    frame: FrameInfo,
    frame_open: bool,
    limiter: FrameLimiter,
    screen_size: (u32, u32),
    /// Texture groups that follow the screen size, each resized atomically.
    screen_textures: Vec<SmallVec<[TextureHandle; 4]>>,
}

impl<D: GpuDevice> EngineContext<D> {
    /// Validates `settings` and builds every manager. No GPU memory is
    /// allocated yet.
    pub fn new(device: D, settings: EngineSettings) -> Result<Self> {
        settings.validate()?;

        let frames = settings.max_frames_in_flight;
        log::info!(
            "Engine context: {frames} frames in flight, {}x{} screen",
            settings.window.width,
            settings.window.height
        );

        Ok(Self {
            gpu_allocator: GpuMemoryAllocator::new(settings.gpu_allocator),
            constant_buffers: ConstantBufferManager::new(&settings.constant_buffers, frames),
            shaders: ShaderManager::new(settings.data_source_path.clone()),
            textures: TextureManager::new(),
            pipelines: PipelineCache::new(),
            device,
            frame: FrameInfo::new(frames),
            frame_open: false,
            limiter: FrameLimiter::new(frames),
            screen_size: (settings.window.width, settings.window.height),
            screen_textures: Vec::new(),
            settings,
        })
    }

    // ── Frame Lifecycle ──────────────────────────────────────────────────────

    /// Waits until fewer than `max_frames_in_flight` frames are on the GPU and
    /// opens the next frame.
    ///
    /// Completion callbacks only run while the device is polled, so when no
    /// slot is free the device is waited on before blocking.
    ///
    /// **Panics** if the previous frame was not ended.
    pub fn begin_frame(&mut self) -> FrameInfo {
        assert!(!self.frame_open, "begin_frame called twice without end_frame");
        if !self.limiter.try_acquire() {
            log::trace!("Frame {} waiting for the GPU", self.frame.index);
            self.device.poll(true);
            self.limiter.acquire();
        }
        self.frame_open = true;
        self.frame
    }

    /// Non-blocking [`begin_frame`](Self::begin_frame): `None` while the
    /// in-flight limit is reached after polling the device once.
    pub fn try_begin_frame(&mut self) -> Option<FrameInfo> {
        assert!(!self.frame_open, "begin_frame called twice without end_frame");
        let acquired = self.limiter.try_acquire() || {
            self.device.poll(false);
            self.limiter.try_acquire()
        };
        if !acquired {
            return None;
        }
        self.frame_open = true;
        Some(self.frame)
    }

    /// Closes the frame once its work is submitted. The frame slot is given
    /// back when the device reports the submitted work complete.
    pub fn end_frame(&mut self) {
        assert!(self.frame_open, "end_frame called without begin_frame");
        let limiter = self.limiter.clone();
        self.device
            .on_submitted_work_done(Box::new(move || limiter.release()));
        self.frame.advance();
        self.frame_open = false;
    }

    #[must_use]
    pub fn frame(&self) -> FrameInfo {
        self.frame
    }

    #[must_use]
    pub fn frames_in_flight(&self) -> u32 {
        self.limiter.in_flight()
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ── Screen ───────────────────────────────────────────────────────────────

    #[must_use]
    pub fn screen_size(&self) -> (u32, u32) {
        self.screen_size
    }

    /// Registers textures that must always match the screen size. They are
    /// resized together by [`set_screen_size`](Self::set_screen_size).
    pub fn track_screen_textures(&mut self, handles: &[TextureHandle]) {
        self.screen_textures.push(handles.iter().copied().collect());
    }

    /// Resizes every tracked texture group to `width` x `height`.
    ///
    /// Groups are independent: a failing group keeps its previous textures and
    /// the first failure is returned so the passes using it can be skipped.
    /// The screen size only changes once every group matches it, so calling
    /// again with the same size retries the groups that failed.
    pub fn set_screen_size(&mut self, width: u32, height: u32) -> Result<()> {
        if self.screen_size != (width, height) {
            log::debug!("Screen resized to {width}x{height}");
        }

        let mut first_error = None;
        for group in &self.screen_textures {
            if let Err(e) = self
                .textures
                .resize_textures(&self.device, group, width, height)
            {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                self.screen_size = (width, height);
                Ok(())
            }
        }
    }

    // ── Resource Forwarding ──────────────────────────────────────────────────

    pub fn allocate_buffer(&mut self, size: u64, name: &str, flags: BufferFlags) -> Result<BufferHandle> {
        self.gpu_allocator.allocate(&self.device, size, name, flags)
    }

    pub fn allocate_constant_buffer(
        &mut self,
        size: u64,
        flags: ConstantBufferFlags,
    ) -> Result<ConstantBufferHandle> {
        self.constant_buffers
            .allocate(&self.device, &mut self.gpu_allocator, size, flags)
    }

    /// Writes `data` into the slot of the current frame.
    pub fn update_constant_buffer(&self, handle: ConstantBufferHandle, data: &[u8]) -> Result<()> {
        self.constant_buffers.update(
            &self.device,
            &self.gpu_allocator,
            handle,
            self.frame.index,
            data,
        )
    }

    pub fn update_constant_buffer_value<T: bytemuck::Pod>(
        &self,
        handle: ConstantBufferHandle,
        value: &T,
    ) -> Result<()> {
        self.update_constant_buffer(handle, bytemuck::bytes_of(value))
    }

    /// Bind info of the current frame's slot.
    pub fn constant_buffer_bind_info(&self, handle: ConstantBufferHandle) -> Result<BindInfo<'_, D::Buffer>> {
        self.constant_buffers
            .get_bind_info(&self.gpu_allocator, handle, self.frame.index)
    }

    pub fn allocate_texture(&mut self, request: AllocTextureRequest) -> Result<TextureHandle> {
        self.textures.allocate(&self.device, request)
    }

    /// Loads a WGSL file relative to the data source path. Reloading an
    /// existing library drops every cached pipeline.
    pub fn load_shader(&mut self, path: &str) -> Result<LibraryHandle> {
        let before = self.shaders.library_count();
        let handle = self.shaders.load_shader(&self.device, path)?;
        self.invalidate_pipelines_on_reload(before);
        Ok(handle)
    }

    /// Registers WGSL source under `name`. Reloading an existing library
    /// drops every cached pipeline.
    pub fn load_shader_source(&mut self, name: &str, source: &str) -> Result<LibraryHandle> {
        let before = self.shaders.library_count();
        let handle = self.shaders.load_shader_source(&self.device, name, source)?;
        self.invalidate_pipelines_on_reload(before);
        Ok(handle)
    }

    pub fn get_pso(
        &mut self,
        tracker: &DrawTracker,
        material: &Material,
    ) -> Result<&CachedPso<D::RenderPipeline>> {
        self.pipelines
            .get_pso(&self.device, &self.shaders, tracker, material)
    }

    pub fn get_compute_pso(&mut self, shader_name: &str) -> Result<&D::ComputePipeline> {
        self.pipelines
            .get_compute_pso(&self.device, &self.shaders, shader_name)
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Releases every cached pipeline and GPU page. Consumes the context.
    pub fn shutdown(mut self) {
        log::info!(
            "Engine shutdown after {} frames ({} pipelines, {} pages)",
            self.frame.index,
            self.pipelines.pso_count(),
            self.gpu_allocator.page_count()
        );
        self.device.poll(true);
        self.pipelines.clear();
        self.gpu_allocator.clear();
    }

    /// A load that did not add a library replaced an existing one.
    fn invalidate_pipelines_on_reload(&mut self, libraries_before: usize) {
        if self.shaders.library_count() == libraries_before && self.pipelines.pso_count() > 0 {
            log::info!("Shader library reloaded, dropping cached pipelines");
            self.pipelines.clear();
        }
    }
}
