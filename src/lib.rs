#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! # SirMetal
//!
//! GPU resource and pipeline management for a small real-time renderer:
//!
//! - **Handles**: typed 32-bit references into manager tables ([`handle`])
//! - **GPU memory**: paged sub-allocation and pooled constant buffers with
//!   per-frame rotation ([`renderer::memory`])
//! - **Pipelines**: shader libraries and a compile-once pipeline state cache
//!   ([`renderer::pipeline`])
//! - **Render targets**: screen-sized textures with atomic group resize
//!   ([`renderer::texture_manager`])
//! - **Engine context** and a layer based application shell ([`engine`],
//!   [`app`])
//!
//! The production backend is `wgpu` ([`WgpuDevice`]); [`HeadlessDevice`]
//! keeps everything in host memory for tests and offline tools.

pub mod app;
pub mod engine;
pub mod errors;
pub mod handle;
pub mod renderer;
pub mod settings;

pub use app::{Application, Event, Layer, LayerStack};
pub use engine::EngineContext;
pub use errors::{Result, SirMetalError};
pub use handle::{
    BufferHandle, ConstantBufferHandle, HandleType, LibraryHandle, MeshHandle, TextureHandle,
};
pub use renderer::device::{BufferFlags, GpuDevice, HeadlessDevice, WgpuDevice};
pub use renderer::frame::{FrameInfo, FrameLimiter};
pub use renderer::memory::{BindInfo, ConstantBufferFlags, ConstantBufferManager, GpuMemoryAllocator};
pub use renderer::pipeline::{
    AlphaBlendingState, AttachmentDesc, CachedPso, DrawTracker, Material, PipelineCache,
    ShaderManager,
};
pub use renderer::texture_manager::{AllocTextureRequest, TextureManager};
pub use settings::EngineSettings;
