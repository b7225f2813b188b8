//! GPU resource and pipeline management.
//!
//! - [`device`]: backend seam (`wgpu` or headless)
//! - [`memory`]: paged GPU allocator and constant buffer pools
//! - [`pipeline`]: shader libraries and the pipeline state cache
//! - [`texture_manager`]: screen-sized render targets
//! - [`frame`]: in-flight frame limiting

pub mod device;
pub mod frame;
pub mod memory;
pub mod pipeline;
pub mod texture_manager;

pub use device::{BufferFlags, GpuDevice, HeadlessDevice, WgpuDevice};
pub use frame::{FrameInfo, FrameLimiter};
pub use memory::{BindInfo, ConstantBufferFlags, ConstantBufferManager, GpuMemoryAllocator};
pub use pipeline::{AlphaBlendingState, DrawTracker, Material, PipelineCache, ShaderManager};
pub use texture_manager::{AllocTextureRequest, TextureManager};
