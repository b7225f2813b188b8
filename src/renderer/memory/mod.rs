//! GPU Memory
//!
//! - [`gpu_allocator`]: paged sub-allocation of real device buffers
//! - [`linear`]: bump allocation inside one range
//! - [`constant_buffer`]: size-classed, optionally frame-rotated uniform slots

pub mod constant_buffer;
pub mod gpu_allocator;
pub mod linear;

pub use constant_buffer::{BindInfo, ConstantBufferFlags, ConstantBufferManager};
pub use gpu_allocator::{AllocationInfo, GpuMemoryAllocator, MAX_LIVE_ALLOCATIONS};
pub use linear::{BufferRange, LinearAllocator};
