//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`SirMetalError`] covers the recoverable failure modes:
//! - GPU device acquisition failures
//! - Resource exhaustion reported by the device
//! - Oversized or empty allocation requests, rejected host writes
//! - Shader lookup and pipeline compilation failures
//! - Render target creation and resize failures
//! - Configuration loading errors
//!
//! Misuse of handles (wrong type tag, out-of-range index, writing more bytes
//! than a constant buffer was allocated with) is a programming error and
//! panics instead of producing a variant here.
//!
//! # Usage
//!
//! All fallible APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, SirMetalError>`.
//!
//! ```rust,ignore
//! use sirmetal::errors::Result;
//!
//! fn setup(ctx: &mut EngineContext<WgpuDevice>) -> Result<()> {
//!     let camera = ctx.allocate_constant_buffer(64, ConstantBufferFlags::BUFFERED)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the engine.
#[derive(Error, Debug)]
pub enum SirMetalError {
    // ========================================================================
    // Device Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    // ========================================================================
    // Memory Errors
    // ========================================================================
    /// The device rejected a buffer allocation.
    #[error("Out of GPU memory while allocating '{label}' ({requested} bytes)")]
    OutOfMemory {
        /// Debug label of the rejected allocation
        label: String,
        /// Size of the rejected allocation in bytes
        requested: u64,
    },

    /// A request exceeds the largest allocation the pool configuration allows.
    #[error("Allocation of {requested} bytes exceeds the maximum of {max} bytes")]
    AllocationTooLarge {
        /// Requested size in bytes
        requested: u64,
        /// Largest size the allocator can serve
        max: u64,
    },

    /// A host write targeted a GPU-only allocation.
    #[error("Buffer allocation is not CPU visible")]
    NotCpuVisible,

    /// A host write does not fit inside its allocation.
    #[error("Write of {len} bytes at offset {offset} overflows an allocation of {size} bytes")]
    WriteOutOfBounds {
        /// Offset of the write inside the allocation
        offset: u64,
        /// Length of the write
        len: u64,
        /// Size of the allocation
        size: u64,
    },

    /// A zero-byte buffer was requested; GPU bindings must cover at least one byte.
    #[error("Zero-sized allocation requested")]
    ZeroSizedAllocation,

    /// A host write was rejected before or by the device.
    #[error("Buffer write at offset {offset} failed: {details}")]
    BufferWrite {
        /// Offset of the write inside the allocation
        offset: u64,
        /// Reason the write was rejected
        details: String,
    },

    /// The handle refers to an allocation that has been freed.
    #[error("Handle {0:#010x} refers to a freed allocation")]
    StaleHandle(u32),

    /// Every handle slot of the allocator is held by a live allocation.
    #[error("All {max} allocation slots are in use")]
    HandlesExhausted {
        /// Number of simultaneously live allocations supported
        max: usize,
    },

    // ========================================================================
    // Shader & Pipeline Errors
    // ========================================================================
    /// No shader library is registered under this name.
    #[error("Shader library not found: {0}")]
    ShaderNotFound(String),

    /// The shader library does not expose the requested stage.
    #[error("Shader library '{shader}' has no {stage} entry point")]
    MissingEntryPoint {
        /// Shader library name
        shader: String,
        /// Stage that was requested (`vertex`, `fragment`, `compute`)
        stage: &'static str,
    },

    /// The backend failed to build a pipeline state object.
    #[error("Pipeline compilation failed for '{label}': {details}")]
    PipelineCompilation {
        /// Pipeline label
        label: String,
        /// Backend diagnostic
        details: String,
    },

    // ========================================================================
    // Texture Errors
    // ========================================================================
    /// The backend failed to create a texture.
    #[error("Texture creation failed for '{name}': {details}")]
    TextureCreation {
        /// Texture name
        name: String,
        /// Backend diagnostic
        details: String,
    },

    /// A group resize failed; none of the textures were replaced.
    #[error("Could not resize textures [{names}]: {details}")]
    ResizeFailed {
        /// Comma separated names of the textures in the group
        names: String,
        /// Diagnostic of the first failure
        details: String,
    },

    // ========================================================================
    // I/O & Configuration Errors
    // ========================================================================
    /// File I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration file parsing error.
    #[error("Config parse error: {0}")]
    ConfigError(#[from] serde_json::Error),

    /// Configuration values are inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Alias for `Result<T, SirMetalError>`.
pub type Result<T> = std::result::Result<T, SirMetalError>;
