//! Engine Settings
//!
//! Configuration for the engine context and the memory subsystems it owns.
//! Settings are plain data: they can be built in code, or loaded from a JSON
//! file where every missing field falls back to its default.
//!
//! ```rust,ignore
//! use sirmetal::settings::EngineSettings;
//!
//! // Defaults: 3 frames in flight, 16 MiB pages, {256, 1024, 4096} constant buffer classes
//! let settings = EngineSettings::default();
//!
//! // Or from disk
//! let settings = EngineSettings::from_json_file("engine_config.json")?;
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{Result, SirMetalError};

/// Hardware alignment of constant buffer offsets, in bytes.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

// ---------------------------------------------------------------------------
// WindowSettings
// ---------------------------------------------------------------------------

/// Initial presentation surface description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "SirMetal".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// AllocatorSettings
// ---------------------------------------------------------------------------

/// Configuration of the paged GPU memory allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AllocatorSettings {
    /// Size of one page (one real device allocation). Requests larger than a
    /// page get a dedicated page of their own size.
    pub page_size: u64,
    /// Every sub-allocation size and offset is rounded to this many bytes.
    /// Must be a power of two no smaller than [`CONSTANT_BUFFER_ALIGNMENT`].
    pub granularity: u64,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            page_size: 16 * 1024 * 1024,
            granularity: CONSTANT_BUFFER_ALIGNMENT,
        }
    }
}

// ---------------------------------------------------------------------------
// ConstantBufferSettings
// ---------------------------------------------------------------------------

/// Configuration of the pooled constant buffer manager.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConstantBufferSettings {
    /// Bytes reserved from the GPU allocator for each pool.
    pub pool_size: u64,
    /// Slot sizes of the initial size classes. Sorted and aligned at startup.
    pub size_classes: Vec<u64>,
}

impl Default for ConstantBufferSettings {
    fn default() -> Self {
        Self {
            pool_size: 64 * 1024,
            size_classes: vec![256, 1024, 4096],
        }
    }
}

// ---------------------------------------------------------------------------
// EngineSettings
// ---------------------------------------------------------------------------

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// How many frames the CPU may record ahead of the GPU. Buffered constant
    /// buffers are replicated this many times.
    pub max_frames_in_flight: u32,
    /// Root directory for shader and asset lookups.
    pub data_source_path: PathBuf,
    pub window: WindowSettings,
    pub gpu_allocator: AllocatorSettings,
    pub constant_buffers: ConstantBufferSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 3,
            data_source_path: PathBuf::from("."),
            window: WindowSettings::default(),
            gpu_allocator: AllocatorSettings::default(),
            constant_buffers: ConstantBufferSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Parses settings from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading engine configuration from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Rejects configurations the memory subsystems cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.max_frames_in_flight == 0 {
            return Err(SirMetalError::InvalidConfig(
                "max_frames_in_flight must be at least 1".to_string(),
            ));
        }

        let granularity = self.gpu_allocator.granularity;
        if granularity == 0 || !granularity.is_power_of_two() {
            return Err(SirMetalError::InvalidConfig(format!(
                "allocator granularity {granularity} is not a power of two"
            )));
        }
        if granularity < CONSTANT_BUFFER_ALIGNMENT {
            return Err(SirMetalError::InvalidConfig(format!(
                "allocator granularity {granularity} is below the constant buffer alignment {CONSTANT_BUFFER_ALIGNMENT}"
            )));
        }
        if self.gpu_allocator.page_size < granularity {
            return Err(SirMetalError::InvalidConfig(format!(
                "page size {} is smaller than the granularity {granularity}",
                self.gpu_allocator.page_size
            )));
        }

        let largest_class = self
            .constant_buffers
            .size_classes
            .iter()
            .copied()
            .max()
            .unwrap_or(CONSTANT_BUFFER_ALIGNMENT);
        if self.constant_buffers.pool_size < largest_class {
            return Err(SirMetalError::InvalidConfig(format!(
                "constant buffer pool size {} cannot hold the {largest_class} byte size class",
                self.constant_buffers.pool_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_frames_in_flight, 3);
        assert_eq!(settings.constant_buffers.size_classes, vec![256, 1024, 4096]);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let settings = EngineSettings::from_json_str(
            r#"{ "data_source_path": "/data", "window": { "width": 800 } }"#,
        )
        .unwrap();

        assert_eq!(settings.data_source_path, PathBuf::from("/data"));
        assert_eq!(settings.window.width, 800);
        assert_eq!(settings.window.height, 720);
        assert_eq!(settings.gpu_allocator, AllocatorSettings::default());
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let err = EngineSettings::from_json_str(r#"{ "max_frames_in_flight": 0 }"#);
        assert!(matches!(err, Err(SirMetalError::InvalidConfig(_))));
    }

    #[test]
    fn non_power_of_two_granularity_is_rejected() {
        let err = EngineSettings::from_json_str(r#"{ "gpu_allocator": { "granularity": 300 } }"#);
        assert!(matches!(err, Err(SirMetalError::InvalidConfig(_))));
    }

    #[test]
    fn granularity_below_constant_alignment_is_rejected() {
        let err = EngineSettings::from_json_str(r#"{ "gpu_allocator": { "granularity": 64 } }"#);
        assert!(matches!(err, Err(SirMetalError::InvalidConfig(_))));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = EngineSettings::from_json_str("{ not json");
        assert!(matches!(err, Err(SirMetalError::ConfigError(_))));
    }
}
