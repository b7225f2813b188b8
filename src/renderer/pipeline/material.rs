//! Materials as seen by the pipeline cache: a shader library name plus the
//! fixed-function blend configuration applied to every colour target.

use wgpu::{BlendComponent, BlendFactor, BlendOperation, BlendState};

/// Per-channel blend configuration.
///
/// When `enabled` is false the remaining fields are ignored and blending is
/// turned off on every colour attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlphaBlendingState {
    pub enabled: bool,
    pub rgb_operation: BlendOperation,
    pub alpha_operation: BlendOperation,
    pub source_rgb_factor: BlendFactor,
    pub source_alpha_factor: BlendFactor,
    pub destination_rgb_factor: BlendFactor,
    pub destination_alpha_factor: BlendFactor,
}

impl Default for AlphaBlendingState {
    fn default() -> Self {
        Self::disabled()
    }
}

impl AlphaBlendingState {
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            rgb_operation: BlendOperation::Add,
            alpha_operation: BlendOperation::Add,
            source_rgb_factor: BlendFactor::One,
            source_alpha_factor: BlendFactor::One,
            destination_rgb_factor: BlendFactor::Zero,
            destination_alpha_factor: BlendFactor::Zero,
        }
    }

    /// Classic `src * a + dst * (1 - a)` transparency.
    #[must_use]
    pub const fn alpha_blending() -> Self {
        Self {
            enabled: true,
            rgb_operation: BlendOperation::Add,
            alpha_operation: BlendOperation::Add,
            source_rgb_factor: BlendFactor::SrcAlpha,
            source_alpha_factor: BlendFactor::One,
            destination_rgb_factor: BlendFactor::OneMinusSrcAlpha,
            destination_alpha_factor: BlendFactor::OneMinusSrcAlpha,
        }
    }

    /// `src + dst`, used for accumulation passes.
    #[must_use]
    pub const fn additive() -> Self {
        Self {
            enabled: true,
            rgb_operation: BlendOperation::Add,
            alpha_operation: BlendOperation::Add,
            source_rgb_factor: BlendFactor::One,
            source_alpha_factor: BlendFactor::One,
            destination_rgb_factor: BlendFactor::One,
            destination_alpha_factor: BlendFactor::One,
        }
    }

    /// The wgpu blend state, or `None` when blending is disabled.
    #[must_use]
    pub fn to_blend_state(&self) -> Option<BlendState> {
        self.enabled.then(|| BlendState {
            color: BlendComponent {
                src_factor: self.source_rgb_factor,
                dst_factor: self.destination_rgb_factor,
                operation: self.rgb_operation,
            },
            alpha: BlendComponent {
                src_factor: self.source_alpha_factor,
                dst_factor: self.destination_alpha_factor,
                operation: self.alpha_operation,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Material {
    /// Name of the shader library, as registered in the shader manager.
    pub shader_name: String,
    pub blending: AlphaBlendingState,
}

impl Material {
    #[must_use]
    pub fn new(shader_name: impl Into<String>) -> Self {
        Self {
            shader_name: shader_name.into(),
            blending: AlphaBlendingState::disabled(),
        }
    }

    #[must_use]
    pub fn with_blending(mut self, blending: AlphaBlendingState) -> Self {
        self.blending = blending;
        self
    }
}
