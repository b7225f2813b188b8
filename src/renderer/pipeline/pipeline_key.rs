//! Strongly-typed pipeline cache keys.
//!
//! `wgpu` descriptor types (`ColorTargetState`, `BlendState`, …) do not
//! implement `Hash` / `Eq`. This module defines *mirror* types that extract the
//! fields relevant for pipeline identity and derive the correct trait impls.
//!
//! A [`PsoKey`] captures every input that changes the compiled pipeline:
//! shader library, blend state, and the format / usage / sample count of every
//! bound attachment. Leaving any of these out would hand back a pipeline
//! compiled for a different render target layout.

use smallvec::SmallVec;

use crate::renderer::pipeline::material::Material;
use crate::renderer::pipeline::tracker::{AttachmentDesc, DrawTracker};

// ─── Hashable Mirror Types ────────────────────────────────────────────────────

/// Hashable mirror of `wgpu::BlendComponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponentKey {
    pub src_factor: wgpu::BlendFactor,
    pub dst_factor: wgpu::BlendFactor,
    pub operation: wgpu::BlendOperation,
}

impl From<wgpu::BlendComponent> for BlendComponentKey {
    fn from(b: wgpu::BlendComponent) -> Self {
        Self {
            src_factor: b.src_factor,
            dst_factor: b.dst_factor,
            operation: b.operation,
        }
    }
}

impl From<BlendComponentKey> for wgpu::BlendComponent {
    fn from(k: BlendComponentKey) -> Self {
        Self {
            src_factor: k.src_factor,
            dst_factor: k.dst_factor,
            operation: k.operation,
        }
    }
}

/// Hashable mirror of `wgpu::BlendState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateKey {
    pub color: BlendComponentKey,
    pub alpha: BlendComponentKey,
}

impl From<wgpu::BlendState> for BlendStateKey {
    fn from(b: wgpu::BlendState) -> Self {
        Self {
            color: b.color.into(),
            alpha: b.alpha.into(),
        }
    }
}

impl From<BlendStateKey> for wgpu::BlendState {
    fn from(k: BlendStateKey) -> Self {
        Self {
            color: k.color.into(),
            alpha: k.alpha.into(),
        }
    }
}

/// One colour attachment as seen by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTargetKey {
    pub format: wgpu::TextureFormat,
    pub usage: u32, // wgpu::TextureUsages bits
    pub sample_count: u32,
    pub blend: Option<BlendStateKey>,
}

impl ColorTargetKey {
    #[must_use]
    pub fn to_wgpu(&self) -> wgpu::ColorTargetState {
        wgpu::ColorTargetState {
            format: self.format,
            blend: self.blend.map(Into::into),
            write_mask: wgpu::ColorWrites::ALL,
        }
    }
}

/// The depth attachment as seen by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthTargetKey {
    pub format: wgpu::TextureFormat,
    pub usage: u32,
    pub sample_count: u32,
}

impl From<&AttachmentDesc> for DepthTargetKey {
    fn from(a: &AttachmentDesc) -> Self {
        Self {
            format: a.format,
            usage: a.usage.bits(),
            sample_count: a.sample_count,
        }
    }
}

impl DepthTargetKey {
    /// Depth state compiled alongside every pipeline with a depth target:
    /// writes on, closer fragments win.
    #[must_use]
    pub fn depth_state(&self) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format: self.format,
            depth_write_enabled: Some(true),
            depth_compare: Some(wgpu::CompareFunction::Less),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }
}

// ─── Pipeline Keys ────────────────────────────────────────────────────────────

/// Cache key for render pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PsoKey {
    pub shader_name: String,
    pub color_targets: SmallVec<[ColorTargetKey; 4]>,
    pub depth_target: Option<DepthTargetKey>,
    pub sample_count: u32,
}

impl PsoKey {
    /// Builds the key for drawing `material` into the targets bound on
    /// `tracker`. The material's blend state applies to every colour target.
    #[must_use]
    pub fn new(tracker: &DrawTracker, material: &Material) -> Self {
        let blend = material.blending.to_blend_state().map(BlendStateKey::from);
        Self {
            shader_name: material.shader_name.clone(),
            color_targets: tracker
                .color_targets()
                .iter()
                .map(|a| ColorTargetKey {
                    format: a.format,
                    usage: a.usage.bits(),
                    sample_count: a.sample_count,
                    blend,
                })
                .collect(),
            depth_target: tracker.depth_target().map(DepthTargetKey::from),
            sample_count: tracker.sample_count(),
        }
    }
}

/// Cache key for compute pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputePsoKey {
    pub shader_name: String,
}
