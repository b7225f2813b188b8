//! Pipeline State Cache
//!
//! Central owner of every compiled render and compute pipeline. Pipelines are
//! stored in contiguous `Vec`s and addressed through lightweight [`PsoId`] /
//! [`ComputePsoId`] handles; lookups go through a map keyed by the full
//! [`PsoKey`].
//!
//! # Lifecycle of a key
//!
//! ```text
//! MISS ──> BUILDING ──> CACHED
//!              │
//!              └── failure: logged, nothing stored, next lookup retries
//! ```
//!
//! Steady state cost is one hash lookup; no device calls happen on a hit.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::{Result, SirMetalError};
use crate::renderer::device::{ComputePipelineDescriptor, GpuDevice, RenderPipelineDescriptor};
use crate::renderer::pipeline::material::Material;
use crate::renderer::pipeline::pipeline_id::{ComputePsoId, PsoId};
use crate::renderer::pipeline::pipeline_key::{ComputePsoKey, PsoKey};
use crate::renderer::pipeline::shader_manager::ShaderManager;
use crate::renderer::pipeline::tracker::DrawTracker;

/// A compiled render pipeline and the depth state it must be drawn with.
#[derive(Debug)]
pub struct CachedPso<P> {
    pub pipeline: P,
    /// `Some` only when the pipeline was compiled against a depth target.
    pub depth_state: Option<wgpu::DepthStencilState>,
}

/// Central pipeline storage and deduplication cache.
pub struct PipelineCache<D: GpuDevice> {
    // ---- Storage (contiguous, indexed by Id) ----
    render_pipelines: Vec<CachedPso<D::RenderPipeline>>,
    compute_pipelines: Vec<D::ComputePipeline>,

    // ---- Lookups (full key → Id) ----
    render_lookup: FxHashMap<PsoKey, PsoId>,
    compute_lookup: FxHashMap<ComputePsoKey, ComputePsoId>,

    compile_count: u64,
}

impl<D: GpuDevice> Default for PipelineCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: GpuDevice> PipelineCache<D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            render_pipelines: Vec::with_capacity(64),
            compute_pipelines: Vec::with_capacity(8),
            render_lookup: FxHashMap::default(),
            compute_lookup: FxHashMap::default(),
            compile_count: 0,
        }
    }

    // ── Render Pipelines ─────────────────────────────────────────────────────

    /// Looks up, or compiles and caches, the pipeline for drawing `material`
    /// into the targets bound on `tracker`.
    pub fn get_pso(
        &mut self,
        device: &D,
        shaders: &ShaderManager<D>,
        tracker: &DrawTracker,
        material: &Material,
    ) -> Result<&CachedPso<D::RenderPipeline>> {
        let id = self.get_pso_id(device, shaders, tracker, material)?;
        Ok(self.get(id))
    }

    /// Same as [`get_pso`](Self::get_pso) but returns the id.
    pub fn get_pso_id(
        &mut self,
        device: &D,
        shaders: &ShaderManager<D>,
        tracker: &DrawTracker,
        material: &Material,
    ) -> Result<PsoId> {
        let key = PsoKey::new(tracker, material);
        if let Some(&id) = self.render_lookup.get(&key) {
            return Ok(id);
        }

        let cached = Self::compile_render(device, shaders, &key).inspect_err(|e| {
            log::error!("PSO compilation failed for '{}': {e}", material.shader_name);
        })?;

        self.compile_count += 1;
        let id = PsoId(self.render_pipelines.len() as u32);
        self.render_pipelines.push(cached);
        self.render_lookup.insert(key, id);
        Ok(id)
    }

    /// Retrieve a cached render pipeline. **Panics** if the id is invalid.
    #[inline]
    #[must_use]
    pub fn get(&self, id: PsoId) -> &CachedPso<D::RenderPipeline> {
        &self.render_pipelines[id.index()]
    }

    // ── Compute Pipelines ────────────────────────────────────────────────────

    /// Looks up, or compiles and caches, the compute pipeline of the kernel
    /// declared by library `shader_name`.
    pub fn get_compute_pso(
        &mut self,
        device: &D,
        shaders: &ShaderManager<D>,
        shader_name: &str,
    ) -> Result<&D::ComputePipeline> {
        let id = self.get_compute_pso_id(device, shaders, shader_name)?;
        Ok(self.get_compute(id))
    }

    pub fn get_compute_pso_id(
        &mut self,
        device: &D,
        shaders: &ShaderManager<D>,
        shader_name: &str,
    ) -> Result<ComputePsoId> {
        let key = ComputePsoKey {
            shader_name: shader_name.to_string(),
        };
        if let Some(&id) = self.compute_lookup.get(&key) {
            return Ok(id);
        }

        let pipeline = Self::compile_compute(device, shaders, shader_name)
            .inspect_err(|e| log::error!("Compute PSO compilation failed for '{shader_name}': {e}"))?;

        self.compile_count += 1;
        let id = ComputePsoId(self.compute_pipelines.len() as u32);
        self.compute_pipelines.push(pipeline);
        self.compute_lookup.insert(key, id);
        Ok(id)
    }

    /// Retrieve a cached compute pipeline. **Panics** if the id is invalid.
    #[inline]
    #[must_use]
    pub fn get_compute(&self, id: ComputePsoId) -> &D::ComputePipeline {
        &self.compute_pipelines[id.index()]
    }

    // ── Cache Invalidation ───────────────────────────────────────────────────

    /// Drops every cached pipeline. Previously returned ids become invalid.
    pub fn clear(&mut self) {
        self.render_pipelines.clear();
        self.compute_pipelines.clear();
        self.render_lookup.clear();
        self.compute_lookup.clear();
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    /// Number of cached render and compute pipelines.
    #[must_use]
    pub fn pso_count(&self) -> usize {
        self.render_pipelines.len() + self.compute_pipelines.len()
    }

    /// Successful compilations since creation. Not reset by [`clear`](Self::clear).
    #[must_use]
    pub fn compile_count(&self) -> u64 {
        self.compile_count
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn compile_render(
        device: &D,
        shaders: &ShaderManager<D>,
        key: &PsoKey,
    ) -> Result<CachedPso<D::RenderPipeline>> {
        let library = shaders
            .get_handle_from_name(&key.shader_name)
            .ok_or_else(|| SirMetalError::ShaderNotFound(key.shader_name.clone()))?;

        let vertex = shaders.get_vertex_function(library)?;
        // Depth-only passes may use a library without a fragment stage.
        let fragment = if key.color_targets.is_empty()
            && shaders.entry_points(library).fragment.is_none()
        {
            None
        } else {
            Some(shaders.get_fragment_function(library)?)
        };

        let color_targets: SmallVec<[Option<wgpu::ColorTargetState>; 4]> = key
            .color_targets
            .iter()
            .map(|target| Some(target.to_wgpu()))
            .collect();
        let depth_state = key.depth_target.map(|depth| depth.depth_state());

        let label = format!("PSO {}", key.shader_name);
        log::debug!(
            "Compiling {label}: {} colour target(s), depth {:?}",
            color_targets.len(),
            key.depth_target.map(|d| d.format)
        );

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: &label,
            vertex,
            fragment,
            color_targets: &color_targets,
            depth_stencil: depth_state.clone(),
            sample_count: key.sample_count,
        })?;

        Ok(CachedPso {
            pipeline,
            depth_state,
        })
    }

    fn compile_compute(
        device: &D,
        shaders: &ShaderManager<D>,
        shader_name: &str,
    ) -> Result<D::ComputePipeline> {
        let library = shaders
            .get_handle_from_name(shader_name)
            .ok_or_else(|| SirMetalError::ShaderNotFound(shader_name.to_string()))?;
        let stage = shaders.get_kernel_function(library)?;
        let label = format!("Compute PSO {shader_name}");

        device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: &label,
            stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::HeadlessDevice;
    use crate::renderer::pipeline::tracker::AttachmentDesc;

    const DEPTH_ONLY_WGSL: &str = "@vertex fn vs_shadow() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }";

    #[test]
    fn depth_only_library_compiles_without_fragment() {
        let device = HeadlessDevice::new();
        let mut shaders = ShaderManager::<HeadlessDevice>::new(".");
        shaders.load_shader_source(&device, "shadow", DEPTH_ONLY_WGSL).unwrap();

        let mut tracker = DrawTracker::new();
        tracker.set_depth(Some(AttachmentDesc::render_target(
            wgpu::TextureFormat::Depth32Float,
        )));

        let mut cache = PipelineCache::new();
        let pso = cache
            .get_pso(&device, &shaders, &tracker, &Material::new("shadow"))
            .unwrap();
        let depth = pso.depth_state.as_ref().unwrap();
        assert_eq!(depth.depth_write_enabled, Some(true));
        assert_eq!(depth.depth_compare, Some(wgpu::CompareFunction::Less));
        assert!(pso.pipeline.color_formats.is_empty());
    }

    #[test]
    fn unknown_shader_is_not_cached() {
        let device = HeadlessDevice::new();
        let shaders = ShaderManager::<HeadlessDevice>::new(".");
        let mut cache = PipelineCache::new();

        let result = cache.get_pso(&device, &shaders, &DrawTracker::new(), &Material::new("missing"));
        assert!(matches!(result, Err(SirMetalError::ShaderNotFound(_))));
        assert_eq!(cache.pso_count(), 0);
    }
}
