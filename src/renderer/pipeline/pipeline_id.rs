//! Strongly-typed pipeline handles.
//!
//! Thin `Copy` wrappers around a `u32` index into the [`PipelineCache`]
//! storage arrays. Ids are invalidated by [`PipelineCache::clear`].
//!
//! [`PipelineCache`]: super::cache::PipelineCache
//! [`PipelineCache::clear`]: super::cache::PipelineCache::clear

/// Handle to a cached render pipeline and its depth state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PsoId(pub(crate) u32);

impl PsoId {
    /// Raw index into the pipeline storage array.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a cached compute pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePsoId(pub(crate) u32);

impl ComputePsoId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
