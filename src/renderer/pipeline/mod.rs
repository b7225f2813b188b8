//! Pipeline state management.
//!
//! - [`material`]: shader name + blend configuration
//! - [`tracker`]: attachment signature of the current pass
//! - [`pipeline_key`]: hashable keys built from the two above
//! - [`shader_manager`]: name-indexed WGSL libraries
//! - [`cache`]: compile-once pipeline storage

pub mod cache;
pub mod material;
pub mod pipeline_id;
pub mod pipeline_key;
pub mod shader_manager;
pub mod tracker;

pub use cache::{CachedPso, PipelineCache};
pub use material::{AlphaBlendingState, Material};
pub use pipeline_id::{ComputePsoId, PsoId};
pub use pipeline_key::{ComputePsoKey, PsoKey};
pub use shader_manager::{EntryPoints, ShaderManager};
pub use tracker::{AttachmentDesc, DrawTracker, MAX_COLOR_ATTACHMENTS};
