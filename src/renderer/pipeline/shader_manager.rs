//! Shader Library Manager
//!
//! Compiles WGSL libraries and indexes them by name. A library is one WGSL
//! module; its vertex, fragment and compute entry points are discovered from
//! the `@vertex`, `@fragment` and `@compute` attributes in the source, so
//! pipelines only need the library name to find their functions.
//!
//! Libraries loaded from disk are named after the file stem:
//! `shaders/jumpFloodMask.wgsl` registers as `jumpFloodMask`.

use std::io;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::{Result, SirMetalError};
use crate::handle::LibraryHandle;
use crate::renderer::device::{GpuDevice, ShaderStage};

// ─── Entry Point Discovery ────────────────────────────────────────────────────

/// Entry points declared by a WGSL module.
///
/// The first function of each stage is the one handed out by the
/// `get_*_function` lookups; every declared entry point is kept for
/// validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPoints {
    pub vertex: Option<String>,
    pub fragment: Option<String>,
    pub compute: Option<String>,
    all: SmallVec<[String; 4]>,
}

impl EntryPoints {
    /// Scans WGSL source for stage attributes. Commented-out code is ignored.
    #[must_use]
    pub fn scan(source: &str) -> Self {
        let mut found = Self::default();
        let source = &Self::strip_comments(source);

        for (attribute, _) in source.match_indices('@') {
            let rest = &source[attribute + 1..];
            let stage = ["vertex", "fragment", "compute"]
                .into_iter()
                .find(|stage| {
                    rest.starts_with(stage)
                        && !rest[stage.len()..]
                            .starts_with(|c: char| c.is_alphanumeric() || c == '_')
                });
            let Some(stage) = stage else {
                continue;
            };
            let Some(name) = Self::next_function_name(&rest[stage.len()..]) else {
                continue;
            };

            let slot = match stage {
                "vertex" => &mut found.vertex,
                "fragment" => &mut found.fragment,
                _ => &mut found.compute,
            };
            if slot.is_none() {
                *slot = Some(name.to_string());
            }
            found.all.push(name.to_string());
        }

        found
    }

    /// Whether `name` is declared as an entry point of any stage.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.all.iter().any(|e| e == name)
    }

    /// Blanks out line and (nested) block comments, keeping line breaks.
    fn strip_comments(source: &str) -> String {
        let mut out = String::with_capacity(source.len());
        let mut chars = source.chars().peekable();
        let mut depth = 0usize;
        let mut in_line = false;

        while let Some(c) = chars.next() {
            if in_line {
                if c == '\n' {
                    in_line = false;
                    out.push(c);
                }
                continue;
            }
            match (c, chars.peek().copied()) {
                ('/', Some('/')) if depth == 0 => {
                    chars.next();
                    in_line = true;
                }
                ('/', Some('*')) => {
                    chars.next();
                    depth += 1;
                    out.push(' ');
                }
                ('*', Some('/')) if depth > 0 => {
                    chars.next();
                    depth -= 1;
                    out.push(' ');
                }
                _ if depth > 0 => {
                    if c == '\n' {
                        out.push(c);
                    }
                }
                _ => out.push(c),
            }
        }
        out
    }

    fn next_function_name(after_attribute: &str) -> Option<&str> {
        let mut search = after_attribute;
        loop {
            let at = search.find("fn")?;
            let preceded_ok = at == 0
                || !search[..at]
                    .ends_with(|c: char| c.is_alphanumeric() || c == '_');
            let tail = &search[at + 2..];
            if preceded_ok && tail.starts_with(char::is_whitespace) {
                let tail = tail.trim_start();
                let end = tail
                    .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .unwrap_or(tail.len());
                return (end > 0).then(|| &tail[..end]);
            }
            search = tail;
        }
    }
}

// ─── ShaderManager ────────────────────────────────────────────────────────────

struct ShaderLibrary<M> {
    name: String,
    path: Option<PathBuf>,
    module: M,
    entry_points: EntryPoints,
}

/// Name-indexed shader library storage.
pub struct ShaderManager<D: GpuDevice> {
    root: PathBuf,
    libraries: Vec<ShaderLibrary<D::ShaderModule>>,
    name_to_handle: FxHashMap<String, LibraryHandle>,
}

impl<D: GpuDevice> ShaderManager<D> {
    /// Relative paths given to [`load_shader`](Self::load_shader) resolve
    /// against `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            libraries: Vec::new(),
            name_to_handle: FxHashMap::default(),
        }
    }

    /// Loads and compiles a WGSL file. The library is named after the file
    /// stem.
    pub fn load_shader(&mut self, device: &D, path: impl AsRef<Path>) -> Result<LibraryHandle> {
        let path = self.root.join(path);
        self.load_file(device, path)
    }

    fn load_file(&mut self, device: &D, path: PathBuf) -> Result<LibraryHandle> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| SirMetalError::ShaderNotFound(path.display().to_string()))?
            .to_string();

        let source = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SirMetalError::ShaderNotFound(path.display().to_string()),
            _ => SirMetalError::IoError(e),
        })?;

        let handle = self.load_shader_source(device, &name, &source)?;
        let index = handle.index();
        self.libraries[index].path = Some(path);
        Ok(handle)
    }

    /// Compiles `source` and registers it under `name`.
    ///
    /// Loading a name that is already registered replaces the module and
    /// keeps the handle. Pipelines compiled from the old module stay in the
    /// pipeline cache until it is cleared.
    pub fn load_shader_source(&mut self, device: &D, name: &str, source: &str) -> Result<LibraryHandle> {
        let module = device
            .create_shader_module(name, source)
            .inspect_err(|e| log::error!("Failed to compile shader library '{name}': {e}"))?;
        let entry_points = EntryPoints::scan(source);

        if let Some(&handle) = self.name_to_handle.get(name) {
            log::info!("Reloaded shader library '{name}'");
            let library = &mut self.libraries[handle.index()];
            library.module = module;
            library.entry_points = entry_points;
            return Ok(handle);
        }

        let handle = LibraryHandle::new(self.libraries.len() as u32);
        log::debug!("Loaded shader library '{name}' {entry_points:?}");
        self.libraries.push(ShaderLibrary {
            name: name.to_string(),
            path: None,
            module,
            entry_points,
        });
        self.name_to_handle.insert(name.to_string(), handle);
        Ok(handle)
    }

    /// Recompiles every library that was loaded from a file.
    pub fn reload_all(&mut self, device: &D) -> Result<()> {
        let files: Vec<PathBuf> = self
            .libraries
            .iter()
            .filter_map(|l| l.path.clone())
            .collect();
        for path in files {
            self.load_file(device, path)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn get_handle_from_name(&self, name: &str) -> Option<LibraryHandle> {
        self.name_to_handle.get(name).copied()
    }

    pub fn get_vertex_function(&self, handle: LibraryHandle) -> Result<ShaderStage<'_, D::ShaderModule>> {
        self.stage(handle, "vertex", |e| e.vertex.as_deref())
    }

    pub fn get_fragment_function(&self, handle: LibraryHandle) -> Result<ShaderStage<'_, D::ShaderModule>> {
        self.stage(handle, "fragment", |e| e.fragment.as_deref())
    }

    pub fn get_kernel_function(&self, handle: LibraryHandle) -> Result<ShaderStage<'_, D::ShaderModule>> {
        self.stage(handle, "compute", |e| e.compute.as_deref())
    }

    /// **Panics** if the handle was not minted by this manager.
    #[must_use]
    pub fn entry_points(&self, handle: LibraryHandle) -> &EntryPoints {
        &self.library(handle).entry_points
    }

    #[must_use]
    pub fn name(&self, handle: LibraryHandle) -> &str {
        &self.library(handle).name
    }

    #[must_use]
    pub fn library_count(&self) -> usize {
        self.libraries.len()
    }

    fn stage(
        &self,
        handle: LibraryHandle,
        stage: &'static str,
        select: impl Fn(&EntryPoints) -> Option<&str>,
    ) -> Result<ShaderStage<'_, D::ShaderModule>> {
        let library = self.library(handle);
        let entry_point = select(&library.entry_points).ok_or_else(|| SirMetalError::MissingEntryPoint {
            shader: library.name.clone(),
            stage,
        })?;
        Ok(ShaderStage {
            module: &library.module,
            entry_point,
        })
    }

    fn library(&self, handle: LibraryHandle) -> &ShaderLibrary<D::ShaderModule> {
        let index = handle.index();
        assert!(
            index < self.libraries.len(),
            "library handle {:#010x} was not minted by this manager",
            handle.raw()
        );
        &self.libraries[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::HeadlessDevice;

    const MESH_WGSL: &str = r"
        struct VsOut { @builtin(position) pos: vec4<f32> };

        @vertex
        fn vs_main(@builtin(vertex_index) i: u32) -> VsOut {
            var out: VsOut;
            out.pos = vec4<f32>(0.0);
            return out;
        }

        @fragment fn fs_main() -> @location(0) vec4<f32> {
            return vec4<f32>(1.0);
        }
    ";

    #[test]
    fn scan_finds_stage_functions() {
        let entry_points = EntryPoints::scan(MESH_WGSL);
        assert_eq!(entry_points.vertex.as_deref(), Some("vs_main"));
        assert_eq!(entry_points.fragment.as_deref(), Some("fs_main"));
        assert_eq!(entry_points.compute, None);
        assert!(entry_points.contains("fs_main"));
        assert!(!entry_points.contains("main"));
    }

    #[test]
    fn scan_skips_trailing_attributes() {
        let entry_points = EntryPoints::scan(
            "@compute @workgroup_size(8, 8, 1)\nfn flood(@builtin(global_invocation_id) id: vec3<u32>) {}",
        );
        assert_eq!(entry_points.compute.as_deref(), Some("flood"));
    }

    #[test]
    fn scan_ignores_commented_out_entry_points() {
        let entry_points = EntryPoints::scan(
            r"
            // @vertex fn old_vs() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }
            /* @fragment fn old_fs() -> @location(0) vec4<f32> {
                /* nested */ return vec4<f32>(0.0);
            } */
            @vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }
            @fragment /* tonemapped */ fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
            ",
        );
        assert_eq!(entry_points.vertex.as_deref(), Some("vs_main"));
        assert_eq!(entry_points.fragment.as_deref(), Some("fs_main"));
        assert!(!entry_points.contains("old_vs"));
        assert!(!entry_points.contains("old_fs"));
    }

    #[test]
    fn reloading_a_name_keeps_the_handle() {
        let device = HeadlessDevice::new();
        let mut shaders = ShaderManager::<HeadlessDevice>::new(".");

        let first = shaders.load_shader_source(&device, "mesh", MESH_WGSL).unwrap();
        let second = shaders.load_shader_source(&device, "mesh", MESH_WGSL).unwrap();
        assert_eq!(first, second);
        assert_eq!(shaders.library_count(), 1);
        assert_eq!(shaders.get_handle_from_name("mesh"), Some(first));
    }

    #[test]
    fn missing_stage_is_an_error() {
        let device = HeadlessDevice::new();
        let mut shaders = ShaderManager::<HeadlessDevice>::new(".");
        let handle = shaders.load_shader_source(&device, "mesh", MESH_WGSL).unwrap();

        assert!(matches!(
            shaders.get_kernel_function(handle),
            Err(SirMetalError::MissingEntryPoint { stage: "compute", .. })
        ));
    }
}
