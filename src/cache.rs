//! Name-keyed cache of pipeline layouts, compute pipelines and samplers.
//!
//! Passes ask the cache for objects by logical name. The first request
//! builds the object, every later request with the same name returns the
//! same handle and ignores the construction arguments. Entries are never
//! evicted.
//!
//! Shader programs are referenced by virtual path and loaded through a
//! [`ShaderSource`]. The file-system source maps `` `/shaders/<name>.comp ``
//! to `<root>/<name>.comp.wgsl`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info, warn};

use crate::error::{RenderError, Result};
use crate::gpu::{
    GpuDevice, PipelineDesc, PipelineId, PipelineLayoutDesc, PipelineLayoutId, SamplerDesc,
    SamplerId,
};
use crate::hot_reload::{HotReload, PipelineChanged};

const VIRTUAL_PREFIXES: [&str; 2] = ["`/shaders/", "/shaders/"];

/// Loads shader programs by virtual path.
pub trait ShaderSource {
    /// Where the program behind `path` lives, for error messages.
    fn resolve(&self, path: &str) -> PathBuf;
    fn load(&self, path: &str) -> Result<String>;
    /// Last modification time, when the source can tell.
    fn modified(&self, path: &str) -> Option<SystemTime>;
}

/// Shader programs stored as `.wgsl` files under a root directory.
#[derive(Clone, Debug)]
pub struct FileShaderSource {
    root: PathBuf,
}

impl FileShaderSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ShaderSource for FileShaderSource {
    fn resolve(&self, path: &str) -> PathBuf {
        let name = VIRTUAL_PREFIXES
            .iter()
            .find_map(|prefix| path.strip_prefix(prefix))
            .unwrap_or(path);
        self.root.join(format!("{name}.wgsl"))
    }

    fn load(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path);
        std::fs::read_to_string(&resolved).map_err(|_| RenderError::ShaderNotFound {
            path: path.to_string(),
            resolved,
        })
    }

    fn modified(&self, path: &str) -> Option<SystemTime> {
        std::fs::metadata(self.resolve(path))
            .and_then(|m| m.modified())
            .ok()
    }
}

/// Shader programs held in memory, keyed by virtual path.
#[derive(Clone, Debug, Default)]
pub struct InlineShaders {
    programs: HashMap<String, String>,
}

impl InlineShaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, source: &str) -> Self {
        self.set(path, source);
        self
    }

    pub fn set(&mut self, path: &str, source: &str) {
        self.programs.insert(path.to_string(), source.to_string());
    }
}

impl ShaderSource for InlineShaders {
    fn resolve(&self, path: &str) -> PathBuf {
        PathBuf::from(path)
    }

    fn load(&self, path: &str) -> Result<String> {
        self.programs
            .get(path)
            .cloned()
            .ok_or_else(|| RenderError::ShaderNotFound {
                path: path.to_string(),
                resolved: self.resolve(path),
            })
    }

    fn modified(&self, _path: &str) -> Option<SystemTime> {
        None
    }
}

/// Interns GPU objects by logical name.
pub struct ResourceCache {
    source: Box<dyn ShaderSource>,
    layouts: HashMap<String, PipelineLayoutId>,
    pipelines: HashMap<String, (PipelineId, PipelineDesc)>,
    samplers: HashMap<String, SamplerId>,
    hot_reload: Option<HotReload>,
}

impl ResourceCache {
    pub fn new(source: impl ShaderSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            layouts: HashMap::new(),
            pipelines: HashMap::new(),
            samplers: HashMap::new(),
            hot_reload: None,
        }
    }

    /// Attaches a hot-reload service. Every pipeline built afterwards is
    /// watched.
    pub fn with_hot_reload(mut self, hot_reload: HotReload) -> Self {
        self.hot_reload = Some(hot_reload);
        self
    }

    pub fn hot_reload_mut(&mut self) -> Option<&mut HotReload> {
        self.hot_reload.as_mut()
    }

    pub fn shader_source(&self) -> &dyn ShaderSource {
        self.source.as_ref()
    }

    pub fn layout(
        &mut self,
        device: &mut dyn GpuDevice,
        name: &str,
        desc: &PipelineLayoutDesc,
    ) -> Result<PipelineLayoutId> {
        if let Some(id) = self.layouts.get(name) {
            return Ok(*id);
        }
        let id = device.create_pipeline_layout(desc)?;
        self.layouts.insert(name.to_string(), id);
        Ok(id)
    }

    /// Returns the pipeline called `name`, compiling it on first use.
    ///
    /// A missing shader program is reported as
    /// [`RenderError::ShaderNotFound`].
    pub fn pipeline(
        &mut self,
        device: &mut dyn GpuDevice,
        name: &str,
        desc: &PipelineDesc,
    ) -> Result<PipelineId> {
        if let Some((id, _)) = self.pipelines.get(name) {
            return Ok(*id);
        }
        let source = self.source.load(&desc.shader)?;
        let id = device.create_pipeline(desc, &source)?;
        debug!("Built pipeline '{name}' from {}", desc.shader);
        if let Some(hot_reload) = &mut self.hot_reload {
            hot_reload.watch(&desc.shader, self.source.as_ref());
        }
        self.pipelines
            .insert(name.to_string(), (id, desc.clone()));
        Ok(id)
    }

    pub fn sampler(
        &mut self,
        device: &mut dyn GpuDevice,
        name: &str,
        desc: &SamplerDesc,
    ) -> Result<SamplerId> {
        if let Some(id) = self.samplers.get(name) {
            return Ok(*id);
        }
        let id = device.create_sampler(desc)?;
        self.samplers.insert(name.to_string(), id);
        Ok(id)
    }

    /// Number of cached objects of every kind.
    pub fn len(&self) -> usize {
        self.layouts.len() + self.pipelines.len() + self.samplers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds every pipeline whose shader changed and reports the rebuilt
    /// handles. A pipeline that fails to rebuild keeps its previous code.
    pub fn poll_hot_reload(&mut self, device: &mut dyn GpuDevice) -> Vec<PipelineChanged> {
        let Some(hot_reload) = &mut self.hot_reload else {
            return Vec::new();
        };
        let changed = hot_reload.drain(self.source.as_ref());
        let mut events = Vec::new();
        for path in changed {
            info!("Reloading shader: {path}");
            let source = match self.source.load(&path) {
                Ok(source) => source,
                Err(err) => {
                    warn!("Shader reload failed, keeping previous version: {err}");
                    continue;
                }
            };
            let mut names: Vec<_> = self
                .pipelines
                .iter()
                .filter(|(_, (_, desc))| desc.shader == path)
                .collect();
            names.sort_by(|a, b| a.0.cmp(b.0));
            for (name, (id, desc)) in names {
                match device.rebuild_pipeline(*id, desc, &source) {
                    Ok(()) => {
                        info!("Pipeline '{name}' rebuilt");
                        events.push(PipelineChanged(*id));
                    }
                    Err(err) => {
                        warn!("Pipeline '{name}' failed to rebuild, keeping previous version: {err}")
                    }
                }
            }
        }
        events
    }
}
