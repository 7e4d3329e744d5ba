//! Shader hot reloading.
//!
//! [`HotReload`] collects "this shader changed" notices. They come either
//! from outside (a file watcher, an editor integration or a test calling
//! [`HotReload::notify`]) or from polling the modification time of every
//! watched shader.
//!
//! The service does not build anything itself. It is handed to the
//! [`ResourceCache`](crate::cache::ResourceCache), which drains it once per
//! frame, rebuilds the affected pipelines in place and reports a
//! [`PipelineChanged`] event per rebuilt pipeline.
//!
//! # Example
//!
//! ```no_run
//! use raylane::{FileShaderSource, HotReload, ResourceCache};
//!
//! let cache = ResourceCache::new(FileShaderSource::new("shaders"))
//!     .with_hot_reload(HotReload::polling());
//! ```

use std::collections::{BTreeSet, HashMap};
use std::time::SystemTime;

use crate::cache::ShaderSource;
use crate::gpu::PipelineId;

/// A pipeline was rebuilt from a changed shader and now has new code under
/// the same handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineChanged(pub PipelineId);

/// Tracks which shaders changed since the last drain.
#[derive(Debug, Default)]
pub struct HotReload {
    poll_files: bool,
    watched: HashMap<String, Option<SystemTime>>,
    pending: BTreeSet<String>,
}

impl HotReload {
    /// A service driven only by [`notify`](Self::notify).
    pub fn new() -> Self {
        Self::default()
    }

    /// A service that also checks shader modification times on every drain.
    pub fn polling() -> Self {
        Self {
            poll_files: true,
            ..Self::default()
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poll_files
    }

    /// Starts watching a virtual shader path.
    pub fn watch(&mut self, path: &str, source: &dyn ShaderSource) {
        self.watched
            .entry(path.to_string())
            .or_insert_with(|| source.modified(path));
    }

    pub fn is_watched(&self, path: &str) -> bool {
        self.watched.contains_key(path)
    }

    /// Marks a shader as changed. Unwatched paths are ignored.
    pub fn notify(&mut self, path: &str) {
        if self.watched.contains_key(path) {
            self.pending.insert(path.to_string());
        }
    }

    /// Returns every shader that changed since the last call, in path order.
    pub fn drain(&mut self, source: &dyn ShaderSource) -> Vec<String> {
        if self.poll_files {
            for (path, last) in &mut self.watched {
                let Some(modified) = source.modified(path) else {
                    continue;
                };
                if last.is_none_or(|last| modified > last) {
                    *last = Some(modified);
                    self.pending.insert(path.clone());
                }
            }
        }
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InlineShaders;

    #[test]
    fn notify_only_reports_watched_paths() {
        let source = InlineShaders::new().with("`/shaders/a.comp", "a");
        let mut hr = HotReload::new();
        hr.watch("`/shaders/a.comp", &source);
        hr.notify("`/shaders/a.comp");
        hr.notify("`/shaders/unknown.comp");
        assert_eq!(hr.drain(&source), vec!["`/shaders/a.comp".to_string()]);
        assert!(hr.drain(&source).is_empty());
    }

    #[test]
    fn repeated_notifications_coalesce() {
        let source = InlineShaders::new().with("`/shaders/a.comp", "a");
        let mut hr = HotReload::new();
        hr.watch("`/shaders/a.comp", &source);
        hr.notify("`/shaders/a.comp");
        hr.notify("`/shaders/a.comp");
        assert_eq!(hr.drain(&source).len(), 1);
    }

    #[test]
    fn polling_picks_up_newer_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.comp.wgsl");
        std::fs::write(&file, "// v1").unwrap();
        let source = crate::cache::FileShaderSource::new(dir.path());

        let mut hr = HotReload::polling();
        hr.watch("`/shaders/a.comp", &source);
        assert!(hr.drain(&source).is_empty());

        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::write(&file, "// v2").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(later)
            .unwrap();
        assert_eq!(hr.drain(&source), vec!["`/shaders/a.comp".to_string()]);
        assert!(hr.drain(&source).is_empty());
    }
}
