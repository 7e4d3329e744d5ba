//! Render passes and the helpers they are built from.
//!
//! A [`Pass`] is one unit of GPU compute work. It owns the images and
//! buffers it writes, resizes them with the viewport, and appends its
//! commands to the shared frame recording when asked.
//!
//! Passes do not inherit from each other. Shared behaviour lives in small
//! helpers a pass delegates to:
//!
//! - [`SizedImages`] / [`SizedBuffer`]: viewport-sized resources that are
//!   destroyed and recreated on resize and published to the
//!   [`OutputRegistry`].
//! - [`InputBindings`]: descriptor slots that reference another pass'
//!   outputs and rebind when the producer republishes.
//! - [`DirtyFlag`]: the "must re-record" bit.
//! - [`PassGroup`]: an ordered list of child passes.
//!
//! # Lifecycle
//!
//! ```text
//! new ──▶ attach_scene ──▶ resize ──▶ { update, (needs_rerecord? record + mark_recorded) }* ──▶ release
//! ```

mod group;
mod outputs;
mod sized;

pub use group::PassGroup;
pub use outputs::{InputBindings, Output, OutputRegistry};
pub use sized::{SizedBuffer, SizedImages};

use crate::cache::ResourceCache;
use crate::error::Result;
use crate::gpu::{CommandList, Extent, GpuDevice, PipelineId};
use crate::params::Params;
use crate::scene::Scene;

/// Quality mode of the whole pass tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RenderMode {
    /// Real-time rendering into the window.
    #[default]
    Interactive,
    /// High quality offline capture.
    Offline,
}

/// Everything a pass may touch while resizing, updating or recording.
pub struct PassContext<'a> {
    pub device: &'a mut dyn GpuDevice,
    pub cache: &'a mut ResourceCache,
    pub outputs: &'a mut OutputRegistry,
}

impl<'a> PassContext<'a> {
    pub fn new(
        device: &'a mut dyn GpuDevice,
        cache: &'a mut ResourceCache,
        outputs: &'a mut OutputRegistry,
    ) -> Self {
        Self {
            device,
            cache,
            outputs,
        }
    }
}

/// The "needs re-record" bit. Starts set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyFlag(bool);

impl Default for DirtyFlag {
    fn default() -> Self {
        Self(true)
    }
}

impl DirtyFlag {
    pub fn mark(&mut self) {
        self.0 = true;
    }

    pub fn clear(&mut self) {
        self.0 = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.0
    }
}

/// A unit of GPU compute work in the frame.
pub trait Pass {
    fn name(&self) -> &str;

    /// Current output size.
    fn size(&self) -> Extent;

    /// Recreates size-dependent resources at `size` and rebinds descriptors
    /// that reference them. Resizing to the current size does nothing.
    fn resize(&mut self, ctx: &mut PassContext<'_>, size: Extent) -> Result<()>;

    /// Advances animated parameters and stages CPU-side buffers. Never
    /// changes the recording.
    fn update(&mut self, ctx: &mut PassContext<'_>, dt: f32) -> Result<()>;

    /// Binds the pass to `scene`; marks it dirty if the scene changed.
    fn attach_scene(&mut self, ctx: &mut PassContext<'_>, scene: &dyn Scene) -> Result<()>;

    /// Whether the recording built from this pass is out of date.
    fn needs_rerecord(&self) -> bool;

    /// Appends this pass' commands to `cl`.
    fn record(&mut self, ctx: &mut PassContext<'_>, cl: &mut CommandList) -> Result<()>;

    /// Clears the dirty state after a successful record.
    fn mark_recorded(&mut self);

    /// Called once the recording built by the last `record` was submitted
    /// successfully.
    fn on_submitted(&mut self) {}

    fn prepare_mode(&mut self, _mode: RenderMode) {}

    /// Called after `pipeline` was rebuilt by hot reload. Returns whether
    /// the pass uses it (and is now dirty).
    fn on_pipeline_changed(&mut self, pipeline: PipelineId) -> bool;

    /// Destroys every owned resource.
    fn release(&mut self, ctx: &mut PassContext<'_>);

    /// Editable parameter groups of this pass.
    fn params_mut(&mut self) -> Vec<&mut dyn Params> {
        Vec::new()
    }
}
