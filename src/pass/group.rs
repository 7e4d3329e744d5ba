use log::debug;

use super::{Pass, PassContext, RenderMode};
use crate::error::Result;
use crate::gpu::{CommandList, Extent, PipelineId};
use crate::params::Params;
use crate::scene::Scene;

/// Ordered child passes.
///
/// List order is execution order: a child may read what the owner or an
/// earlier sibling produced. Owners call the forwarding methods between
/// their own pre- and post-amble.
#[derive(Default)]
pub struct PassGroup {
    children: Vec<Box<dyn Pass>>,
}

impl PassGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pass: impl Pass + 'static) {
        self.children.push(Box::new(pass));
    }

    /// Swaps the child called `name` for `pass`. The incoming pass is sized
    /// like the old one and bound to `scene` before the old one is released.
    /// Returns `false` and drops `pass` if no child has that name.
    pub fn replace(
        &mut self,
        ctx: &mut PassContext<'_>,
        name: &str,
        mut pass: Box<dyn Pass>,
        scene: &dyn Scene,
    ) -> Result<bool> {
        let Some(index) = self.children.iter().position(|c| c.name() == name) else {
            return Ok(false);
        };
        let size = self.children[index].size();
        if !size.is_empty() {
            pass.resize(ctx, size)?;
        }
        pass.attach_scene(ctx, scene)?;
        ctx.device.wait_idle();
        let mut old = std::mem::replace(&mut self.children[index], pass);
        old.release(ctx);
        debug!("Replaced pass {name} at {}x{}", size.width, size.height);
        Ok(true)
    }

    pub fn child(&self, name: &str) -> Option<&dyn Pass> {
        self.children
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    pub fn children(&self) -> impl Iterator<Item = &dyn Pass> {
        self.children.iter().map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn resize(&mut self, ctx: &mut PassContext<'_>, size: Extent) -> Result<()> {
        for child in &mut self.children {
            child.resize(ctx, size)?;
        }
        Ok(())
    }

    pub fn update(&mut self, ctx: &mut PassContext<'_>, dt: f32) -> Result<()> {
        for child in &mut self.children {
            child.update(ctx, dt)?;
        }
        Ok(())
    }

    pub fn attach_scene(&mut self, ctx: &mut PassContext<'_>, scene: &dyn Scene) -> Result<()> {
        for child in &mut self.children {
            child.attach_scene(ctx, scene)?;
        }
        Ok(())
    }

    pub fn needs_rerecord(&self) -> bool {
        self.children.iter().any(|c| c.needs_rerecord())
    }

    pub fn record(&mut self, ctx: &mut PassContext<'_>, cl: &mut CommandList) -> Result<()> {
        for child in &mut self.children {
            child.record(ctx, cl)?;
        }
        Ok(())
    }

    pub fn mark_recorded(&mut self) {
        for child in &mut self.children {
            child.mark_recorded();
        }
    }

    pub fn on_submitted(&mut self) {
        for child in &mut self.children {
            child.on_submitted();
        }
    }

    pub fn prepare_mode(&mut self, mode: RenderMode) {
        for child in &mut self.children {
            child.prepare_mode(mode);
        }
    }

    /// Every child sees the event, even after one claimed it.
    pub fn on_pipeline_changed(&mut self, pipeline: PipelineId) -> bool {
        self.children
            .iter_mut()
            .fold(false, |hit, c| c.on_pipeline_changed(pipeline) | hit)
    }

    pub fn release(&mut self, ctx: &mut PassContext<'_>) {
        for child in &mut self.children {
            child.release(ctx);
        }
    }

    pub fn params_mut(&mut self) -> Vec<&mut dyn Params> {
        self.children
            .iter_mut()
            .flat_map(|c| c.params_mut())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InlineShaders, ResourceCache};
    use crate::gpu::{Command, DescriptorSetId, HeadlessDevice};
    use crate::pass::{DirtyFlag, OutputRegistry};
    use crate::params::ShadowParams;
    use crate::scene::DemoScene;

    struct Leaf {
        name: &'static str,
        size: Extent,
        dirty: DirtyFlag,
        pipeline: PipelineId,
        params: ShadowParams,
        scene: Option<DescriptorSetId>,
        released: bool,
    }

    impl Leaf {
        fn new(name: &'static str, pipeline: u64) -> Self {
            Self {
                name,
                size: Extent::default(),
                dirty: DirtyFlag::default(),
                pipeline: PipelineId::from_raw(pipeline),
                params: ShadowParams::default(),
                scene: None,
                released: false,
            }
        }
    }

    impl Pass for Leaf {
        fn name(&self) -> &str {
            self.name
        }
        fn size(&self) -> Extent {
            self.size
        }
        fn resize(&mut self, _ctx: &mut PassContext<'_>, size: Extent) -> Result<()> {
            if size != self.size {
                self.size = size;
                self.dirty.mark();
            }
            Ok(())
        }
        fn update(&mut self, _ctx: &mut PassContext<'_>, _dt: f32) -> Result<()> {
            Ok(())
        }
        fn attach_scene(&mut self, _ctx: &mut PassContext<'_>, scene: &dyn Scene) -> Result<()> {
            self.scene = Some(scene.descriptors());
            Ok(())
        }
        fn needs_rerecord(&self) -> bool {
            self.dirty.is_dirty()
        }
        fn record(&mut self, _ctx: &mut PassContext<'_>, cl: &mut CommandList) -> Result<()> {
            cl.bind_pipeline(self.pipeline);
            if let Some(set) = self.scene {
                cl.bind_descriptors(&[set]);
            }
            Ok(())
        }
        fn mark_recorded(&mut self) {
            self.dirty.clear();
        }
        fn on_pipeline_changed(&mut self, pipeline: PipelineId) -> bool {
            let hit = pipeline == self.pipeline;
            if hit {
                self.dirty.mark();
            }
            hit
        }
        fn release(&mut self, _ctx: &mut PassContext<'_>) {
            self.released = true;
        }
        fn params_mut(&mut self) -> Vec<&mut dyn Params> {
            vec![&mut self.params]
        }
    }

    #[test]
    fn dirtiness_is_or_of_children() {
        let mut group = PassGroup::new();
        group.push(Leaf::new("a", 1));
        group.push(Leaf::new("b", 2));
        assert!(group.needs_rerecord());
        group.mark_recorded();
        assert!(!group.needs_rerecord());

        assert!(group.on_pipeline_changed(PipelineId::from_raw(2)));
        assert!(group.needs_rerecord());
        assert!(!group.on_pipeline_changed(PipelineId::from_raw(9)));
    }

    #[test]
    fn records_children_in_order() {
        let mut device = HeadlessDevice::new();
        let mut cache = ResourceCache::new(InlineShaders::new());
        let mut outputs = OutputRegistry::new();
        let mut ctx = PassContext::new(&mut device, &mut cache, &mut outputs);
        let mut group = PassGroup::new();
        group.push(Leaf::new("a", 1));
        group.push(Leaf::new("b", 2));
        group.resize(&mut ctx, Extent::d2(4, 4)).unwrap();
        assert!(group.children().all(|c| c.size() == Extent::d2(4, 4)));

        let mut cl = CommandList::new("frame");
        group.record(&mut ctx, &mut cl).unwrap();
        assert_eq!(
            cl.commands(),
            &[
                crate::gpu::Command::BindPipeline(PipelineId::from_raw(1)),
                crate::gpu::Command::BindPipeline(PipelineId::from_raw(2)),
            ]
        );
        assert_eq!(group.params_mut().len(), 2);
    }

    #[test]
    fn replace_sizes_and_binds_the_incoming_pass() {
        let mut device = HeadlessDevice::new();
        let mut cache = ResourceCache::new(InlineShaders::new());
        let mut outputs = OutputRegistry::new();
        let scene = DemoScene::new(&mut device, &mut cache).unwrap();
        let mut ctx = PassContext::new(&mut device, &mut cache, &mut outputs);
        let mut group = PassGroup::new();
        group.push(Leaf::new("a", 1));
        group.resize(&mut ctx, Extent::d2(8, 6)).unwrap();
        group.mark_recorded();

        assert!(group
            .replace(&mut ctx, "a", Box::new(Leaf::new("a", 5)), &scene)
            .unwrap());
        assert!(!group
            .replace(&mut ctx, "missing", Box::new(Leaf::new("x", 6)), &scene)
            .unwrap());
        assert_eq!(group.len(), 1);
        assert_eq!(group.child("a").map(|c| c.size()), Some(Extent::d2(8, 6)));
        assert!(group.needs_rerecord());

        let mut cl = CommandList::new("frame");
        group.record(&mut ctx, &mut cl).unwrap();
        assert_eq!(
            cl.commands(),
            &[
                Command::BindPipeline(PipelineId::from_raw(5)),
                Command::BindDescriptors(vec![scene.descriptors()]),
            ]
        );
    }
}
