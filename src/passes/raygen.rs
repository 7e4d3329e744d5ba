use log::debug;

use super::{GROUP_2D, SceneBinding, names, pass_layout, storage_buffer, storage_image};
use crate::error::Result;
use crate::gpu::{
    BindingLayout, CommandList, DescriptorSetId, DescriptorsDesc, Extent, ImageFormat, PipelineDesc,
    PipelineId, Subresource,
};
use crate::pass::{DirtyFlag, InputBindings, Pass, PassContext, SizedImages};
use crate::scene::Scene;

pub(crate) const SHADER: &str = "`/shaders/raygen.comp";

const BINDINGS: [BindingLayout; 3] = [
    storage_image("dir_t", 10, ImageFormat::Rgba32Float),
    storage_image("uv_object_normal", 11, ImageFormat::Rgba32Float),
    storage_buffer("seed", 12, true),
];

/// Traces primary rays.
///
/// Writes the ray direction and hit distance to `raygen.dir_t` and the hit
/// surface (uv, object id, packed normal) to `raygen.uv_object_normal`.
pub struct RaygenPass {
    camera: DescriptorSetId,
    scene: SceneBinding,
    pipeline: PipelineId,
    descriptors: DescriptorSetId,
    images: SizedImages,
    inputs: InputBindings,
    dirty: DirtyFlag,
}

impl RaygenPass {
    pub fn new(ctx: &mut PassContext<'_>, camera: DescriptorSetId) -> Result<Self> {
        let layout = ctx
            .cache
            .layout(ctx.device, "Raygen layout", &pass_layout(&BINDINGS))?;
        let pipeline = ctx.cache.pipeline(
            ctx.device,
            "Raygen",
            &PipelineDesc::new(SHADER, layout, GROUP_2D),
        )?;
        let descriptors = ctx
            .device
            .create_descriptors(&DescriptorsDesc::new("Raygen descriptors", layout, 2, vec![]))?;

        Ok(Self {
            camera,
            scene: SceneBinding::default(),
            pipeline,
            descriptors,
            images: SizedImages::new(&[
                (names::DIR_T, ImageFormat::Rgba32Float),
                (names::UV_OBJECT_NORMAL, ImageFormat::Rgba32Float),
            ]),
            inputs: InputBindings::new(descriptors, &[(12, names::SEED)]),
            dirty: DirtyFlag::default(),
        })
    }
}

impl Pass for RaygenPass {
    fn name(&self) -> &str {
        "raygen"
    }

    fn size(&self) -> Extent {
        self.images.size()
    }

    fn resize(&mut self, ctx: &mut PassContext<'_>, size: Extent) -> Result<()> {
        if self.images.resize(ctx, size)? {
            for (binding, id) in [10, 11].into_iter().zip(self.images.ids()) {
                ctx.device
                    .update_descriptor(self.descriptors, binding, Subresource::Image(*id))?;
            }
            ctx.device.flush_descriptors(self.descriptors)?;
            self.dirty.mark();
        }
        self.inputs.refresh(ctx.device, ctx.outputs)?;
        Ok(())
    }

    fn update(&mut self, _ctx: &mut PassContext<'_>, _dt: f32) -> Result<()> {
        Ok(())
    }

    fn attach_scene(&mut self, _ctx: &mut PassContext<'_>, scene: &dyn Scene) -> Result<()> {
        if self.scene.attach(scene) {
            self.dirty.mark();
        }
        Ok(())
    }

    fn needs_rerecord(&self) -> bool {
        self.dirty.is_dirty()
    }

    fn record(&mut self, ctx: &mut PassContext<'_>, cl: &mut CommandList) -> Result<()> {
        self.inputs.refresh(ctx.device, ctx.outputs)?;
        let Some(sets) = self.scene.sets(self.camera, self.descriptors) else {
            debug!("raygen: no scene attached, skipping");
            return Ok(());
        };
        cl.bind_descriptors(&sets);
        cl.bind_pipeline(self.pipeline);
        cl.dispatch_extent(self.size());
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

    fn release(&mut self, ctx: &mut PassContext<'_>) {
        self.images.release(ctx);
        ctx.device.destroy_descriptors(self.descriptors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{BufferDesc, GpuDevice, HeadlessDevice};
    use crate::pass::OutputRegistry;
    use crate::passes::testing;
    use crate::scene::DemoScene;

    #[test]
    fn resize_binds_new_images_and_seed() {
        let mut device = HeadlessDevice::new();
        let mut cache = testing::cache();
        let mut outputs = OutputRegistry::new();
        let camera = testing::camera_set(&mut device, &mut cache).unwrap();
        let seed = device.create_buffer(&BufferDesc::storage("seed", 32)).unwrap();
        outputs.publish(names::SEED, Subresource::Buffer(seed));

        let mut ctx = PassContext::new(&mut device, &mut cache, &mut outputs);
        let mut pass = RaygenPass::new(&mut ctx, camera).unwrap();
        pass.resize(&mut ctx, Extent::d2(64, 32)).unwrap();

        let dir_t = ctx.outputs.image(names::DIR_T).unwrap();
        assert_eq!(
            ctx.device.descriptor(pass.descriptors, 10),
            Some(Subresource::Image(dir_t))
        );
        assert_eq!(
            ctx.device.descriptor(pass.descriptors, 12),
            Some(Subresource::Buffer(seed))
        );
        assert_eq!(ctx.device.image_desc(dir_t).unwrap().extent, Extent::d2(64, 32));
    }

    #[test]
    fn records_one_viewport_dispatch() {
        let mut device = HeadlessDevice::new();
        let mut cache = testing::cache();
        let mut outputs = OutputRegistry::new();
        let camera = testing::camera_set(&mut device, &mut cache).unwrap();
        let scene = DemoScene::new(&mut device, &mut cache).unwrap();

        let mut ctx = PassContext::new(&mut device, &mut cache, &mut outputs);
        let mut pass = RaygenPass::new(&mut ctx, camera).unwrap();
        pass.attach_scene(&mut ctx, &scene).unwrap();
        pass.resize(&mut ctx, Extent::d2(100, 50)).unwrap();
        assert!(pass.needs_rerecord());

        let mut cl = CommandList::new("frame");
        pass.record(&mut ctx, &mut cl).unwrap();
        pass.mark_recorded();
        assert!(!pass.needs_rerecord());
        assert_eq!(cl.dispatches().collect::<Vec<_>>(), vec![[100, 50, 1]]);
        assert_eq!(
            cl.bound_before(cl.len()),
            Some(&[camera, scene.descriptors(), pass.descriptors][..])
        );

        pass.attach_scene(&mut ctx, &scene).unwrap();
        assert!(!pass.needs_rerecord());
    }
}
