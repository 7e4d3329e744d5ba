//! The root pass.
//!
//! [`CompositePass`] owns the presented image, the accumulation buffer and
//! the per-frame random seed. Its recording is:
//!
//! 1. flush the seed and debug uniforms,
//! 2. the seed init dispatch,
//! 3. raygen, shadow and clouds, in that order,
//! 4. the composite dispatch.
//!
//! The seed lives in two buffers. The CPU writes fresh offsets and a new
//! epoch into `seed_params` every update; the init shader copies them into
//! the GPU-owned `composite.seed` state and restarts the sample counter
//! whenever the epoch changed. Resubmitting the same recording without an
//! update therefore accumulates samples.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{
    CloudPass, GROUP_2D, RaygenPass, SceneBinding, ShadowPass, names, pass_layout, sampled_image,
    storage_buffer, storage_image, uniform_buffer,
};
use crate::error::Result;
use crate::gpu::{
    BindingKind, BindingLayout, BufferDesc, BufferId, BufferUsage, CommandList, DescriptorSetId,
    DescriptorsDesc, Extent, ImageFormat, ImageId, PipelineDesc, PipelineId, PipelineLayoutDesc,
    Subresource,
};
use crate::pass::{
    DirtyFlag, InputBindings, Pass, PassContext, PassGroup, RenderMode, SizedBuffer, SizedImages,
};
use crate::params::{DebugParams, Params};
use crate::scene::Scene;

pub(crate) const INIT_SHADER: &str = "`/shaders/init.comp";
pub(crate) const COMPOSITE_SHADER: &str = "`/shaders/composite.comp";

/// Range of the random offsets drawn every frame.
const SEED_RANGE: f32 = 1000.0;

const INIT_BINDINGS: [BindingLayout; 2] = [
    BindingLayout::new("seed", 0, 0, BindingKind::StorageBuffer { read_only: false }),
    BindingLayout::new("seed_params", 0, 1, BindingKind::UniformBuffer),
];

const BINDINGS: [BindingLayout; 8] = [
    storage_image("output", 0, ImageFormat::Rgba8Unorm),
    storage_buffer("accumulation", 1, false),
    storage_buffer("seed", 2, true),
    sampled_image("dir_t", 3),
    sampled_image("uv_object_normal", 4),
    sampled_image("lighting", 5),
    sampled_image("clouds", 6),
    uniform_buffer("debug", 7),
];

/// CPU half of the seed, rewritten every update.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SeedUniform {
    pub offsets: [f32; 3],
    pub epoch: u32,
}

/// GPU half of the seed, written by the init shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SeedState {
    pub offsets: [f32; 3],
    pub sample_count: u32,
    pub epoch: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DebugUniform {
    pub display: u32,
    pub nan_only: u32,
    pub _pad: [u32; 2],
}

impl From<&DebugParams> for DebugUniform {
    fn from(params: &DebugParams) -> Self {
        Self {
            display: params.display.index() as u32,
            nan_only: params.nan_only as u32,
            _pad: [0; 2],
        }
    }
}

/// Root of the pass tree.
pub struct CompositePass {
    camera: DescriptorSetId,
    scene: SceneBinding,
    init: PipelineId,
    composite: PipelineId,
    init_set: DescriptorSetId,
    descriptors: DescriptorSetId,
    images: SizedImages,
    accumulation: SizedBuffer,
    seed: BufferId,
    seed_params: BufferId,
    seed_uniform: SeedUniform,
    debug: BufferId,
    debug_params: DebugParams,
    rng: StdRng,
    inputs: InputBindings,
    children: PassGroup,
    mode: RenderMode,
    dirty: DirtyFlag,
}

impl CompositePass {
    /// Builds the whole tree. `camera` is the flushed camera descriptor set.
    pub fn new(ctx: &mut PassContext<'_>, camera: DescriptorSetId) -> Result<Self> {
        let seed = ctx.device.create_buffer(&BufferDesc::storage(
            names::SEED,
            std::mem::size_of::<SeedState>() as u64,
        ))?;
        ctx.outputs.publish(names::SEED, Subresource::Buffer(seed));
        let seed_params = ctx.device.create_buffer(&BufferDesc::uniform(
            "Seed params",
            std::mem::size_of::<SeedUniform>() as u64,
        ))?;
        let debug = ctx.device.create_buffer(&BufferDesc::uniform(
            "Debug display",
            std::mem::size_of::<DebugUniform>() as u64,
        ))?;

        let init_layout = ctx.cache.layout(
            ctx.device,
            "Seed init layout",
            &PipelineLayoutDesc::new(INIT_BINDINGS.to_vec()),
        )?;
        let init = ctx.cache.pipeline(
            ctx.device,
            "Seed init",
            &PipelineDesc::new(INIT_SHADER, init_layout, [1, 1, 1]),
        )?;
        let layout = ctx
            .cache
            .layout(ctx.device, "Composite layout", &pass_layout(&BINDINGS))?;
        let composite = ctx.cache.pipeline(
            ctx.device,
            "Composite",
            &PipelineDesc::new(COMPOSITE_SHADER, layout, GROUP_2D),
        )?;

        let init_set = ctx.device.create_descriptors(&DescriptorsDesc::new(
            "Seed init descriptors",
            init_layout,
            0,
            vec![
                (0, Subresource::Buffer(seed)),
                (1, Subresource::Buffer(seed_params)),
            ],
        ))?;
        ctx.device.flush_descriptors(init_set)?;
        let descriptors = ctx.device.create_descriptors(&DescriptorsDesc::new(
            "Composite descriptors",
            layout,
            2,
            vec![
                (2, Subresource::Buffer(seed)),
                (7, Subresource::Buffer(debug)),
            ],
        ))?;

        let mut children = PassGroup::new();
        children.push(RaygenPass::new(ctx, camera)?);
        children.push(ShadowPass::new(ctx, camera)?);
        children.push(CloudPass::new(ctx, camera)?);

        Ok(Self {
            camera,
            scene: SceneBinding::default(),
            init,
            composite,
            init_set,
            descriptors,
            images: SizedImages::new(&[(names::OUTPUT, ImageFormat::Rgba8Unorm)]),
            accumulation: SizedBuffer::new(names::ACCUMULATION, BufferUsage::Storage),
            seed,
            seed_params,
            seed_uniform: SeedUniform::default(),
            debug,
            debug_params: DebugParams::default(),
            rng: StdRng::from_os_rng(),
            inputs: InputBindings::new(
                descriptors,
                &[
                    (3, names::DIR_T),
                    (4, names::UV_OBJECT_NORMAL),
                    (5, names::SHADOW_LIGHTING),
                    (6, names::CLOUDS),
                ],
            ),
            children,
            mode: RenderMode::Interactive,
            dirty: DirtyFlag::default(),
        })
    }

    /// Replaces the seed generator, for reproducible offsets.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// The presented and captured image.
    pub fn output(&self) -> Option<ImageId> {
        self.images.image(0)
    }

    pub fn seed_uniform(&self) -> SeedUniform {
        self.seed_uniform
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn children(&self) -> &PassGroup {
        &self.children
    }

    pub fn debug_params(&self) -> &DebugParams {
        &self.debug_params
    }
}

impl Pass for CompositePass {
    fn name(&self) -> &str {
        "composite"
    }

    fn size(&self) -> Extent {
        self.images.size()
    }

    fn resize(&mut self, ctx: &mut PassContext<'_>, size: Extent) -> Result<()> {
        let mut changed = false;
        if self.images.resize(ctx, size)? {
            if let Some(id) = self.output() {
                ctx.device
                    .update_descriptor(self.descriptors, 0, Subresource::Image(id))?;
            }
            changed = true;
        }
        let bytes = size.width as u64 * size.height as u64 * 16;
        if self.accumulation.ensure(ctx, bytes)? {
            if let Some(id) = self.accumulation.id() {
                ctx.device
                    .update_descriptor(self.descriptors, 1, Subresource::Buffer(id))?;
            }
            changed = true;
        }
        if changed {
            ctx.device.flush_descriptors(self.descriptors)?;
            self.dirty.mark();
            debug!("Composite resized to {}x{}", size.width, size.height);
        }

        self.children.resize(ctx, size)?;
        self.inputs.refresh(ctx.device, ctx.outputs)?;
        Ok(())
    }

    fn update(&mut self, ctx: &mut PassContext<'_>, dt: f32) -> Result<()> {
        let offsets = [(); 3].map(|_| self.rng.random_range(-SEED_RANGE..SEED_RANGE));
        self.seed_uniform = SeedUniform {
            offsets,
            epoch: self.seed_uniform.epoch.wrapping_add(1),
        };
        ctx.device
            .write_buffer(self.seed_params, 0, bytemuck::bytes_of(&self.seed_uniform))?;
        let debug = DebugUniform::from(&self.debug_params);
        ctx.device
            .write_buffer(self.debug, 0, bytemuck::bytes_of(&debug))?;
        self.children.update(ctx, dt)
    }

    fn attach_scene(&mut self, ctx: &mut PassContext<'_>, scene: &dyn Scene) -> Result<()> {
        if self.scene.attach(scene) {
            self.dirty.mark();
        }
        self.children.attach_scene(ctx, scene)
    }

    fn needs_rerecord(&self) -> bool {
        self.dirty.is_dirty() || self.children.needs_rerecord()
    }

    fn record(&mut self, ctx: &mut PassContext<'_>, cl: &mut CommandList) -> Result<()> {
        self.inputs.refresh(ctx.device, ctx.outputs)?;

        cl.flush_buffer(self.seed_params);
        cl.flush_buffer(self.debug);
        cl.bind_descriptors(&[self.init_set]);
        cl.bind_pipeline(self.init);
        cl.dispatch([1, 1, 1]);

        self.children.record(ctx, cl)?;

        let Some(sets) = self.scene.sets(self.camera, self.descriptors) else {
            debug!("composite: no scene attached, skipping");
            return Ok(());
        };
        cl.bind_descriptors(&sets);
        cl.bind_pipeline(self.composite);
        cl.dispatch_extent(self.size());
        Ok(())
    }

    fn mark_recorded(&mut self) {
        self.dirty.clear();
        self.children.mark_recorded();
    }

    fn on_submitted(&mut self) {
        self.children.on_submitted();
    }

    fn prepare_mode(&mut self, mode: RenderMode) {
        self.mode = mode;
        self.children.prepare_mode(mode);
    }

    fn on_pipeline_changed(&mut self, pipeline: PipelineId) -> bool {
        let own = pipeline == self.init || pipeline == self.composite;
        if own {
            self.dirty.mark();
        }
        self.children.on_pipeline_changed(pipeline) | own
    }

    fn release(&mut self, ctx: &mut PassContext<'_>) {
        self.children.release(ctx);
        self.images.release(ctx);
        self.accumulation.release(ctx);
        ctx.device.destroy_descriptors(self.init_set);
        ctx.device.destroy_descriptors(self.descriptors);
        for buffer in [self.seed, self.seed_params, self.debug] {
            ctx.device.destroy_buffer(buffer);
        }
        ctx.outputs.withdraw(names::SEED);
    }

    fn params_mut(&mut self) -> Vec<&mut dyn Params> {
        let mut params: Vec<&mut dyn Params> = vec![&mut self.debug_params];
        params.extend(self.children.params_mut());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuDevice, HeadlessDevice};
    use crate::pass::OutputRegistry;
    use crate::passes::testing;
    use crate::scene::DemoScene;

    struct Fixture {
        device: HeadlessDevice,
        cache: crate::cache::ResourceCache,
        outputs: OutputRegistry,
        scene: DemoScene,
        camera: DescriptorSetId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut device = HeadlessDevice::new();
            let mut cache = testing::cache();
            let camera = testing::camera_set(&mut device, &mut cache).unwrap();
            let scene = DemoScene::new(&mut device, &mut cache).unwrap();
            Self {
                device,
                cache,
                outputs: OutputRegistry::new(),
                scene,
                camera,
            }
        }
    }

    #[test]
    fn records_tree_in_dependency_order() {
        let mut f = Fixture::new();
        let mut ctx = PassContext::new(&mut f.device, &mut f.cache, &mut f.outputs);
        let mut root = CompositePass::new(&mut ctx, f.camera).unwrap();
        root.attach_scene(&mut ctx, &f.scene).unwrap();
        root.resize(&mut ctx, Extent::d2(64, 32)).unwrap();

        let mut cl = CommandList::new("frame");
        root.record(&mut ctx, &mut cl).unwrap();
        root.mark_recorded();
        assert_eq!(
            cl.dispatches().collect::<Vec<_>>(),
            vec![
                [1, 1, 1],
                [64, 32, 1],
                [64, 32, 1],
                [64, 32, 1],
                [128, 128, 128],
                [32, 32, 32],
                [64, 32, 1],
                [64, 32, 1],
            ]
        );
        assert_eq!(
            &cl.commands()[..2],
            &[
                crate::gpu::Command::FlushBuffer(root.seed_params),
                crate::gpu::Command::FlushBuffer(root.debug),
            ]
        );
        drop(ctx);
        f.device.submit(&[&cl]).unwrap();
    }

    #[test]
    fn resize_rebinds_child_outputs() {
        let mut f = Fixture::new();
        let mut ctx = PassContext::new(&mut f.device, &mut f.cache, &mut f.outputs);
        let mut root = CompositePass::new(&mut ctx, f.camera).unwrap();
        root.attach_scene(&mut ctx, &f.scene).unwrap();

        for size in [Extent::d2(16, 16), Extent::d2(48, 24)] {
            root.resize(&mut ctx, size).unwrap();
            for (binding, name) in [
                (3, names::DIR_T),
                (4, names::UV_OBJECT_NORMAL),
                (5, names::SHADOW_LIGHTING),
                (6, names::CLOUDS),
            ] {
                let Some(Subresource::Image(id)) = ctx.device.descriptor(root.descriptors, binding)
                else {
                    panic!("binding {binding} not an image");
                };
                assert_eq!(Some(id), ctx.outputs.image(name));
                assert_eq!(ctx.device.image_desc(id).unwrap().extent, size);
            }
            assert_eq!(
                ctx.device.buffer_size(root.accumulation.id().unwrap()),
                Some(size.width as u64 * size.height as u64 * 16)
            );
        }
    }

    #[test]
    fn update_starts_a_new_seed_epoch() {
        let mut f = Fixture::new();
        let mut ctx = PassContext::new(&mut f.device, &mut f.cache, &mut f.outputs);
        let mut root = CompositePass::new(&mut ctx, f.camera)
            .unwrap()
            .with_rng(StdRng::seed_from_u64(7));
        root.update(&mut ctx, 0.0).unwrap();
        let first = root.seed_uniform();
        root.update(&mut ctx, 0.0).unwrap();
        let second = root.seed_uniform();
        assert_eq!(second.epoch, first.epoch + 1);
        assert!(second
            .offsets
            .iter()
            .all(|o| (-SEED_RANGE..SEED_RANGE).contains(o)));
    }

    #[test]
    fn hot_reload_of_a_child_pipeline_dirties_the_root() {
        let mut f = Fixture::new();
        let mut ctx = PassContext::new(&mut f.device, &mut f.cache, &mut f.outputs);
        let mut root = CompositePass::new(&mut ctx, f.camera).unwrap();
        root.attach_scene(&mut ctx, &f.scene).unwrap();
        root.resize(&mut ctx, Extent::d2(8, 8)).unwrap();
        let mut cl = CommandList::new("frame");
        for _ in 0..2 {
            cl.clear();
            root.record(&mut ctx, &mut cl).unwrap();
            root.mark_recorded();
        }
        assert!(!root.needs_rerecord());

        // A cached name returns the existing handle regardless of the desc.
        let shadow = ctx
            .cache
            .pipeline(
                ctx.device,
                "Shadow trace",
                &PipelineDesc::new("", crate::gpu::PipelineLayoutId::from_raw(0), [1, 1, 1]),
            )
            .unwrap();
        assert!(root.on_pipeline_changed(shadow));
        assert!(root.needs_rerecord());
    }
}
