use log::debug;

use super::{
    GROUP_2D, SceneBinding, names, pass_layout, sampled_image, storage_buffer, storage_image,
    uniform_buffer,
};
use crate::error::Result;
use crate::gpu::{
    BindingLayout, BufferDesc, BufferId, BufferUsage, CommandList, DescriptorSetId,
    DescriptorsDesc, Extent, ImageFormat, PipelineDesc, PipelineId, Subresource,
};
use crate::pass::{DirtyFlag, InputBindings, Pass, PassContext, SizedBuffer, SizedImages};
use crate::params::{Params, ShadowParams};
use crate::scene::Scene;

pub(crate) const TRACE_SHADER: &str = "`/shaders/shadow.comp";
pub(crate) const LIGHTING_SHADER: &str = "`/shaders/lighting.comp";

/// One 16×4 tile of the trace dispatch writes one visibility bit per thread.
const TRACE_GROUP: [u32; 3] = [16, 4, 1];
/// Bytes per tile and sample: 64 visibility bits.
const TILE_STRIDE: u64 = 8;

const TRACE_BINDINGS: [BindingLayout; 4] = [
    uniform_buffer("props", 20),
    storage_buffer("seed", 21, true),
    storage_buffer("visibility", 22, false),
    sampled_image("dir_t", 23),
];

const LIGHTING_BINDINGS: [BindingLayout; 7] = [
    uniform_buffer("props", 20),
    storage_buffer("seed", 21, true),
    storage_buffer("visibility", 22, true),
    sampled_image("dir_t", 23),
    sampled_image("uv_object_normal", 24),
    storage_image("lighting", 25, ImageFormat::Rgba16Float),
    storage_image("history", 26, ImageFormat::Rgba32Float),
];

/// GPU layout of the shadow properties uniform.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowUniform {
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    /// Trace tiles per row.
    pub tiles_x: u32,
}

/// Size of the visibility buffer for `size` at `samples` shadow rays per
/// pixel.
pub fn visibility_bytes(size: Extent, samples: u32) -> u64 {
    let [tx, ty, _] = size.tiles(TRACE_GROUP);
    TILE_STRIDE * tx as u64 * ty as u64 * samples.max(1) as u64
}

/// Traces shadow rays from the primary hits, then resolves direct lighting.
///
/// The trace dispatch covers `(width, height, samples)` threads, so changing
/// [`ShadowParams::samples`] changes the recording.
pub struct ShadowPass {
    camera: DescriptorSetId,
    scene: SceneBinding,
    trace: PipelineId,
    lighting: PipelineId,
    trace_set: DescriptorSetId,
    lighting_set: DescriptorSetId,
    trace_inputs: InputBindings,
    lighting_inputs: InputBindings,
    images: SizedImages,
    visibility: SizedBuffer,
    props: BufferId,
    params: ShadowParams,
    recorded_samples: u32,
    dirty: DirtyFlag,
}

impl ShadowPass {
    pub fn new(ctx: &mut PassContext<'_>, camera: DescriptorSetId) -> Result<Self> {
        let trace_layout =
            ctx.cache
                .layout(ctx.device, "Shadow layout", &pass_layout(&TRACE_BINDINGS))?;
        let lighting_layout = ctx.cache.layout(
            ctx.device,
            "Lighting layout",
            &pass_layout(&LIGHTING_BINDINGS),
        )?;
        let trace = ctx.cache.pipeline(
            ctx.device,
            "Shadow trace",
            &PipelineDesc::new(TRACE_SHADER, trace_layout, TRACE_GROUP),
        )?;
        let lighting = ctx.cache.pipeline(
            ctx.device,
            "Shadow lighting",
            &PipelineDesc::new(LIGHTING_SHADER, lighting_layout, GROUP_2D),
        )?;

        let props = ctx.device.create_buffer(&BufferDesc::uniform(
            "Shadow props",
            std::mem::size_of::<ShadowUniform>() as u64,
        ))?;
        let trace_set = ctx.device.create_descriptors(&DescriptorsDesc::new(
            "Shadow trace descriptors",
            trace_layout,
            2,
            vec![(20, Subresource::Buffer(props))],
        ))?;
        let lighting_set = ctx.device.create_descriptors(&DescriptorsDesc::new(
            "Shadow lighting descriptors",
            lighting_layout,
            2,
            vec![(20, Subresource::Buffer(props))],
        ))?;

        let params = ShadowParams::default();
        Ok(Self {
            camera,
            scene: SceneBinding::default(),
            trace,
            lighting,
            trace_set,
            lighting_set,
            trace_inputs: InputBindings::new(trace_set, &[(21, names::SEED), (23, names::DIR_T)]),
            lighting_inputs: InputBindings::new(
                lighting_set,
                &[
                    (21, names::SEED),
                    (23, names::DIR_T),
                    (24, names::UV_OBJECT_NORMAL),
                ],
            ),
            images: SizedImages::new(&[
                (names::SHADOW_LIGHTING, ImageFormat::Rgba16Float),
                (names::SHADOW_HISTORY, ImageFormat::Rgba32Float),
            ]),
            visibility: SizedBuffer::new(names::SHADOW_VISIBILITY, BufferUsage::Storage),
            props,
            recorded_samples: params.samples,
            params,
            dirty: DirtyFlag::default(),
        })
    }

    pub fn params(&self) -> &ShadowParams {
        &self.params
    }

    /// Recreates the visibility buffer when the size or sample count
    /// changed and binds it into both sets.
    fn sync_visibility(&mut self, ctx: &mut PassContext<'_>) -> Result<()> {
        let bytes = visibility_bytes(self.size(), self.params.samples);
        if !self.visibility.ensure(ctx, bytes)? {
            return Ok(());
        }
        let Some(buffer) = self.visibility.id() else {
            return Ok(());
        };
        for set in [self.trace_set, self.lighting_set] {
            ctx.device
                .update_descriptor(set, 22, Subresource::Buffer(buffer))?;
            ctx.device.flush_descriptors(set)?;
        }
        debug!(
            "Shadow visibility buffer: {bytes} bytes for {} sample(s)",
            self.params.samples
        );
        Ok(())
    }

    fn write_props(&self, ctx: &mut PassContext<'_>) -> Result<()> {
        let size = self.size();
        let props = ShadowUniform {
            width: size.width,
            height: size.height,
            samples: self.params.samples,
            tiles_x: size.tiles(TRACE_GROUP)[0],
        };
        ctx.device
            .write_buffer(self.props, 0, bytemuck::bytes_of(&props))
    }
}

impl Pass for ShadowPass {
    fn name(&self) -> &str {
        "shadow"
    }

    fn size(&self) -> Extent {
        self.images.size()
    }

    fn resize(&mut self, ctx: &mut PassContext<'_>, size: Extent) -> Result<()> {
        if self.images.resize(ctx, size)? {
            for (binding, id) in [25, 26].into_iter().zip(self.images.ids()) {
                ctx.device
                    .update_descriptor(self.lighting_set, binding, Subresource::Image(*id))?;
            }
            ctx.device.flush_descriptors(self.lighting_set)?;
            self.dirty.mark();
        }
        self.sync_visibility(ctx)?;
        self.trace_inputs.refresh(ctx.device, ctx.outputs)?;
        self.lighting_inputs.refresh(ctx.device, ctx.outputs)?;
        Ok(())
    }

    fn update(&mut self, ctx: &mut PassContext<'_>, _dt: f32) -> Result<()> {
        self.write_props(ctx)
    }

    fn attach_scene(&mut self, _ctx: &mut PassContext<'_>, scene: &dyn Scene) -> Result<()> {
        if self.scene.attach(scene) {
            self.dirty.mark();
        }
        Ok(())
    }

    fn needs_rerecord(&self) -> bool {
        self.dirty.is_dirty() || self.params.samples != self.recorded_samples
    }

    fn record(&mut self, ctx: &mut PassContext<'_>, cl: &mut CommandList) -> Result<()> {
        self.sync_visibility(ctx)?;
        self.write_props(ctx)?;
        self.trace_inputs.refresh(ctx.device, ctx.outputs)?;
        self.lighting_inputs.refresh(ctx.device, ctx.outputs)?;
        self.recorded_samples = self.params.samples;

        let (Some(trace_sets), Some(lighting_sets)) = (
            self.scene.sets(self.camera, self.trace_set),
            self.scene.sets(self.camera, self.lighting_set),
        ) else {
            debug!("shadow: no scene attached, skipping");
            return Ok(());
        };
        let size = self.size();
        cl.flush_buffer(self.props);
        cl.bind_descriptors(&trace_sets);
        cl.bind_pipeline(self.trace);
        cl.dispatch([size.width, size.height, self.params.samples]);
        cl.bind_descriptors(&lighting_sets);
        cl.bind_pipeline(self.lighting);
        cl.dispatch_extent(size);
        Ok(())
    }

    fn mark_recorded(&mut self) {
        self.dirty.clear();
    }

    fn on_pipeline_changed(&mut self, pipeline: PipelineId) -> bool {
        let hit = pipeline == self.trace || pipeline == self.lighting;
        if hit {
            self.dirty.mark();
        }
        hit
    }

    fn release(&mut self, ctx: &mut PassContext<'_>) {
        self.images.release(ctx);
        self.visibility.release(ctx);
        ctx.device.destroy_descriptors(self.trace_set);
        ctx.device.destroy_descriptors(self.lighting_set);
        ctx.device.destroy_buffer(self.props);
    }

    fn params_mut(&mut self) -> Vec<&mut dyn Params> {
        vec![&mut self.params]
    }
}
