//! Volumetric clouds.
//!
//! [`CloudPass`] owns the cloud uniform (shape, lighting and the wind
//! offset it advances every frame) and sequences three children: two noise
//! generators filling fixed-size 3D volumes, and the shading pass that
//! marches the viewport through the active volume.
//!
//! Interactive rendering samples the 32³ volume, offline capture the 128³
//! one.

use log::{debug, info};

use super::{
    GROUP_2D, SceneBinding, names, pass_layout, sampled_image, storage_buffer, storage_image,
    uniform_buffer,
};
use crate::error::Result;
use crate::gpu::{
    BindingKind, BindingLayout, BufferDesc, BufferId, CommandList, DescriptorSetId,
    DescriptorsDesc, Extent, ImageDesc, ImageDimension, ImageFormat, ImageId, PipelineDesc,
    PipelineId, PipelineLayoutDesc, SamplerDesc, Subresource,
};
use crate::pass::{DirtyFlag, InputBindings, Pass, PassContext, PassGroup, RenderMode, SizedImages};
use crate::params::{CloudParams, NoiseParams, Params};
use crate::scene::Scene;

pub(crate) const NOISE_SHADER: &str = "`/shaders/cloud_noise.comp";
pub(crate) const SHADING_SHADER: &str = "`/shaders/clouds.comp";

const NOISE_GROUP: [u32; 3] = [8, 8, 4];

const NOISE_BINDINGS: [BindingLayout; 2] = [
    BindingLayout::new(
        "volume",
        0,
        0,
        BindingKind::StorageImage {
            format: ImageFormat::Rgba8Unorm,
            dimension: ImageDimension::D3,
        },
    ),
    BindingLayout::new("noise", 0, 1, BindingKind::UniformBuffer),
];

const SHADING_BINDINGS: [BindingLayout; 7] = [
    storage_image("clouds", 30, ImageFormat::Rgba16Float),
    sampled_image("dir_t", 31),
    BindingLayout::new(
        "noise_volume",
        2,
        32,
        BindingKind::SampledImage {
            dimension: ImageDimension::D3,
            filterable: true,
        },
    ),
    BindingLayout::new("noise_sampler", 2, 33, BindingKind::Sampler { filtering: true }),
    uniform_buffer("cloud", 34),
    storage_buffer("lights", 35, true),
    storage_buffer("seed", 36, true),
];

/// Resolution of a noise volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NoiseQuality {
    /// 128³, used for offline capture.
    High,
    /// 32³, used interactively.
    Low,
}

impl NoiseQuality {
    pub fn for_mode(mode: RenderMode) -> Self {
        match mode {
            RenderMode::Interactive => NoiseQuality::Low,
            RenderMode::Offline => NoiseQuality::High,
        }
    }

    pub fn edge(self) -> u32 {
        match self {
            NoiseQuality::High => 128,
            NoiseQuality::Low => 32,
        }
    }

    pub fn output(self) -> &'static str {
        match self {
            NoiseQuality::High => names::NOISE_HQ,
            NoiseQuality::Low => names::NOISE_LQ,
        }
    }
}

/// GPU layout of the cloud uniform.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CloudUniform {
    pub offset: [f32; 3],
    pub absorption: f32,
    pub height_a: f32,
    pub height_b: f32,
    pub threshold: f32,
    pub multiplier: f32,
    pub scale_xz: f32,
    pub scale_y: f32,
    pub samples: u32,
    pub light_samples: u32,
    pub directional_light_count: u32,
    pub time: f32,
    pub _pad: [u32; 2],
}

/// GPU layout of the noise generation uniform.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct NoiseUniform {
    /// Feature points per axis for each octave; `w` is unused.
    points: [[u32; 4]; 3],
    persistence: f32,
    inverted: u32,
    edge: u32,
    _pad: u32,
}

impl NoiseUniform {
    fn new(params: &NoiseParams, edge: u32) -> Self {
        let [a, b, c] = params.points;
        Self {
            points: [
                [a[0], a[1], a[2], 0],
                [b[0], b[1], b[2], 0],
                [c[0], c[1], c[2], 0],
            ],
            persistence: params.persistence,
            inverted: params.inverted as u32,
            edge,
            _pad: 0,
        }
    }
}

// ============================================================================
// Noise generation
// ============================================================================

/// Fills one cubic Worley noise volume.
///
/// The volume is generated once and again whenever [`NoiseParams`] change.
/// The generating dispatch stays in the recording until a submission
/// carrying it succeeded; the following frame records without it.
pub struct CloudNoisePass {
    quality: NoiseQuality,
    pipeline: PipelineId,
    descriptors: DescriptorSetId,
    volume: ImageId,
    uniform: BufferId,
    params: NoiseParams,
    /// Parameters the volume on the GPU was generated with.
    generated: Option<NoiseParams>,
    /// Parameters of the dispatch in the current recording, if any.
    recorded: Option<NoiseParams>,
    dirty: DirtyFlag,
}

impl CloudNoisePass {
    pub fn new(ctx: &mut PassContext<'_>, quality: NoiseQuality) -> Result<Self> {
        let layout = ctx.cache.layout(
            ctx.device,
            "Cloud noise layout",
            &PipelineLayoutDesc::new(NOISE_BINDINGS.to_vec()),
        )?;
        let pipeline = ctx.cache.pipeline(
            ctx.device,
            "Cloud noise",
            &PipelineDesc::new(NOISE_SHADER, layout, NOISE_GROUP),
        )?;
        let volume = ctx.device.create_image(&ImageDesc::d3(
            quality.output(),
            ImageFormat::Rgba8Unorm,
            Extent::cube(quality.edge()),
        ))?;
        ctx.outputs.publish(quality.output(), Subresource::Image(volume));
        let uniform = ctx.device.create_buffer(&BufferDesc::uniform(
            format!("{} params", quality.output()),
            std::mem::size_of::<NoiseUniform>() as u64,
        ))?;
        let descriptors = ctx.device.create_descriptors(&DescriptorsDesc::new(
            format!("{} descriptors", quality.output()),
            layout,
            0,
            vec![
                (0, Subresource::Image(volume)),
                (1, Subresource::Buffer(uniform)),
            ],
        ))?;
        ctx.device.flush_descriptors(descriptors)?;

        Ok(Self {
            quality,
            pipeline,
            descriptors,
            volume,
            uniform,
            params: NoiseParams::default(),
            generated: None,
            recorded: None,
            dirty: DirtyFlag::default(),
        })
    }

    pub fn quality(&self) -> NoiseQuality {
        self.quality
    }

    pub fn volume(&self) -> ImageId {
        self.volume
    }

    fn needs_generation(&self) -> bool {
        self.generated != Some(self.params)
    }
}

impl Pass for CloudNoisePass {
    fn name(&self) -> &str {
        self.quality.output()
    }

    fn size(&self) -> Extent {
        Extent::cube(self.quality.edge())
    }

    /// Noise volumes do not follow the viewport.
    fn resize(&mut self, _ctx: &mut PassContext<'_>, _size: Extent) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, _ctx: &mut PassContext<'_>, _dt: f32) -> Result<()> {
        Ok(())
    }

    fn attach_scene(&mut self, _ctx: &mut PassContext<'_>, _scene: &dyn Scene) -> Result<()> {
        Ok(())
    }

    /// Stale when the dispatch for the current parameters is missing from
    /// the recording, or when it already ran and can be dropped.
    fn needs_rerecord(&self) -> bool {
        let missing = self.needs_generation() && self.recorded != Some(self.params);
        let spent = self.recorded.is_some() && self.recorded == self.generated;
        self.dirty.is_dirty() || missing || spent
    }

    fn record(&mut self, ctx: &mut PassContext<'_>, cl: &mut CommandList) -> Result<()> {
        if !self.needs_generation() {
            self.recorded = None;
            return Ok(());
        }
        let uniform = NoiseUniform::new(&self.params, self.quality.edge());
        ctx.device
            .write_buffer(self.uniform, 0, bytemuck::bytes_of(&uniform))?;
        cl.flush_buffer(self.uniform);
        cl.bind_descriptors(&[self.descriptors]);
        cl.bind_pipeline(self.pipeline);
        cl.dispatch(self.size().to_array());
        debug!("Recorded {} noise generation", self.quality.output());
        self.recorded = Some(self.params);
        Ok(())
    }

    fn mark_recorded(&mut self) {
        self.dirty.clear();
    }

    fn on_submitted(&mut self) {
        if let Some(params) = self.recorded {
            if self.generated != Some(params) {
                debug!("Generated {} noise volume", self.quality.output());
            }
            self.generated = Some(params);
        }
    }

    fn on_pipeline_changed(&mut self, pipeline: PipelineId) -> bool {
        let hit = pipeline == self.pipeline;
        if hit {
            self.generated = None;
            self.dirty.mark();
        }
        hit
    }

    fn release(&mut self, ctx: &mut PassContext<'_>) {
        ctx.device.destroy_descriptors(self.descriptors);
        ctx.device.destroy_image(self.volume);
        ctx.device.destroy_buffer(self.uniform);
        ctx.outputs.withdraw(self.quality.output());
    }

    fn params_mut(&mut self) -> Vec<&mut dyn Params> {
        vec![&mut self.params]
    }
}

// ============================================================================
// Shading
// ============================================================================

/// Ray marches the cloud layer into `clouds.output`.
pub struct CloudShadingPass {
    camera: DescriptorSetId,
    scene: SceneBinding,
    pipeline: PipelineId,
    descriptors: DescriptorSetId,
    images: SizedImages,
    inputs: InputBindings,
    mode: RenderMode,
    dirty: DirtyFlag,
}

impl CloudShadingPass {
    pub fn new(ctx: &mut PassContext<'_>, camera: DescriptorSetId) -> Result<Self> {
        let layout = ctx.cache.layout(
            ctx.device,
            "Cloud shading layout",
            &pass_layout(&SHADING_BINDINGS),
        )?;
        let pipeline = ctx.cache.pipeline(
            ctx.device,
            "Cloud shading",
            &PipelineDesc::new(SHADING_SHADER, layout, GROUP_2D),
        )?;
        let sampler = ctx
            .cache
            .sampler(ctx.device, "Cloud noise sampler", &SamplerDesc::LINEAR_REPEAT)?;
        let descriptors = ctx.device.create_descriptors(&DescriptorsDesc::new(
            "Cloud shading descriptors",
            layout,
            2,
            vec![(33, Subresource::Sampler(sampler))],
        ))?;
        let mode = RenderMode::Interactive;

        Ok(Self {
            camera,
            scene: SceneBinding::default(),
            pipeline,
            descriptors,
            images: SizedImages::new(&[(names::CLOUDS, ImageFormat::Rgba16Float)]),
            inputs: Self::inputs(descriptors, mode),
            mode,
            dirty: DirtyFlag::default(),
        })
    }

    fn inputs(set: DescriptorSetId, mode: RenderMode) -> InputBindings {
        InputBindings::new(
            set,
            &[
                (31, names::DIR_T),
                (32, NoiseQuality::for_mode(mode).output()),
                (34, names::CLOUD_UNIFORM),
                (35, names::CLOUD_LIGHTS),
                (36, names::SEED),
            ],
        )
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }
}

impl Pass for CloudShadingPass {
    fn name(&self) -> &str {
        "cloud_shading"
    }

    fn size(&self) -> Extent {
        self.images.size()
    }

    fn resize(&mut self, ctx: &mut PassContext<'_>, size: Extent) -> Result<()> {
        if self.images.resize(ctx, size)? {
            if let Some(id) = self.images.image(0) {
                ctx.device
                    .update_descriptor(self.descriptors, 30, Subresource::Image(id))?;
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
            debug!("clouds: no scene attached, skipping");
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

    fn prepare_mode(&mut self, mode: RenderMode) {
        if mode == self.mode {
            return;
        }
        self.mode = mode;
        self.inputs = Self::inputs(self.descriptors, mode);
        self.dirty.mark();
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

// ============================================================================
// Group
// ============================================================================

/// The cloud group: noise generators followed by shading.
pub struct CloudPass {
    uniform: BufferId,
    params: CloudParams,
    /// Accumulated wind translation on x and z.
    wind_offset: [f32; 2],
    time: f32,
    lights: Option<BufferId>,
    directional_lights: u32,
    size: Extent,
    mode: RenderMode,
    children: PassGroup,
    dirty: DirtyFlag,
}

impl CloudPass {
    pub fn new(ctx: &mut PassContext<'_>, camera: DescriptorSetId) -> Result<Self> {
        let uniform = ctx.device.create_buffer(&BufferDesc::uniform(
            "Cloud uniform",
            std::mem::size_of::<CloudUniform>() as u64,
        ))?;
        ctx.outputs
            .publish(names::CLOUD_UNIFORM, Subresource::Buffer(uniform));

        let mut children = PassGroup::new();
        children.push(CloudNoisePass::new(ctx, NoiseQuality::High)?);
        children.push(CloudNoisePass::new(ctx, NoiseQuality::Low)?);
        children.push(CloudShadingPass::new(ctx, camera)?);

        Ok(Self {
            uniform,
            params: CloudParams::default(),
            wind_offset: [0.0; 2],
            time: 0.0,
            lights: None,
            directional_lights: 0,
            size: Extent::default(),
            mode: RenderMode::Interactive,
            children,
            dirty: DirtyFlag::default(),
        })
    }

    pub fn params(&self) -> &CloudParams {
        &self.params
    }

    pub fn wind_offset(&self) -> [f32; 2] {
        self.wind_offset
    }

    pub fn children(&self) -> &PassGroup {
        &self.children
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn uniform(&self) -> CloudUniform {
        let p = &self.params;
        CloudUniform {
            offset: [self.wind_offset[0], p.offset_y, self.wind_offset[1]],
            absorption: p.absorption,
            height_a: p.height_a,
            height_b: p.height_b,
            threshold: p.threshold,
            multiplier: p.multiplier,
            scale_xz: p.scale_xz,
            scale_y: p.scale_y,
            samples: p.samples,
            light_samples: p.light_samples,
            directional_light_count: self.directional_lights,
            time: self.time,
            _pad: [0; 2],
        }
    }
}

impl Pass for CloudPass {
    fn name(&self) -> &str {
        "clouds"
    }

    fn size(&self) -> Extent {
        self.size
    }

    fn resize(&mut self, ctx: &mut PassContext<'_>, size: Extent) -> Result<()> {
        if size != self.size {
            self.size = size;
            self.dirty.mark();
        }
        self.children.resize(ctx, size)
    }

    fn update(&mut self, ctx: &mut PassContext<'_>, dt: f32) -> Result<()> {
        let step = dt * self.params.wind_speed;
        self.wind_offset[0] += step * self.params.wind_direction_x;
        self.wind_offset[1] += step * self.params.wind_direction_z;
        self.time += dt;
        ctx.device
            .write_buffer(self.uniform, 0, bytemuck::bytes_of(&self.uniform()))?;
        self.children.update(ctx, dt)
    }

    fn attach_scene(&mut self, ctx: &mut PassContext<'_>, scene: &dyn Scene) -> Result<()> {
        let lights = scene.light_buffer();
        if self.lights != Some(lights) {
            ctx.outputs
                .publish(names::CLOUD_LIGHTS, Subresource::Buffer(lights));
            self.lights = Some(lights);
        }
        self.directional_lights = scene.directional_light_count();
        self.children.attach_scene(ctx, scene)
    }

    fn needs_rerecord(&self) -> bool {
        self.dirty.is_dirty() || self.children.needs_rerecord()
    }

    fn record(&mut self, ctx: &mut PassContext<'_>, cl: &mut CommandList) -> Result<()> {
        cl.flush_buffer(self.uniform);
        self.children.record(ctx, cl)
    }

    fn mark_recorded(&mut self) {
        self.dirty.clear();
        self.children.mark_recorded();
    }

    fn on_submitted(&mut self) {
        self.children.on_submitted();
    }

    fn prepare_mode(&mut self, mode: RenderMode) {
        if mode != self.mode {
            info!(
                "Clouds sampling the {} noise volume",
                NoiseQuality::for_mode(mode).output()
            );
            self.mode = mode;
        }
        self.children.prepare_mode(mode);
    }

    fn on_pipeline_changed(&mut self, pipeline: PipelineId) -> bool {
        self.children.on_pipeline_changed(pipeline)
    }

    fn release(&mut self, ctx: &mut PassContext<'_>) {
        self.children.release(ctx);
        ctx.device.destroy_buffer(self.uniform);
        ctx.outputs.withdraw(names::CLOUD_UNIFORM);
        ctx.outputs.withdraw(names::CLOUD_LIGHTS);
    }

    fn params_mut(&mut self) -> Vec<&mut dyn Params> {
        let mut params: Vec<&mut dyn Params> = vec![&mut self.params];
        params.extend(self.children.params_mut());
        params
    }
}
