//! The concrete render passes.
//!
//! ```text
//! CompositePass (root)
//! ├── RaygenPass         raygen.dir_t, raygen.uv_object_normal
//! ├── ShadowPass         shadow.lighting, shadow.history
//! └── CloudPass
//!     ├── CloudNoisePass HQ   clouds.noise_hq
//!     ├── CloudNoisePass LQ   clouds.noise_lq
//!     └── CloudShadingPass    clouds.output
//! ```
//!
//! Viewport-sized pipelines bind the camera at set 0, the scene at set 1 and
//! their own resources at set 2. The noise generators only use set 0.

mod cloud;
mod composite;
mod raygen;
mod shadow;

pub use cloud::{CloudNoisePass, CloudPass, CloudShadingPass, CloudUniform, NoiseQuality};
pub use composite::{CompositePass, DebugUniform, SeedState, SeedUniform};
pub use raygen::RaygenPass;
pub use shadow::{ShadowPass, ShadowUniform};

use crate::camera::TILE;
use crate::gpu::{
    BindingKind, BindingLayout, DescriptorSetId, ImageDimension, ImageFormat, PipelineLayoutDesc,
};
use crate::scene::{Scene, SceneId, scene_layout};

/// Workgroup of the viewport-sized pipelines.
pub const GROUP_2D: [u32; 3] = [TILE, TILE, 1];

/// Output names shared between producers and consumers.
pub mod names {
    pub const DIR_T: &str = "raygen.dir_t";
    pub const UV_OBJECT_NORMAL: &str = "raygen.uv_object_normal";
    pub const SHADOW_LIGHTING: &str = "shadow.lighting";
    pub const SHADOW_HISTORY: &str = "shadow.history";
    pub const SHADOW_VISIBILITY: &str = "shadow.visibility";
    pub const NOISE_HQ: &str = "clouds.noise_hq";
    pub const NOISE_LQ: &str = "clouds.noise_lq";
    pub const CLOUD_UNIFORM: &str = "clouds.uniform";
    pub const CLOUD_LIGHTS: &str = "clouds.lights";
    pub const CLOUDS: &str = "clouds.output";
    pub const OUTPUT: &str = "composite.output";
    pub const ACCUMULATION: &str = "composite.accumulation";
    pub const SEED: &str = "composite.seed";
}

/// Camera and scene sets followed by the pass' own set 2 bindings.
pub(crate) fn pass_layout(own: &[BindingLayout]) -> PipelineLayoutDesc {
    scene_layout().with(own.iter().cloned())
}

pub(crate) const fn storage_image(
    name: &'static str,
    binding: u32,
    format: ImageFormat,
) -> BindingLayout {
    BindingLayout::new(
        name,
        2,
        binding,
        BindingKind::StorageImage {
            format,
            dimension: ImageDimension::D2,
        },
    )
}

pub(crate) const fn sampled_image(name: &'static str, binding: u32) -> BindingLayout {
    BindingLayout::new(
        name,
        2,
        binding,
        BindingKind::SampledImage {
            dimension: ImageDimension::D2,
            filterable: false,
        },
    )
}

pub(crate) const fn storage_buffer(
    name: &'static str,
    binding: u32,
    read_only: bool,
) -> BindingLayout {
    BindingLayout::new(name, 2, binding, BindingKind::StorageBuffer { read_only })
}

pub(crate) const fn uniform_buffer(name: &'static str, binding: u32) -> BindingLayout {
    BindingLayout::new(name, 2, binding, BindingKind::UniformBuffer)
}

/// Non-owning view of the attached scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct SceneBinding {
    id: Option<SceneId>,
    descriptors: Option<DescriptorSetId>,
}

impl SceneBinding {
    /// Points at `scene`. Returns whether the scene identity changed.
    pub fn attach(&mut self, scene: &dyn Scene) -> bool {
        let changed = self.id != Some(scene.id());
        self.id = Some(scene.id());
        self.descriptors = Some(scene.descriptors());
        changed
    }

    /// Camera, scene and `own` sets in binding order, once a scene is
    /// attached.
    pub fn sets(
        &self,
        camera: DescriptorSetId,
        own: DescriptorSetId,
    ) -> Option<[DescriptorSetId; 3]> {
        Some([camera, self.descriptors?, own])
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the pass tests.

    use crate::cache::{InlineShaders, ResourceCache};
    use crate::camera::CAMERA_BINDINGS;
    use crate::error::Result;
    use crate::gpu::{
        BufferDesc, DescriptorSetId, DescriptorsDesc, GpuDevice, PipelineLayoutDesc, Subresource,
    };

    /// Every shader the passes load, as trivial programs.
    pub fn shaders() -> InlineShaders {
        [
            super::raygen::SHADER,
            super::shadow::TRACE_SHADER,
            super::shadow::LIGHTING_SHADER,
            super::cloud::NOISE_SHADER,
            super::cloud::SHADING_SHADER,
            super::composite::INIT_SHADER,
            super::composite::COMPOSITE_SHADER,
        ]
        .into_iter()
        .fold(InlineShaders::new(), |shaders, path| {
            shaders.with(path, &format!("// {path}"))
        })
    }

    pub fn cache() -> ResourceCache {
        ResourceCache::new(shaders())
    }

    /// A flushed camera set backed by a zeroed uniform.
    pub fn camera_set(
        device: &mut dyn GpuDevice,
        cache: &mut ResourceCache,
    ) -> Result<DescriptorSetId> {
        let layout = cache.layout(
            device,
            "Camera layout",
            &PipelineLayoutDesc::new(CAMERA_BINDINGS.to_vec()),
        )?;
        let buffer = device.create_buffer(&BufferDesc::uniform(
            "Camera",
            std::mem::size_of::<crate::camera::CameraUniform>() as u64,
        ))?;
        let set = device.create_descriptors(&DescriptorsDesc::new(
            "Camera descriptors",
            layout,
            0,
            vec![(0, Subresource::Buffer(buffer))],
        ))?;
        device.flush_descriptors(set)?;
        Ok(set)
    }
}
