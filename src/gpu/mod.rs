//! GPU device interface and backend-neutral resource descriptions.
//!
//! Passes never talk to wgpu directly. They create images, buffers, samplers,
//! layouts, pipelines and descriptor sets through [`GpuDevice`] and get small
//! copyable handles back. Commands are appended to a [`CommandList`], which the
//! device replays on every submission.
//!
//! Two devices implement the trait:
//!
//! - [`WgpuDevice`]: the real backend, created from a winit window.
//! - [`HeadlessDevice`]: an in-memory device that records everything it is
//!   asked to do. Used by the test suite and for dry runs without a GPU.
//!
//! # Descriptor sets
//!
//! Layouts follow a fixed set convention: set 0 holds the camera, set 1 the
//! scene, set 2 the pass' own resources. A descriptor set is filled with
//! [`GpuDevice::update_descriptor`] and becomes visible to commands after
//! [`GpuDevice::flush_descriptors`].

mod command;
mod headless;
mod wgpu_device;

pub use command::{Command, CommandList};
pub use headless::{HeadlessDevice, Submission};
pub use wgpu_device::WgpuDevice;

use crate::error::{RenderError, Result};

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        slotmap::new_key_type! {
            $(#[$meta])*
            pub struct $name;
        }

        impl $name {
            /// Human readable handle kind, used in error messages.
            pub const KIND: &'static str = $kind;

            /// Raw numeric value of the handle.
            pub fn raw(self) -> u64 {
                slotmap::Key::data(&self).as_ffi()
            }

            #[cfg(test)]
            pub(crate) fn from_raw(raw: u64) -> Self {
                Self::from(slotmap::KeyData::from_ffi(raw))
            }
        }
    };
}

define_handle!(
    /// Handle to a 2D or 3D image owned by the device.
    ImageId,
    "image"
);
define_handle!(
    /// Handle to a GPU buffer.
    BufferId,
    "buffer"
);
define_handle!(
    /// Handle to a sampler.
    SamplerId,
    "sampler"
);
define_handle!(
    /// Handle to a pipeline layout (one bind group layout per set).
    PipelineLayoutId,
    "pipeline layout"
);
define_handle!(
    /// Handle to a compiled compute pipeline.
    PipelineId,
    "pipeline"
);
define_handle!(
    /// Handle to one descriptor set (bind group).
    DescriptorSetId,
    "descriptor set"
);

/// A 2D or 3D size in texels. 2D extents have `depth == 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent {
    pub const fn d2(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    pub const fn d3(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// A cube of `size` texels on every axis.
    pub const fn cube(size: u32) -> Self {
        Self::d3(size, size, size)
    }

    pub fn texel_count(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }

    /// Width and height exchanged (portrait output).
    pub fn swapped(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
            depth: self.depth,
        }
    }

    /// Number of tiles of `tile` texels needed to cover the extent, per axis.
    pub fn tiles(&self, tile: [u32; 3]) -> [u32; 3] {
        [
            self.width.div_ceil(tile[0].max(1)),
            self.height.div_ceil(tile[1].max(1)),
            self.depth.div_ceil(tile[2].max(1)),
        ]
    }

    pub fn to_array(self) -> [u32; 3] {
        [self.width, self.height, self.depth]
    }
}

/// Size limits of the device. Creating a resource above them fails with
/// [`RenderError::ResourceCreation`] instead of reaching the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_texture_dimension_2d: u32,
    pub max_texture_dimension_3d: u32,
    pub max_buffer_size: u64,
    pub max_storage_buffer_binding_size: u64,
    pub max_uniform_buffer_binding_size: u64,
}

impl Default for DeviceLimits {
    /// The guaranteed minimums of a WebGPU device.
    fn default() -> Self {
        Self {
            max_texture_dimension_2d: 8192,
            max_texture_dimension_3d: 2048,
            max_buffer_size: 256 << 20,
            max_storage_buffer_binding_size: 128 << 20,
            max_uniform_buffer_binding_size: 64 << 10,
        }
    }
}

impl DeviceLimits {
    pub fn check_image(&self, desc: &ImageDesc) -> Result<()> {
        let max = match desc.dimension {
            ImageDimension::D2 => self.max_texture_dimension_2d,
            ImageDimension::D3 => self.max_texture_dimension_3d,
        };
        let largest = desc.extent.width.max(desc.extent.height).max(desc.extent.depth);
        if largest > max {
            return Err(RenderError::ResourceCreation {
                label: desc.label.clone(),
                extent: desc.extent,
                reason: format!("dimension {largest} exceeds the device limit of {max}"),
            });
        }
        Ok(())
    }

    pub fn check_buffer(&self, desc: &BufferDesc) -> Result<()> {
        let binding = match desc.usage {
            BufferUsage::Uniform => self.max_uniform_buffer_binding_size,
            BufferUsage::Storage => self.max_storage_buffer_binding_size,
        };
        let max = binding.min(self.max_buffer_size);
        if desc.size > max {
            return Err(RenderError::ResourceCreation {
                label: desc.label.clone(),
                extent: Extent::default(),
                reason: format!("{} bytes exceed the device limit of {max}", desc.size),
            });
        }
        Ok(())
    }

    /// Clamps a 2D extent so that neither side exceeds the device limit.
    pub fn clamp_2d(&self, extent: Extent) -> Extent {
        let max = self.max_texture_dimension_2d;
        Extent::d2(extent.width.min(max), extent.height.min(max))
    }
}

/// Texel formats used by the passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    R32Float,
}

impl ImageFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            ImageFormat::Rgba8Unorm | ImageFormat::R32Float => 4,
            ImageFormat::Rgba16Float => 8,
            ImageFormat::Rgba32Float => 16,
        }
    }

    /// Stable numeric tag written into capture containers.
    pub fn tag(self) -> u16 {
        match self {
            ImageFormat::Rgba8Unorm => 1,
            ImageFormat::Rgba16Float => 2,
            ImageFormat::Rgba32Float => 3,
            ImageFormat::R32Float => 4,
        }
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(ImageFormat::Rgba8Unorm),
            2 => Some(ImageFormat::Rgba16Float),
            3 => Some(ImageFormat::Rgba32Float),
            4 => Some(ImageFormat::R32Float),
            _ => None,
        }
    }

    /// Whether the format can be sampled with a filtering sampler without
    /// optional device features.
    pub fn is_filterable(self) -> bool {
        !matches!(self, ImageFormat::Rgba32Float | ImageFormat::R32Float)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageDimension {
    D2,
    D3,
}

/// Description of an image to create.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageDesc {
    pub label: String,
    pub format: ImageFormat,
    pub dimension: ImageDimension,
    pub extent: Extent,
}

impl ImageDesc {
    pub fn d2(label: impl Into<String>, format: ImageFormat, extent: Extent) -> Self {
        Self {
            label: label.into(),
            format,
            dimension: ImageDimension::D2,
            extent: Extent::d2(extent.width, extent.height),
        }
    }

    pub fn d3(label: impl Into<String>, format: ImageFormat, extent: Extent) -> Self {
        Self {
            label: label.into(),
            format,
            dimension: ImageDimension::D3,
            extent,
        }
    }

    /// Same description at a different size.
    pub fn with_extent(&self, extent: Extent) -> Self {
        let extent = match self.dimension {
            ImageDimension::D2 => Extent::d2(extent.width, extent.height),
            ImageDimension::D3 => extent,
        };
        Self {
            extent,
            ..self.clone()
        }
    }

    pub fn byte_size(&self) -> u64 {
        self.extent.texel_count() * self.format.bytes_per_pixel() as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Small CPU-written uniform data.
    Uniform,
    /// Structured storage written by the CPU or GPU.
    Storage,
}

/// Description of a buffer to create.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDesc {
    pub fn uniform(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: label.into(),
            size,
            usage: BufferUsage::Uniform,
        }
    }

    pub fn storage(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: label.into(),
            size,
            usage: BufferUsage::Storage,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub address: AddressMode,
}

impl SamplerDesc {
    pub const NEAREST_CLAMP: Self = Self {
        filter: Filter::Nearest,
        address: AddressMode::ClampToEdge,
    };

    pub const LINEAR_REPEAT: Self = Self {
        filter: Filter::Linear,
        address: AddressMode::Repeat,
    };
}

/// What kind of resource a binding slot expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer {
        read_only: bool,
    },
    /// Image written (and read) by the shader.
    StorageImage {
        format: ImageFormat,
        dimension: ImageDimension,
    },
    /// Image read through a sampler.
    SampledImage {
        dimension: ImageDimension,
        filterable: bool,
    },
    Sampler {
        filtering: bool,
    },
}

/// One slot of a pipeline layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BindingLayout {
    pub name: &'static str,
    pub set: u32,
    pub binding: u32,
    pub kind: BindingKind,
}

impl BindingLayout {
    pub const fn new(name: &'static str, set: u32, binding: u32, kind: BindingKind) -> Self {
        Self {
            name,
            set,
            binding,
            kind,
        }
    }
}

/// Description of a pipeline layout as a flat list of bindings across sets.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct PipelineLayoutDesc {
    pub bindings: Vec<BindingLayout>,
}

impl PipelineLayoutDesc {
    pub fn new(bindings: Vec<BindingLayout>) -> Self {
        Self { bindings }
    }

    /// Appends bindings, returning the extended layout.
    pub fn with(mut self, bindings: impl IntoIterator<Item = BindingLayout>) -> Self {
        self.bindings.extend(bindings);
        self
    }

    /// Highest set index used, plus one.
    pub fn set_count(&self) -> u32 {
        self.bindings.iter().map(|b| b.set + 1).max().unwrap_or(0)
    }

    /// Bindings of one set, sorted by binding slot.
    pub fn set(&self, set: u32) -> Vec<&BindingLayout> {
        let mut out: Vec<_> = self.bindings.iter().filter(|b| b.set == set).collect();
        out.sort_by_key(|b| b.binding);
        out
    }
}

/// Description of a compute pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineDesc {
    /// Virtual program path, e.g. `` `/shaders/raygen.comp ``.
    pub shader: String,
    pub layout: PipelineLayoutId,
    /// Threads per workgroup. Dispatches are expressed in threads.
    pub group_size: [u32; 3],
}

impl PipelineDesc {
    pub fn new(shader: impl Into<String>, layout: PipelineLayoutId, group_size: [u32; 3]) -> Self {
        Self {
            shader: shader.into(),
            layout,
            group_size,
        }
    }
}

/// A resource bound into a descriptor slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subresource {
    Buffer(BufferId),
    Image(ImageId),
    Sampler(SamplerId),
}

/// Description of a descriptor set for one set index of a layout.
#[derive(Clone, Debug, PartialEq)]
pub struct DescriptorsDesc {
    pub label: String,
    pub layout: PipelineLayoutId,
    pub set: u32,
    pub entries: Vec<(u32, Subresource)>,
}

impl DescriptorsDesc {
    pub fn new(
        label: impl Into<String>,
        layout: PipelineLayoutId,
        set: u32,
        entries: Vec<(u32, Subresource)>,
    ) -> Self {
        Self {
            label: label.into(),
            layout,
            set,
            entries,
        }
    }
}

/// The GPU abstraction the renderer is written against.
///
/// All methods run on the render thread. Handles stay valid until the
/// matching `destroy_*` call; the device never invalidates them on its own.
pub trait GpuDevice {
    fn limits(&self) -> DeviceLimits;

    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId>;
    fn destroy_image(&mut self, id: ImageId);
    /// Returns the description of a live image.
    fn image_desc(&self, id: ImageId) -> Option<&ImageDesc>;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId>;
    fn destroy_buffer(&mut self, id: BufferId);
    fn buffer_size(&self, id: BufferId) -> Option<u64>;
    /// Stages CPU data for a buffer. The data reaches GPU memory when a
    /// submitted command list executes [`Command::FlushBuffer`] for it.
    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()>;

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId>;
    fn create_pipeline_layout(&mut self, desc: &PipelineLayoutDesc) -> Result<PipelineLayoutId>;
    fn create_pipeline(&mut self, desc: &PipelineDesc, source: &str) -> Result<PipelineId>;
    /// Recompiles an existing pipeline in place, keeping its handle.
    fn rebuild_pipeline(&mut self, id: PipelineId, desc: &PipelineDesc, source: &str)
    -> Result<()>;

    fn create_descriptors(&mut self, desc: &DescriptorsDesc) -> Result<DescriptorSetId>;
    fn update_descriptor(
        &mut self,
        set: DescriptorSetId,
        binding: u32,
        resource: Subresource,
    ) -> Result<()>;
    fn flush_descriptors(&mut self, set: DescriptorSetId) -> Result<()>;
    fn destroy_descriptors(&mut self, set: DescriptorSetId);
    /// The resource currently written into a descriptor slot.
    fn descriptor(&self, set: DescriptorSetId, binding: u32) -> Option<Subresource>;

    /// Replays the command lists in order as one submission.
    fn submit(&mut self, lists: &[&CommandList]) -> Result<()>;
    /// Replays the command lists, composites `image` (and the optional
    /// overlay on top) into the swapchain and presents it.
    fn present(
        &mut self,
        image: ImageId,
        overlay: Option<ImageId>,
        lists: &[&CommandList],
    ) -> Result<()>;
    /// Blocks until all submitted work finished and returns the tightly
    /// packed texels of a 2D image.
    fn read_image(&mut self, image: ImageId) -> Result<Vec<u8>>;
    /// Blocks until the device is idle.
    fn wait_idle(&mut self);

    /// (Re)configures the swapchain at `extent`.
    fn configure_surface(&mut self, extent: Extent) -> Result<()>;
    fn release_surface(&mut self);
    fn surface_extent(&self) -> Option<Extent>;
}
