//! The scene contract consumed by the renderer.
//!
//! A scene owns its geometry and light buffers and a descriptor set laid out
//! as [`SCENE_BINDINGS`] (set 1 of every scene-aware pipeline). The renderer
//! only ever sees it through [`Scene`]: it reads the identity to decide
//! whether passes must rebind, binds `descriptors()` next to the camera, and
//! lets the scene append its own upload commands to the frame recording.
//!
//! Lights are stored directional first, so the first
//! [`Scene::directional_light_count`] entries of the light buffer are the
//! directional lights.

mod demo;

use std::sync::atomic::{AtomicU64, Ordering};

pub use demo::DemoScene;

use crate::camera::CAMERA_BINDINGS;
use crate::error::Result;
use crate::gpu::{
    BindingKind, BindingLayout, BufferId, CommandList, DescriptorSetId, GpuDevice,
    PipelineLayoutDesc,
};
use crate::input::Control;

/// Process-unique scene identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneId(u64);

impl SceneId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Layout of the scene descriptor set (set 1).
pub const SCENE_BINDINGS: [BindingLayout; 3] = [
    BindingLayout::new(
        "geometry",
        1,
        0,
        BindingKind::StorageBuffer { read_only: true },
    ),
    BindingLayout::new("lights", 1, 1, BindingKind::StorageBuffer { read_only: true }),
    BindingLayout::new("scene_info", 1, 2, BindingKind::UniformBuffer),
];

/// Camera and scene sets, the common prefix of every scene-aware layout.
pub fn scene_layout() -> PipelineLayoutDesc {
    PipelineLayoutDesc::new(CAMERA_BINDINGS.to_vec()).with(SCENE_BINDINGS)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum LightKind {
    Directional = 0,
    Point = 1,
}

/// GPU layout of one light.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLight {
    /// Direction for directional lights, position otherwise.
    pub vector: [f32; 3],
    pub kind: u32,
    pub color: [f32; 3],
    pub intensity: f32,
}

/// Counts shared with the shaders.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneInfo {
    pub geometry_count: u32,
    pub light_count: u32,
    pub directional_light_count: u32,
    pub time: f32,
}

/// A scene the renderer can draw.
pub trait Scene {
    fn id(&self) -> SceneId;
    /// Descriptor set matching [`layout`](Self::layout).
    fn descriptors(&self) -> DescriptorSetId;
    fn light_buffer(&self) -> BufferId;

    /// Advances animation and stages CPU-side data.
    fn update(&mut self, device: &mut dyn GpuDevice, dt: f32) -> Result<()>;
    /// Appends the scene's upload commands to the frame recording.
    fn fill_command_list(&self, cl: &mut CommandList);

    fn light_count(&self) -> u32;
    fn directional_light_count(&self) -> u32;
    fn geometry_count(&self) -> u32;

    fn layout(&self) -> &'static [BindingLayout] {
        &SCENE_BINDINGS
    }

    /// Receives keyboard events nothing else used.
    fn on_input(&mut self, _control: Control, _active: bool) {}

    fn release(&mut self, _device: &mut dyn GpuDevice) {}
}
