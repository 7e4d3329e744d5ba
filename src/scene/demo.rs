use log::debug;
use winit::keyboard::KeyCode;

use super::{GpuLight, LightKind, SCENE_BINDINGS, Scene, SceneId, SceneInfo, scene_layout};
use crate::cache::ResourceCache;
use crate::error::Result;
use crate::gpu::{
    BufferDesc, BufferId, CommandList, DescriptorSetId, DescriptorsDesc, GpuDevice, Subresource,
};
use crate::input::Control;

/// GPU layout of one sphere.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSphere {
    pub center: [f32; 3],
    pub radius: f32,
    pub albedo: [f32; 3],
    pub roughness: f32,
}

/// A handful of spheres on a ground plane, lit by a sun and one point light.
///
/// Toggle the sun's motion with `P`.
pub struct DemoScene {
    id: SceneId,
    spheres: Vec<GpuSphere>,
    lights: Vec<GpuLight>,
    geometry: BufferId,
    light_buffer: BufferId,
    info: BufferId,
    descriptors: DescriptorSetId,
    time: f32,
    animate_sun: bool,
}

impl DemoScene {
    pub fn new(device: &mut dyn GpuDevice, cache: &mut ResourceCache) -> Result<Self> {
        let spheres = vec![
            GpuSphere {
                center: [0.0, -1000.0, 0.0],
                radius: 1000.0,
                albedo: [0.45, 0.45, 0.42],
                roughness: 0.9,
            },
            GpuSphere {
                center: [-2.5, 1.0, 0.0],
                radius: 1.0,
                albedo: [0.9, 0.2, 0.15],
                roughness: 0.3,
            },
            GpuSphere {
                center: [0.0, 1.0, -1.0],
                radius: 1.0,
                albedo: [0.95, 0.95, 0.95],
                roughness: 0.05,
            },
            GpuSphere {
                center: [2.5, 1.0, 0.0],
                radius: 1.0,
                albedo: [0.2, 0.4, 0.9],
                roughness: 0.6,
            },
        ];
        let lights = vec![
            GpuLight {
                vector: [-0.4, -1.0, -0.3],
                kind: LightKind::Directional as u32,
                color: [1.0, 0.96, 0.9],
                intensity: 3.0,
            },
            GpuLight {
                vector: [0.0, 4.0, 3.0],
                kind: LightKind::Point as u32,
                color: [1.0, 0.7, 0.4],
                intensity: 20.0,
            },
        ];

        let geometry = device.create_buffer(&BufferDesc::storage(
            "Scene geometry",
            std::mem::size_of_val(spheres.as_slice()) as u64,
        ))?;
        let light_buffer = device.create_buffer(&BufferDesc::storage(
            "Scene lights",
            std::mem::size_of_val(lights.as_slice()) as u64,
        ))?;
        let info = device.create_buffer(&BufferDesc::uniform(
            "Scene info",
            std::mem::size_of::<SceneInfo>() as u64,
        ))?;
        device.write_buffer(geometry, 0, bytemuck::cast_slice(&spheres))?;
        device.write_buffer(light_buffer, 0, bytemuck::cast_slice(&lights))?;

        let layout = cache.layout(device, "Scene layout", &scene_layout())?;
        let descriptors = device.create_descriptors(&DescriptorsDesc::new(
            "Scene descriptors",
            layout,
            SCENE_BINDINGS[0].set,
            vec![
                (SCENE_BINDINGS[0].binding, Subresource::Buffer(geometry)),
                (SCENE_BINDINGS[1].binding, Subresource::Buffer(light_buffer)),
                (SCENE_BINDINGS[2].binding, Subresource::Buffer(info)),
            ],
        ))?;
        device.flush_descriptors(descriptors)?;

        let mut scene = Self {
            id: SceneId::next(),
            spheres,
            lights,
            geometry,
            light_buffer,
            info,
            descriptors,
            time: 0.0,
            animate_sun: true,
        };
        scene.write_info(device)?;
        Ok(scene)
    }

    fn write_info(&self, device: &mut dyn GpuDevice) -> Result<()> {
        let info = SceneInfo {
            geometry_count: self.geometry_count(),
            light_count: self.light_count(),
            directional_light_count: self.directional_light_count(),
            time: self.time,
        };
        device.write_buffer(self.info, 0, bytemuck::bytes_of(&info))
    }
}

impl Scene for DemoScene {
    fn id(&self) -> SceneId {
        self.id
    }

    fn descriptors(&self) -> DescriptorSetId {
        self.descriptors
    }

    fn light_buffer(&self) -> BufferId {
        self.light_buffer
    }

    fn update(&mut self, device: &mut dyn GpuDevice, dt: f32) -> Result<()> {
        if self.animate_sun {
            self.time += dt;
            let angle = self.time * 0.05;
            self.lights[0].vector = [angle.cos() * 0.4, -1.0, angle.sin() * 0.4];
            device.write_buffer(self.light_buffer, 0, bytemuck::cast_slice(&self.lights))?;
        }
        self.write_info(device)
    }

    fn fill_command_list(&self, cl: &mut CommandList) {
        cl.flush_buffer(self.geometry);
        cl.flush_buffer(self.light_buffer);
        cl.flush_buffer(self.info);
    }

    fn light_count(&self) -> u32 {
        self.lights.len() as u32
    }

    fn directional_light_count(&self) -> u32 {
        self.lights
            .iter()
            .take_while(|l| l.kind == LightKind::Directional as u32)
            .count() as u32
    }

    fn geometry_count(&self) -> u32 {
        self.spheres.len() as u32
    }

    fn on_input(&mut self, control: Control, active: bool) {
        if control == Control::Key(KeyCode::KeyP) && !active {
            self.animate_sun = !self.animate_sun;
            debug!("Sun animation: {}", self.animate_sun);
        }
    }

    fn release(&mut self, device: &mut dyn GpuDevice) {
        device.destroy_descriptors(self.descriptors);
        device.destroy_buffer(self.geometry);
        device.destroy_buffer(self.light_buffer);
        device.destroy_buffer(self.info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InlineShaders;
    use crate::gpu::HeadlessDevice;

    #[test]
    fn counts_and_uploads() {
        let mut device = HeadlessDevice::new();
        let mut cache = ResourceCache::new(InlineShaders::new());
        let scene = DemoScene::new(&mut device, &mut cache).unwrap();
        assert_eq!(scene.geometry_count(), 4);
        assert_eq!(scene.light_count(), 2);
        assert_eq!(scene.directional_light_count(), 1);

        let mut cl = CommandList::new("frame");
        scene.fill_command_list(&mut cl);
        assert_eq!(cl.len(), 3);
        device.submit(&[&cl]).unwrap();
        assert_eq!(device.buffer_uploads(scene.light_buffer()), 1);
    }

    #[test]
    fn scene_ids_are_unique() {
        let mut device = HeadlessDevice::new();
        let mut cache = ResourceCache::new(InlineShaders::new());
        let a = DemoScene::new(&mut device, &mut cache).unwrap();
        let b = DemoScene::new(&mut device, &mut cache).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn p_toggles_sun_animation() {
        let mut device = HeadlessDevice::new();
        let mut cache = ResourceCache::new(InlineShaders::new());
        let mut scene = DemoScene::new(&mut device, &mut cache).unwrap();
        scene.on_input(Control::Key(KeyCode::KeyP), false);
        let before = scene.lights[0];
        scene.update(&mut device, 10.0).unwrap();
        assert_eq!(scene.lights[0], before);
    }
}
