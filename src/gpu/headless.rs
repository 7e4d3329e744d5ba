//! In-memory GPU device.
//!
//! [`HeadlessDevice`] keeps every object it creates in slot maps and logs
//! what it was asked to do, so the renderer can be driven and inspected
//! without a GPU. Submissions are validated: every pipeline and descriptor
//! set a command list touches, and every resource written into those sets,
//! must still be alive.

use std::collections::BTreeMap;

use log::debug;
use slotmap::SlotMap;

use super::{
    BufferDesc, BufferId, Command, CommandList, DescriptorSetId, DescriptorsDesc, DeviceLimits,
    Extent, GpuDevice, ImageDesc, ImageId, PipelineDesc, PipelineId, PipelineLayoutDesc,
    PipelineLayoutId, SamplerDesc, SamplerId, Subresource,
};
use crate::error::{RenderError, Result};

/// One call to `submit` or `present`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    /// Generation of every submitted list, in order.
    pub generations: Vec<u64>,
    /// Number of commands replayed across all lists.
    pub commands: usize,
    /// Thread counts of every dispatch replayed.
    pub dispatches: Vec<[u32; 3]>,
    /// Image composited to the swapchain, for presents.
    pub presented: Option<ImageId>,
    pub overlay: Option<ImageId>,
}

struct DescriptorSet {
    desc: DescriptorsDesc,
    entries: BTreeMap<u32, Subresource>,
    flushed: bool,
}

struct Buffer {
    desc: BufferDesc,
    staged: Vec<u8>,
    uploads: usize,
}

/// A GPU device that only exists in memory.
#[derive(Default)]
pub struct HeadlessDevice {
    limits: DeviceLimits,
    images: SlotMap<ImageId, ImageDesc>,
    buffers: SlotMap<BufferId, Buffer>,
    samplers: SlotMap<SamplerId, SamplerDesc>,
    layouts: SlotMap<PipelineLayoutId, PipelineLayoutDesc>,
    pipelines: SlotMap<PipelineId, (PipelineDesc, String)>,
    descriptors: SlotMap<DescriptorSetId, DescriptorSet>,
    surface: Option<Extent>,

    /// Every image created, in creation order.
    pub created_images: Vec<(ImageId, ImageDesc)>,
    pub destroyed_images: Vec<ImageId>,
    pub destroyed_buffers: Vec<BufferId>,
    pub submissions: Vec<Submission>,
    pub readbacks: Vec<ImageId>,
    pub wait_idle_calls: usize,
    pub pipeline_builds: usize,
    pub pipeline_rebuilds: usize,

    fail_texels_above: Option<u64>,
    fail_readback: bool,
    fail_submissions: bool,
    fail_shader: Option<String>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the default WebGPU limits the device enforces.
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Makes image creation fail for images with more than `texels` texels.
    pub fn fail_images_above(&mut self, texels: u64) {
        self.fail_texels_above = Some(texels);
    }

    /// Makes every subsequent `read_image` fail.
    pub fn fail_readbacks(&mut self, fail: bool) {
        self.fail_readback = fail;
    }

    /// Makes every subsequent `submit` and `present` fail like a lost
    /// surface, without replaying anything.
    pub fn fail_submissions(&mut self, fail: bool) {
        self.fail_submissions = fail;
    }

    /// Makes pipeline creation and rebuilds fail when the source contains
    /// `marker`.
    pub fn fail_shaders_containing(&mut self, marker: impl Into<String>) {
        self.fail_shader = Some(marker.into());
    }

    pub fn clear_failures(&mut self) {
        self.fail_texels_above = None;
        self.fail_readback = false;
        self.fail_submissions = false;
        self.fail_shader = None;
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_live_image(&self, id: ImageId) -> bool {
        self.images.contains_key(id)
    }

    /// The CPU copy of a buffer's contents.
    pub fn buffer_contents(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(id).map(|b| b.staged.as_slice())
    }

    /// How many times a `FlushBuffer` for this buffer was replayed.
    pub fn buffer_uploads(&self, id: BufferId) -> usize {
        self.buffers.get(id).map_or(0, |b| b.uploads)
    }

    pub fn pipeline_source(&self, id: PipelineId) -> Option<&str> {
        self.pipelines.get(id).map(|(_, s)| s.as_str())
    }

    pub fn samplers_created(&self) -> usize {
        self.samplers.len()
    }

    pub fn layouts_created(&self) -> usize {
        self.layouts.len()
    }

    pub fn presents(&self) -> impl Iterator<Item = &Submission> {
        self.submissions.iter().filter(|s| s.presented.is_some())
    }

    /// Whether the set was flushed since its last update.
    pub fn is_flushed(&self, set: DescriptorSetId) -> bool {
        self.descriptors.get(set).is_some_and(|ds| ds.flushed)
    }

    fn check_shader(&self, desc: &PipelineDesc, source: &str) -> Result<()> {
        match &self.fail_shader {
            Some(marker) if source.contains(marker.as_str()) => Err(RenderError::PipelineCreation {
                name: desc.shader.clone(),
                reason: format!("injected failure on '{marker}'"),
            }),
            _ => Ok(()),
        }
    }

    fn check_resource(&self, resource: Subresource) -> Result<()> {
        let live = match resource {
            Subresource::Buffer(id) => self.buffers.contains_key(id),
            Subresource::Image(id) => self.images.contains_key(id),
            Subresource::Sampler(id) => self.samplers.contains_key(id),
        };
        if live {
            return Ok(());
        }
        let (kind, id) = match resource {
            Subresource::Buffer(id) => (BufferId::KIND, id.raw()),
            Subresource::Image(id) => (ImageId::KIND, id.raw()),
            Subresource::Sampler(id) => (SamplerId::KIND, id.raw()),
        };
        Err(RenderError::UnknownHandle { kind, id })
    }

    fn replay(&mut self, lists: &[&CommandList]) -> Result<Submission> {
        if self.fail_submissions {
            return Err(RenderError::Surface(wgpu::SurfaceError::Lost));
        }
        let mut submission = Submission {
            generations: lists.iter().map(|l| l.generation()).collect(),
            commands: 0,
            dispatches: Vec::new(),
            presented: None,
            overlay: None,
        };
        for list in lists {
            for command in list.commands() {
                submission.commands += 1;
                match command {
                    Command::FlushBuffer(id) => {
                        let buffer = self.buffers.get_mut(*id).ok_or(
                            RenderError::UnknownHandle {
                                kind: BufferId::KIND,
                                id: id.raw(),
                            },
                        )?;
                        buffer.uploads += 1;
                    }
                    Command::BindDescriptors(sets) => {
                        for set in sets {
                            let ds = self.descriptors.get(*set).ok_or(
                                RenderError::UnknownHandle {
                                    kind: DescriptorSetId::KIND,
                                    id: set.raw(),
                                },
                            )?;
                            for resource in ds.entries.values() {
                                self.check_resource(*resource)?;
                            }
                        }
                    }
                    Command::BindPipeline(id) => {
                        if !self.pipelines.contains_key(*id) {
                            return Err(RenderError::UnknownHandle {
                                kind: PipelineId::KIND,
                                id: id.raw(),
                            });
                        }
                    }
                    Command::Dispatch(threads) => submission.dispatches.push(*threads),
                }
            }
        }
        Ok(submission)
    }
}

impl GpuDevice for HeadlessDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId> {
        self.limits.check_image(desc)?;
        if self
            .fail_texels_above
            .is_some_and(|limit| desc.extent.texel_count() > limit)
        {
            return Err(RenderError::ResourceCreation {
                label: desc.label.clone(),
                extent: desc.extent,
                reason: "out of device memory".into(),
            });
        }
        let id = self.images.insert(desc.clone());
        debug!("headless: image {id:?} '{}' {:?}", desc.label, desc.extent);
        self.created_images.push((id, desc.clone()));
        Ok(id)
    }

    fn destroy_image(&mut self, id: ImageId) {
        if self.images.remove(id).is_some() {
            self.destroyed_images.push(id);
        }
    }

    fn image_desc(&self, id: ImageId) -> Option<&ImageDesc> {
        self.images.get(id)
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        self.limits.check_buffer(desc)?;
        Ok(self.buffers.insert(Buffer {
            desc: desc.clone(),
            staged: vec![0; desc.size as usize],
            uploads: 0,
        }))
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        if self.buffers.remove(id).is_some() {
            self.destroyed_buffers.push(id);
        }
    }

    fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.buffers.get(id).map(|b| b.desc.size)
    }

    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(id)
            .ok_or(RenderError::UnknownHandle {
                kind: BufferId::KIND,
                id: id.raw(),
            })?;
        let end = usize::try_from(offset)
            .ok()
            .and_then(|start| start.checked_add(data.len()))
            .filter(|end| *end <= buffer.staged.len());
        let Some(end) = end else {
            return Err(RenderError::BufferOverflow {
                label: buffer.desc.label.clone(),
                offset,
                len: data.len(),
                size: buffer.desc.size,
            });
        };
        buffer.staged[end - data.len()..end].copy_from_slice(data);
        Ok(())
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId> {
        Ok(self.samplers.insert(*desc))
    }

    fn create_pipeline_layout(&mut self, desc: &PipelineLayoutDesc) -> Result<PipelineLayoutId> {
        Ok(self.layouts.insert(desc.clone()))
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc, source: &str) -> Result<PipelineId> {
        if !self.layouts.contains_key(desc.layout) {
            return Err(RenderError::UnknownHandle {
                kind: PipelineLayoutId::KIND,
                id: desc.layout.raw(),
            });
        }
        self.check_shader(desc, source)?;
        let id = self.pipelines.insert((desc.clone(), source.to_string()));
        self.pipeline_builds += 1;
        Ok(id)
    }

    fn rebuild_pipeline(
        &mut self,
        id: PipelineId,
        desc: &PipelineDesc,
        source: &str,
    ) -> Result<()> {
        self.check_shader(desc, source)?;
        let pipeline = self
            .pipelines
            .get_mut(id)
            .ok_or(RenderError::UnknownHandle {
                kind: PipelineId::KIND,
                id: id.raw(),
            })?;
        *pipeline = (desc.clone(), source.to_string());
        self.pipeline_rebuilds += 1;
        Ok(())
    }

    fn create_descriptors(&mut self, desc: &DescriptorsDesc) -> Result<DescriptorSetId> {
        if !self.layouts.contains_key(desc.layout) {
            return Err(RenderError::UnknownHandle {
                kind: PipelineLayoutId::KIND,
                id: desc.layout.raw(),
            });
        }
        Ok(self.descriptors.insert(DescriptorSet {
            desc: desc.clone(),
            entries: desc.entries.iter().copied().collect(),
            flushed: false,
        }))
    }

    fn update_descriptor(
        &mut self,
        set: DescriptorSetId,
        binding: u32,
        resource: Subresource,
    ) -> Result<()> {
        let ds = self
            .descriptors
            .get_mut(set)
            .ok_or(RenderError::UnknownHandle {
                kind: DescriptorSetId::KIND,
                id: set.raw(),
            })?;
        ds.entries.insert(binding, resource);
        ds.flushed = false;
        Ok(())
    }

    fn flush_descriptors(&mut self, set: DescriptorSetId) -> Result<()> {
        let ds = self
            .descriptors
            .get_mut(set)
            .ok_or(RenderError::UnknownHandle {
                kind: DescriptorSetId::KIND,
                id: set.raw(),
            })?;
        ds.flushed = true;
        debug!("headless: flushed '{}'", ds.desc.label);
        Ok(())
    }

    fn destroy_descriptors(&mut self, set: DescriptorSetId) {
        self.descriptors.remove(set);
    }

    fn descriptor(&self, set: DescriptorSetId, binding: u32) -> Option<Subresource> {
        self.descriptors
            .get(set)
            .and_then(|ds| ds.entries.get(&binding).copied())
    }

    fn submit(&mut self, lists: &[&CommandList]) -> Result<()> {
        let submission = self.replay(lists)?;
        self.submissions.push(submission);
        Ok(())
    }

    fn present(
        &mut self,
        image: ImageId,
        overlay: Option<ImageId>,
        lists: &[&CommandList],
    ) -> Result<()> {
        self.check_resource(Subresource::Image(image))?;
        if let Some(overlay) = overlay {
            self.check_resource(Subresource::Image(overlay))?;
        }
        let mut submission = self.replay(lists)?;
        submission.presented = Some(image);
        submission.overlay = overlay;
        self.submissions.push(submission);
        Ok(())
    }

    fn read_image(&mut self, image: ImageId) -> Result<Vec<u8>> {
        if self.fail_readback {
            return Err(RenderError::Readback("injected readback failure".into()));
        }
        let desc = self.images.get(image).ok_or(RenderError::UnknownHandle {
            kind: ImageId::KIND,
            id: image.raw(),
        })?;
        self.readbacks.push(image);
        Ok((0..desc.byte_size()).map(|i| (i % 251) as u8).collect())
    }

    fn wait_idle(&mut self) {
        self.wait_idle_calls += 1;
    }

    fn configure_surface(&mut self, extent: Extent) -> Result<()> {
        self.surface = Some(extent);
        Ok(())
    }

    fn release_surface(&mut self) {
        self.surface = None;
    }

    fn surface_extent(&self) -> Option<Extent> {
        self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{BindingKind, BindingLayout, ImageDimension, ImageFormat};

    fn layout(device: &mut HeadlessDevice) -> PipelineLayoutId {
        device
            .create_pipeline_layout(&PipelineLayoutDesc::new(vec![BindingLayout::new(
                "out",
                0,
                0,
                BindingKind::StorageImage {
                    format: ImageFormat::Rgba8Unorm,
                    dimension: ImageDimension::D2,
                },
            )]))
            .unwrap()
    }

    #[test]
    fn submit_rejects_destroyed_bound_image() {
        let mut device = HeadlessDevice::new();
        let layout = layout(&mut device);
        let image = device
            .create_image(&ImageDesc::d2("out", ImageFormat::Rgba8Unorm, Extent::d2(4, 4)))
            .unwrap();
        let set = device
            .create_descriptors(&DescriptorsDesc::new(
                "set",
                layout,
                0,
                vec![(0, Subresource::Image(image))],
            ))
            .unwrap();
        let mut cl = CommandList::new("frame");
        cl.bind_descriptors(&[set]);
        device.submit(&[&cl]).unwrap();

        device.destroy_image(image);
        assert!(matches!(
            device.submit(&[&cl]),
            Err(RenderError::UnknownHandle { kind: "image", .. })
        ));
    }

    #[test]
    fn updates_unflush_the_set() {
        let mut device = HeadlessDevice::new();
        let layout = layout(&mut device);
        let image = device
            .create_image(&ImageDesc::d2("out", ImageFormat::Rgba8Unorm, Extent::d2(4, 4)))
            .unwrap();
        let set = device
            .create_descriptors(&DescriptorsDesc::new("set", layout, 0, vec![]))
            .unwrap();
        assert!(!device.is_flushed(set));
        device.flush_descriptors(set).unwrap();
        assert!(device.is_flushed(set));
        device
            .update_descriptor(set, 0, Subresource::Image(image))
            .unwrap();
        assert!(!device.is_flushed(set));
        assert_eq!(device.descriptor(set, 0), Some(Subresource::Image(image)));
    }

    #[test]
    fn buffer_writes_are_bounds_checked() {
        let mut device = HeadlessDevice::new();
        let buffer = device.create_buffer(&BufferDesc::uniform("u", 8)).unwrap();
        device.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.buffer_contents(buffer), Some(&[0, 0, 0, 0, 1, 2, 3, 4][..]));
        assert!(matches!(
            device.write_buffer(buffer, 6, &[0; 4]),
            Err(RenderError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn injected_image_failure() {
        let mut device = HeadlessDevice::new();
        device.fail_images_above(100);
        let small = ImageDesc::d2("a", ImageFormat::Rgba8Unorm, Extent::d2(10, 10));
        let big = ImageDesc::d2("b", ImageFormat::Rgba8Unorm, Extent::d2(11, 10));
        assert!(device.create_image(&small).is_ok());
        assert!(device.create_image(&big).is_err());
    }

    #[test]
    fn creation_above_the_limits_fails() {
        let mut device = HeadlessDevice::new().with_limits(DeviceLimits {
            max_texture_dimension_2d: 64,
            max_texture_dimension_3d: 16,
            max_buffer_size: 1024,
            max_storage_buffer_binding_size: 512,
            max_uniform_buffer_binding_size: 256,
        });
        let wide = ImageDesc::d2("wide", ImageFormat::Rgba8Unorm, Extent::d2(65, 4));
        let deep = ImageDesc::d3("deep", ImageFormat::R32Float, Extent::cube(17));
        assert!(matches!(
            device.create_image(&wide),
            Err(RenderError::ResourceCreation { .. })
        ));
        assert!(device.create_image(&deep).is_err());
        assert!(device.create_buffer(&BufferDesc::storage("s", 513)).is_err());
        assert!(device.create_buffer(&BufferDesc::uniform("u", 257)).is_err());
        assert!(device.create_buffer(&BufferDesc::storage("ok", 512)).is_ok());
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_buffers(), 1);
    }

    #[test]
    fn destroyed_handles_are_not_reused() {
        let mut device = HeadlessDevice::new();
        let desc = ImageDesc::d2("a", ImageFormat::Rgba8Unorm, Extent::d2(2, 2));
        let first = device.create_image(&desc).unwrap();
        device.destroy_image(first);
        let second = device.create_image(&desc).unwrap();
        assert_ne!(first, second);
        assert!(!device.is_live_image(first));
        assert!(device.image_desc(first).is_none());
    }

    #[test]
    fn failed_submissions_replay_nothing() {
        let mut device = HeadlessDevice::new();
        let buffer = device.create_buffer(&BufferDesc::uniform("u", 16)).unwrap();
        let mut cl = CommandList::new("frame");
        cl.flush_buffer(buffer);
        device.fail_submissions(true);
        assert!(matches!(
            device.submit(&[&cl]),
            Err(RenderError::Surface(_))
        ));
        assert!(device.submissions.is_empty());
        assert_eq!(device.buffer_uploads(buffer), 0);

        device.clear_failures();
        device.submit(&[&cl]).unwrap();
        assert_eq!(device.buffer_uploads(buffer), 1);
    }

    #[test]
    fn readback_returns_full_image() {
        let mut device = HeadlessDevice::new();
        let image = device
            .create_image(&ImageDesc::d2("a", ImageFormat::Rgba8Unorm, Extent::d2(3, 2)))
            .unwrap();
        assert_eq!(device.read_image(image).unwrap().len(), 3 * 2 * 4);
        assert_eq!(device.readbacks, vec![image]);
    }
}
