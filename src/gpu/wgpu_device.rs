//! wgpu implementation of [`GpuDevice`].
//!
//! [`WgpuDevice`] owns the instance, adapter, device, queue and window
//! surface, and keeps every object the renderer creates in slot maps keyed
//! by handle. Descriptor sets are kept as CPU-side entry tables; the wgpu bind
//! group is rebuilt when a set is flushed.
//!
//! Command lists are encoded into one compute pass per submission. Buffer
//! contents written through [`GpuDevice::write_buffer`] are staged on the CPU
//! and uploaded with `queue.write_buffer` for every `FlushBuffer` command
//! before the submission executes.
//!
//! # Presenting
//!
//! [`GpuDevice::present`] draws a fullscreen triangle that samples the
//! renderer output and blends the optional overlay on top, into the
//! swapchain image.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc;

use log::{debug, info, warn};
use slotmap::SlotMap;
use winit::window::Window;

use super::{
    AddressMode, BindingKind, BufferDesc, BufferId, BufferUsage, Command, CommandList,
    DescriptorSetId, DescriptorsDesc, DeviceLimits, Extent, Filter, GpuDevice, ImageDesc, ImageDimension,
    ImageFormat, ImageId, PipelineDesc, PipelineId, PipelineLayoutDesc, PipelineLayoutId,
    SamplerDesc, SamplerId, Subresource,
};
use crate::error::{RenderError, Result};

fn texture_format(format: ImageFormat) -> wgpu::TextureFormat {
    match format {
        ImageFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        ImageFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        ImageFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        ImageFormat::R32Float => wgpu::TextureFormat::R32Float,
    }
}

fn view_dimension(dimension: ImageDimension) -> wgpu::TextureViewDimension {
    match dimension {
        ImageDimension::D2 => wgpu::TextureViewDimension::D2,
        ImageDimension::D3 => wgpu::TextureViewDimension::D3,
    }
}

fn binding_type(kind: BindingKind) -> wgpu::BindingType {
    match kind {
        BindingKind::UniformBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingKind::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingKind::StorageImage { format, dimension } => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: texture_format(format),
            view_dimension: view_dimension(dimension),
        },
        BindingKind::SampledImage {
            dimension,
            filterable,
        } => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension: view_dimension(dimension),
            multisampled: false,
        },
        BindingKind::Sampler { filtering } => wgpu::BindingType::Sampler(if filtering {
            wgpu::SamplerBindingType::Filtering
        } else {
            wgpu::SamplerBindingType::NonFiltering
        }),
    }
}

fn device_limits(limits: &wgpu::Limits) -> DeviceLimits {
    DeviceLimits {
        max_texture_dimension_2d: limits.max_texture_dimension_2d,
        max_texture_dimension_3d: limits.max_texture_dimension_3d,
        max_buffer_size: limits.max_buffer_size,
        max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size.into(),
        max_uniform_buffer_binding_size: limits.max_uniform_buffer_binding_size.into(),
    }
}

fn unknown<T>(kind: &'static str, id: u64) -> Result<T> {
    Err(RenderError::UnknownHandle { kind, id })
}

struct Image {
    desc: ImageDesc,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct Buffer {
    desc: BufferDesc,
    buffer: wgpu::Buffer,
    staged: Vec<u8>,
}

struct Layout {
    sets: Vec<wgpu::BindGroupLayout>,
    /// Number of binding slots per set.
    slots: Vec<usize>,
    pipeline_layout: wgpu::PipelineLayout,
}

struct Pipeline {
    desc: PipelineDesc,
    pipeline: wgpu::ComputePipeline,
}

struct DescriptorSet {
    desc: DescriptorsDesc,
    entries: BTreeMap<u32, Subresource>,
    group: Option<wgpu::BindGroup>,
}

struct PresentPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    empty_overlay: wgpu::TextureView,
}

struct Surface {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

/// GPU device backed by wgpu, presenting into a winit window.
pub struct WgpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    surface: Option<Surface>,
    present: PresentPipeline,
    limits: DeviceLimits,
    images: SlotMap<ImageId, Image>,
    buffers: SlotMap<BufferId, Buffer>,
    samplers: SlotMap<SamplerId, wgpu::Sampler>,
    layouts: SlotMap<PipelineLayoutId, Layout>,
    pipelines: SlotMap<PipelineId, Pipeline>,
    descriptors: SlotMap<DescriptorSetId, DescriptorSet>,
}

impl WgpuDevice {
    /// Creates the device for a window.
    ///
    /// Selects an adapter compatible with the window surface, creates the
    /// device and queue with the adapter's own limits, and configures the surface with an sRGB format and
    /// Fifo present mode at the window's current size.
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| RenderError::AdapterRequestFailed(e.to_string()))?;
        info!("Using adapter: {}", adapter.get_info().name);
        let adapter_limits = adapter.limits();

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Raylane Device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter_limits,
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| RenderError::AdapterRequestFailed("surface has no formats".into()))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let present = Self::create_present_pipeline(&device, &queue, surface_format);
        let limits = device_limits(&device.limits());
        debug!("Device limits: {limits:?}");

        Ok(Self {
            device,
            queue,
            surface: Some(Surface { surface, config }),
            present,
            limits,
            images: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            layouts: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            descriptors: SlotMap::with_key(),
        })
    }

    fn create_present_pipeline(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        format: wgpu::TextureFormat,
    ) -> PresentPipeline {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Present Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("present.wgsl").into()),
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Present Bind Group Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Present Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Present Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Present Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        // 1x1 transparent texel used when no overlay is composited.
        let empty = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Empty Overlay"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &empty,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0, 0, 0, 0],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        PresentPipeline {
            pipeline,
            layout,
            sampler,
            empty_overlay: empty.create_view(&wgpu::TextureViewDescriptor::default()),
        }
    }

    /// Runs `create` inside validation and out-of-memory error scopes and
    /// returns the first error either caught.
    fn scoped<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = create(&self.device);
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        let invalid = pollster::block_on(self.device.pop_error_scope());
        (value, out_of_memory.or(invalid))
    }

    fn compile(
        &self,
        desc: &PipelineDesc,
        source: &str,
    ) -> Result<wgpu::ComputePipeline> {
        let Some(layout) = self.layouts.get(desc.layout) else {
            return unknown(PipelineLayoutId::KIND, desc.layout.raw());
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&desc.shader),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&desc.shader),
                layout: Some(&layout.pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(RenderError::PipelineCreation {
                name: desc.shader.clone(),
                reason: err.to_string(),
            }),
            None => Ok(pipeline),
        }
    }

    fn resource<'a>(&'a self, resource: Subresource) -> Result<wgpu::BindingResource<'a>> {
        match resource {
            Subresource::Buffer(id) => match self.buffers.get(id) {
                Some(b) => Ok(b.buffer.as_entire_binding()),
                None => unknown(BufferId::KIND, id.raw()),
            },
            Subresource::Image(id) => match self.images.get(id) {
                Some(i) => Ok(wgpu::BindingResource::TextureView(&i.view)),
                None => unknown(ImageId::KIND, id.raw()),
            },
            Subresource::Sampler(id) => match self.samplers.get(id) {
                Some(s) => Ok(wgpu::BindingResource::Sampler(s)),
                None => unknown(SamplerId::KIND, id.raw()),
            },
        }
    }

    fn upload_staged(&self, lists: &[&CommandList]) -> Result<()> {
        for command in lists.iter().flat_map(|l| l.commands()) {
            if let Command::FlushBuffer(id) = command {
                let Some(buffer) = self.buffers.get(*id) else {
                    return unknown(BufferId::KIND, id.raw());
                };
                self.queue.write_buffer(&buffer.buffer, 0, &buffer.staged);
            }
        }
        Ok(())
    }

    fn encode(&self, encoder: &mut wgpu::CommandEncoder, lists: &[&CommandList]) -> Result<()> {
        for list in lists {
            if list.is_empty() {
                continue;
            }
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(list.label()),
                timestamp_writes: None,
            });
            let mut group_size = [1, 1, 1];
            for command in list.commands() {
                match command {
                    Command::FlushBuffer(_) => {}
                    Command::BindDescriptors(sets) => {
                        for (index, set) in sets.iter().enumerate() {
                            let Some(group) =
                                self.descriptors.get(*set).and_then(|d| d.group.as_ref())
                            else {
                                return unknown(DescriptorSetId::KIND, set.raw());
                            };
                            pass.set_bind_group(index as u32, group, &[]);
                        }
                    }
                    Command::BindPipeline(id) => {
                        let Some(pipeline) = self.pipelines.get(*id) else {
                            return unknown(PipelineId::KIND, id.raw());
                        };
                        group_size = pipeline.desc.group_size;
                        pass.set_pipeline(&pipeline.pipeline);
                    }
                    Command::Dispatch(threads) => {
                        let [x, y, z] = Extent::d3(threads[0], threads[1], threads[2])
                            .tiles(group_size);
                        pass.dispatch_workgroups(x, y, z);
                    }
                }
            }
        }
        Ok(())
    }

    fn image_view(&self, id: ImageId) -> Result<&wgpu::TextureView> {
        match self.images.get(id) {
            Some(image) => Ok(&image.view),
            None => unknown(ImageId::KIND, id.raw()),
        }
    }
}

impl GpuDevice for WgpuDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId> {
        self.limits.check_image(desc)?;
        let (dimension, depth) = match desc.dimension {
            ImageDimension::D2 => (wgpu::TextureDimension::D2, 1),
            ImageDimension::D3 => (wgpu::TextureDimension::D3, desc.extent.depth),
        };
        let (texture, err) = self.scoped(|device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&desc.label),
                size: wgpu::Extent3d {
                    width: desc.extent.width.max(1),
                    height: desc.extent.height.max(1),
                    depth_or_array_layers: depth.max(1),
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension,
                format: texture_format(desc.format),
                usage: wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        });
        if let Some(err) = err {
            return Err(RenderError::ResourceCreation {
                label: desc.label.clone(),
                extent: desc.extent,
                reason: err.to_string(),
            });
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        debug!("Created image '{}' {:?}", desc.label, desc.extent);
        Ok(self.images.insert(Image {
            desc: desc.clone(),
            texture,
            view,
        }))
    }

    fn destroy_image(&mut self, id: ImageId) {
        if let Some(image) = self.images.remove(id) {
            image.texture.destroy();
        }
    }

    fn image_desc(&self, id: ImageId) -> Option<&ImageDesc> {
        self.images.get(id).map(|i| &i.desc)
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        self.limits.check_buffer(desc)?;
        let usage = match desc.usage {
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM,
            BufferUsage::Storage => wgpu::BufferUsages::STORAGE,
        } | wgpu::BufferUsages::COPY_DST;
        // Bound buffers must be non-empty and 4-byte aligned.
        let size = desc.size.max(16).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let (buffer, err) = self.scoped(|device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&desc.label),
                size,
                usage,
                mapped_at_creation: false,
            })
        });
        if let Some(err) = err {
            return Err(RenderError::ResourceCreation {
                label: desc.label.clone(),
                extent: Extent::default(),
                reason: err.to_string(),
            });
        }
        Ok(self.buffers.insert(Buffer {
            desc: desc.clone(),
            buffer,
            staged: vec![0; size as usize],
        }))
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffers.remove(id) {
            buffer.buffer.destroy();
        }
    }

    fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.buffers.get(id).map(|b| b.desc.size)
    }

    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let Some(buffer) = self.buffers.get_mut(id) else {
            return unknown(BufferId::KIND, id.raw());
        };
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= buffer.desc.size);
        let Some(end) = end else {
            return Err(RenderError::BufferOverflow {
                label: buffer.desc.label.clone(),
                offset,
                len: data.len(),
                size: buffer.desc.size,
            });
        };
        buffer.staged[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId> {
        let filter = match desc.filter {
            Filter::Nearest => wgpu::FilterMode::Nearest,
            Filter::Linear => wgpu::FilterMode::Linear,
        };
        let address = match desc.address {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
        };
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Raylane Sampler"),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        });
        Ok(self.samplers.insert(sampler))
    }

    fn create_pipeline_layout(&mut self, desc: &PipelineLayoutDesc) -> Result<PipelineLayoutId> {
        let sets: Vec<wgpu::BindGroupLayout> = (0..desc.set_count())
            .map(|set| {
                let entries: Vec<_> = desc
                    .set(set)
                    .into_iter()
                    .map(|b| wgpu::BindGroupLayoutEntry {
                        binding: b.binding,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: binding_type(b.kind),
                        count: None,
                    })
                    .collect();
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some(&format!("Set {set}")),
                        entries: &entries,
                    })
            })
            .collect();
        let slots = (0..desc.set_count()).map(|set| desc.set(set).len()).collect();
        let refs: Vec<&wgpu::BindGroupLayout> = sets.iter().collect();
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Raylane Pipeline Layout"),
                bind_group_layouts: &refs,
                push_constant_ranges: &[],
            });
        Ok(self.layouts.insert(Layout {
            sets,
            slots,
            pipeline_layout,
        }))
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc, source: &str) -> Result<PipelineId> {
        let pipeline = self.compile(desc, source)?;
        Ok(self.pipelines.insert(Pipeline {
            desc: desc.clone(),
            pipeline,
        }))
    }

    fn rebuild_pipeline(
        &mut self,
        id: PipelineId,
        desc: &PipelineDesc,
        source: &str,
    ) -> Result<()> {
        if !self.pipelines.contains_key(id) {
            return unknown(PipelineId::KIND, id.raw());
        }
        let pipeline = self.compile(desc, source)?;
        if let Some(slot) = self.pipelines.get_mut(id) {
            *slot = Pipeline {
                desc: desc.clone(),
                pipeline,
            };
        }
        Ok(())
    }

    fn create_descriptors(&mut self, desc: &DescriptorsDesc) -> Result<DescriptorSetId> {
        if !self.layouts.contains_key(desc.layout) {
            return unknown(PipelineLayoutId::KIND, desc.layout.raw());
        }
        Ok(self.descriptors.insert(DescriptorSet {
            desc: desc.clone(),
            entries: desc.entries.iter().copied().collect(),
            group: None,
        }))
    }

    fn update_descriptor(
        &mut self,
        set: DescriptorSetId,
        binding: u32,
        resource: Subresource,
    ) -> Result<()> {
        let Some(ds) = self.descriptors.get_mut(set) else {
            return unknown(DescriptorSetId::KIND, set.raw());
        };
        ds.entries.insert(binding, resource);
        Ok(())
    }

    fn flush_descriptors(&mut self, set: DescriptorSetId) -> Result<()> {
        let Some(ds) = self.descriptors.get(set) else {
            return unknown(DescriptorSetId::KIND, set.raw());
        };
        let Some((layout, slots)) = self.layouts.get(ds.desc.layout).and_then(|l| {
            let set = ds.desc.set as usize;
            Some((l.sets.get(set)?, l.slots.get(set).copied()?))
        }) else {
            return unknown(PipelineLayoutId::KIND, ds.desc.layout.raw());
        };
        if ds.entries.len() < slots {
            // Inputs not published yet; the set is flushed again once they are.
            debug!("Deferring incomplete descriptor set '{}'", ds.desc.label);
            return Ok(());
        }
        let entries = ds
            .entries
            .iter()
            .map(|(binding, resource)| {
                Ok(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: self.resource(*resource)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let (group, err) = self.scoped(|device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&ds.desc.label),
                layout,
                entries: &entries,
            })
        });
        if let Some(err) = err {
            return Err(RenderError::ResourceCreation {
                label: ds.desc.label.clone(),
                extent: Extent::default(),
                reason: err.to_string(),
            });
        }
        if let Some(ds) = self.descriptors.get_mut(set) {
            ds.group = Some(group);
        }
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
        self.upload_staged(lists)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Raylane Submit"),
            });
        self.encode(&mut encoder, lists)?;
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn present(
        &mut self,
        image: ImageId,
        overlay: Option<ImageId>,
        lists: &[&CommandList],
    ) -> Result<()> {
        let Some(surface) = &self.surface else {
            return Err(RenderError::NoViewport);
        };
        let frame = match surface.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(err @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                warn!("Surface {err}, reconfiguring and skipping the frame");
                surface.surface.configure(&self.device, &surface.config);
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };
        let target = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.upload_staged(lists)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Raylane Present"),
            });
        self.encode(&mut encoder, lists)?;

        let frame_view = self.image_view(image)?;
        let overlay_view = match overlay {
            Some(id) => self.image_view(id)?,
            None => &self.present.empty_overlay,
        };
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Present Bind Group"),
            layout: &self.present.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(frame_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(overlay_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.present.sampler),
                },
            ],
        });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.present.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }

    fn read_image(&mut self, image: ImageId) -> Result<Vec<u8>> {
        let Some(src) = self.images.get(image) else {
            return unknown(ImageId::KIND, image.raw());
        };
        let Extent { width, height, .. } = src.desc.extent;
        if width == 0 || height == 0 {
            return Err(RenderError::Readback("image has no texels".into()));
        }

        let tight_bpr = (src.desc.format.bytes_per_pixel() * width) as usize;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
        let padded_bpr = tight_bpr.div_ceil(align) * align;

        let staging_size = (padded_bpr * height as usize) as u64;
        if staging_size > self.limits.max_buffer_size {
            return Err(RenderError::Readback(format!(
                "{staging_size} byte staging buffer exceeds the device limit of {}",
                self.limits.max_buffer_size
            )));
        }
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: staging_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &src.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr as u32),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| RenderError::Readback(e.to_string()))?;
        receiver
            .recv()
            .map_err(|e| RenderError::Readback(e.to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut tight = vec![0u8; tight_bpr * height as usize];
        for row in 0..height as usize {
            tight[row * tight_bpr..(row + 1) * tight_bpr]
                .copy_from_slice(&data[row * padded_bpr..row * padded_bpr + tight_bpr]);
        }
        drop(data);
        staging.unmap();
        Ok(tight)
    }

    fn wait_idle(&mut self) {
        if let Err(err) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            warn!("Device wait failed: {err}");
        }
    }

    fn configure_surface(&mut self, extent: Extent) -> Result<()> {
        let Some(surface) = &mut self.surface else {
            return Err(RenderError::NoViewport);
        };
        // Zero-sized surfaces (minimized windows) are rejected by wgpu.
        if extent.width > 0 && extent.height > 0 {
            surface.config.width = extent.width;
            surface.config.height = extent.height;
            surface.surface.configure(&self.device, &surface.config);
        }
        Ok(())
    }

    fn release_surface(&mut self) {
        self.surface = None;
    }

    fn surface_extent(&self) -> Option<Extent> {
        self.surface
            .as_ref()
            .map(|s| Extent::d2(s.config.width, s.config.height))
    }
}
