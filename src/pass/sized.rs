//! Viewport-sized resources.

use log::debug;

use super::PassContext;
use crate::error::Result;
use crate::gpu::{
    BufferDesc, BufferId, BufferUsage, Extent, ImageDesc, ImageFormat, ImageId, Subresource,
};

/// A set of 2D images that always share one size.
///
/// Each image is published to the output registry under its name whenever
/// it is recreated.
#[derive(Debug)]
pub struct SizedImages {
    specs: Vec<(&'static str, ImageFormat)>,
    ids: Vec<ImageId>,
    size: Extent,
}

impl SizedImages {
    /// `specs` names each image (its output name) and gives its format.
    pub fn new(specs: &[(&'static str, ImageFormat)]) -> Self {
        Self {
            specs: specs.to_vec(),
            ids: Vec::new(),
            size: Extent::default(),
        }
    }

    pub fn size(&self) -> Extent {
        self.size
    }

    pub fn is_allocated(&self) -> bool {
        !self.ids.is_empty()
    }

    pub fn image(&self, index: usize) -> Option<ImageId> {
        self.ids.get(index).copied()
    }

    pub fn ids(&self) -> &[ImageId] {
        &self.ids
    }

    pub fn name(&self, index: usize) -> Option<&'static str> {
        self.specs.get(index).map(|(name, _)| *name)
    }

    /// Recreates every image at `size`. Returns `false` when the images
    /// already have that size.
    ///
    /// On failure every image is released, so a later resize starts clean.
    pub fn resize(&mut self, ctx: &mut PassContext<'_>, size: Extent) -> Result<bool> {
        let size = Extent::d2(size.width, size.height);
        if self.is_allocated() && size == self.size {
            return Ok(false);
        }

        ctx.device.wait_idle();
        self.release(ctx);

        for (name, format) in self.specs.clone() {
            let desc = ImageDesc::d2(name, format, size);
            match ctx.device.create_image(&desc) {
                Ok(id) => {
                    ctx.outputs.publish(name, Subresource::Image(id));
                    self.ids.push(id);
                }
                Err(err) => {
                    self.release(ctx);
                    return Err(err);
                }
            }
        }
        debug!(
            "Recreated {} image(s) at {}x{}",
            self.ids.len(),
            size.width,
            size.height
        );
        self.size = size;
        Ok(true)
    }

    pub fn release(&mut self, ctx: &mut PassContext<'_>) {
        for (id, (name, _)) in self.ids.drain(..).zip(&self.specs) {
            ctx.device.destroy_image(id);
            ctx.outputs.withdraw(name);
        }
        self.size = Extent::default();
    }
}

/// A buffer whose byte size follows the viewport.
#[derive(Debug)]
pub struct SizedBuffer {
    name: &'static str,
    usage: BufferUsage,
    id: Option<BufferId>,
    bytes: u64,
}

impl SizedBuffer {
    pub fn new(name: &'static str, usage: BufferUsage) -> Self {
        Self {
            name,
            usage,
            id: None,
            bytes: 0,
        }
    }

    pub fn id(&self) -> Option<BufferId> {
        self.id
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Recreates the buffer with `bytes` bytes. Returns `false` when it
    /// already has that size.
    pub fn ensure(&mut self, ctx: &mut PassContext<'_>, bytes: u64) -> Result<bool> {
        if self.id.is_some() && bytes == self.bytes {
            return Ok(false);
        }
        ctx.device.wait_idle();
        self.release(ctx);
        let id = ctx.device.create_buffer(&BufferDesc {
            label: self.name.to_string(),
            size: bytes,
            usage: self.usage,
        })?;
        ctx.outputs.publish(self.name, Subresource::Buffer(id));
        self.id = Some(id);
        self.bytes = bytes;
        Ok(true)
    }

    pub fn release(&mut self, ctx: &mut PassContext<'_>) {
        if let Some(id) = self.id.take() {
            ctx.device.destroy_buffer(id);
            ctx.outputs.withdraw(self.name);
        }
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InlineShaders, ResourceCache};
    use crate::gpu::HeadlessDevice;
    use crate::pass::OutputRegistry;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn images_match_last_size(sizes in prop::collection::vec((1u32..4096, 1u32..4096), 1..8)) {
            let mut device = HeadlessDevice::new();
            let mut cache = ResourceCache::new(InlineShaders::new());
            let mut outputs = OutputRegistry::new();
            let mut ctx = PassContext::new(&mut device, &mut cache, &mut outputs);
            let mut images = SizedImages::new(&[
                ("t.a", ImageFormat::Rgba32Float),
                ("t.b", ImageFormat::Rgba8Unorm),
            ]);
            for (w, h) in &sizes {
                images.resize(&mut ctx, Extent::d2(*w, *h)).unwrap();
            }
            let (w, h) = *sizes.last().unwrap();
            for id in images.ids() {
                prop_assert_eq!(ctx.device.image_desc(*id).unwrap().extent, Extent::d2(w, h));
            }
            prop_assert_eq!(ctx.outputs.image("t.a"), images.image(0));
            drop(ctx);
            prop_assert_eq!(device.live_images(), 2);
        }
    }

    #[test]
    fn same_size_is_a_no_op() {
        let mut device = HeadlessDevice::new();
        let mut cache = ResourceCache::new(InlineShaders::new());
        let mut outputs = OutputRegistry::new();
        let mut ctx = PassContext::new(&mut device, &mut cache, &mut outputs);
        let mut images = SizedImages::new(&[("t.a", ImageFormat::Rgba8Unorm)]);
        assert!(images.resize(&mut ctx, Extent::d2(8, 8)).unwrap());
        let version = ctx.outputs.get("t.a").unwrap().version;
        assert!(!images.resize(&mut ctx, Extent::d2(8, 8)).unwrap());
        assert_eq!(ctx.outputs.get("t.a").unwrap().version, version);
        drop(ctx);
        assert_eq!(device.created_images.len(), 1);
        assert_eq!(device.wait_idle_calls, 1);
    }

    #[test]
    fn failed_resize_releases_everything() {
        let mut device = HeadlessDevice::new();
        device.fail_images_above(100);
        let mut cache = ResourceCache::new(InlineShaders::new());
        let mut outputs = OutputRegistry::new();
        let mut ctx = PassContext::new(&mut device, &mut cache, &mut outputs);
        let mut images = SizedImages::new(&[("t.a", ImageFormat::Rgba8Unorm)]);
        images.resize(&mut ctx, Extent::d2(10, 10)).unwrap();
        assert!(images.resize(&mut ctx, Extent::d2(20, 20)).is_err());
        assert!(!images.is_allocated());
        assert!(ctx.outputs.get("t.a").is_none());
        drop(ctx);
        assert_eq!(device.live_images(), 0);
    }

    #[test]
    fn buffer_follows_requested_bytes() {
        let mut device = HeadlessDevice::new();
        let mut cache = ResourceCache::new(InlineShaders::new());
        let mut outputs = OutputRegistry::new();
        let mut ctx = PassContext::new(&mut device, &mut cache, &mut outputs);
        let mut buffer = SizedBuffer::new("t.buf", BufferUsage::Storage);
        assert!(buffer.ensure(&mut ctx, 64).unwrap());
        assert!(!buffer.ensure(&mut ctx, 64).unwrap());
        assert!(buffer.ensure(&mut ctx, 128).unwrap());
        assert_eq!(ctx.device.buffer_size(buffer.id().unwrap()), Some(128));
        drop(ctx);
        assert_eq!(device.live_buffers(), 1);
    }
}
