//! Published pass outputs.
//!
//! Producers publish the handle of every image or buffer other passes may
//! read under a dotted name (`raygen.dir_t`). Each publish gets a fresh
//! version number. Consumers remember the version they bound and rebind
//! when the registry holds a newer one, so a resized producer never leaves
//! a consumer pointing at a destroyed image.

use std::collections::HashMap;

use log::debug;

use crate::error::Result;
use crate::gpu::{BufferId, DescriptorSetId, GpuDevice, ImageId, Subresource};

/// A published resource and the version it was published at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Output {
    pub resource: Subresource,
    pub version: u64,
}

#[derive(Debug, Default)]
pub struct OutputRegistry {
    entries: HashMap<String, Output>,
    next_version: u64,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `resource` under `name`, replacing any earlier entry.
    pub fn publish(&mut self, name: &str, resource: Subresource) -> u64 {
        self.next_version += 1;
        let version = self.next_version;
        self.entries
            .insert(name.to_string(), Output { resource, version });
        version
    }

    pub fn withdraw(&mut self, name: &str) {
        self.entries.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<Output> {
        self.entries.get(name).copied()
    }

    pub fn image(&self, name: &str) -> Option<ImageId> {
        match self.get(name)?.resource {
            Subresource::Image(id) => Some(id),
            _ => None,
        }
    }

    pub fn buffer(&self, name: &str) -> Option<BufferId> {
        match self.get(name)?.resource {
            Subresource::Buffer(id) => Some(id),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct Input {
    binding: u32,
    output: &'static str,
    bound: Option<u64>,
}

/// Descriptor slots of one set that read other passes' outputs.
#[derive(Debug)]
pub struct InputBindings {
    set: DescriptorSetId,
    inputs: Vec<Input>,
}

impl InputBindings {
    /// `inputs` pairs each binding slot with the output it reads.
    pub fn new(set: DescriptorSetId, inputs: &[(u32, &'static str)]) -> Self {
        Self {
            set,
            inputs: inputs
                .iter()
                .map(|(binding, output)| Input {
                    binding: *binding,
                    output: *output,
                    bound: None,
                })
                .collect(),
        }
    }

    pub fn set(&self) -> DescriptorSetId {
        self.set
    }

    /// Whether any slot is bound to an older version than the registry's.
    pub fn is_stale(&self, outputs: &OutputRegistry) -> bool {
        self.inputs
            .iter()
            .any(|input| outputs.get(input.output).map(|o| o.version) != input.bound)
    }

    /// Rebinds every stale slot and flushes the set. Returns whether
    /// anything was rebound. Outputs that are not published yet are skipped.
    pub fn refresh(
        &mut self,
        device: &mut dyn GpuDevice,
        outputs: &OutputRegistry,
    ) -> Result<bool> {
        let mut changed = false;
        for input in &mut self.inputs {
            let Some(output) = outputs.get(input.output) else {
                continue;
            };
            if input.bound == Some(output.version) {
                continue;
            }
            device.update_descriptor(self.set, input.binding, output.resource)?;
            input.bound = Some(output.version);
            changed = true;
        }
        if changed {
            debug!("Rebound inputs of descriptor set {}", self.set.raw());
            device.flush_descriptors(self.set)?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{
        BindingKind, BindingLayout, DescriptorsDesc, Extent, HeadlessDevice, ImageDesc,
        ImageDimension, ImageFormat, PipelineLayoutDesc,
    };

    #[test]
    fn publish_bumps_version() {
        let mut outputs = OutputRegistry::new();
        let a = outputs.publish("a", Subresource::Image(ImageId::from_raw(1)));
        let b = outputs.publish("a", Subresource::Image(ImageId::from_raw(2)));
        assert!(b > a);
        assert_eq!(outputs.image("a"), Some(ImageId::from_raw(2)));
        assert_eq!(outputs.buffer("a"), None);
    }

    #[test]
    fn refresh_rebinds_only_stale_slots() {
        let mut device = HeadlessDevice::new();
        let layout = device
            .create_pipeline_layout(&PipelineLayoutDesc::new(vec![BindingLayout::new(
                "input",
                2,
                0,
                BindingKind::SampledImage {
                    dimension: ImageDimension::D2,
                    filterable: false,
                },
            )]))
            .unwrap();
        let set = device
            .create_descriptors(&DescriptorsDesc::new("set", layout, 2, vec![]))
            .unwrap();
        let desc = ImageDesc::d2("img", ImageFormat::Rgba32Float, Extent::d2(2, 2));
        let first = device.create_image(&desc).unwrap();

        let mut outputs = OutputRegistry::new();
        let mut inputs = InputBindings::new(set, &[(0, "producer.out")]);
        assert!(!inputs.refresh(&mut device, &outputs).unwrap());

        outputs.publish("producer.out", Subresource::Image(first));
        assert!(inputs.is_stale(&outputs));
        assert!(inputs.refresh(&mut device, &outputs).unwrap());
        assert!(!inputs.is_stale(&outputs));
        assert!(!inputs.refresh(&mut device, &outputs).unwrap());

        let second = device.create_image(&desc).unwrap();
        outputs.publish("producer.out", Subresource::Image(second));
        assert!(inputs.refresh(&mut device, &outputs).unwrap());
        assert_eq!(device.descriptor(set, 0), Some(Subresource::Image(second)));
    }
}
