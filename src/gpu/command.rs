//! Backend-neutral command recording.

use super::{BufferId, DescriptorSetId, Extent, PipelineId};

/// A single recorded command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Upload the staged CPU copy of a buffer before later commands read it.
    FlushBuffer(BufferId),
    /// Bind descriptor sets starting at set 0.
    BindDescriptors(Vec<DescriptorSetId>),
    BindPipeline(PipelineId),
    /// Dispatch with thread counts per axis. The device divides by the bound
    /// pipeline's group size, rounding up.
    Dispatch([u32; 3]),
}

/// A linear command recording, replayed as-is on every submission until it
/// is cleared.
///
/// `generation` changes every time the list is cleared, so callers can tell
/// whether two submissions used the same recording.
#[derive(Debug, Default)]
pub struct CommandList {
    label: String,
    generation: u64,
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            generation: 0,
            commands: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drops every command and starts a new generation.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.generation += 1;
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn flush_buffer(&mut self, buffer: BufferId) {
        self.push(Command::FlushBuffer(buffer));
    }

    pub fn bind_descriptors(&mut self, sets: &[DescriptorSetId]) {
        self.push(Command::BindDescriptors(sets.to_vec()));
    }

    pub fn bind_pipeline(&mut self, pipeline: PipelineId) {
        self.push(Command::BindPipeline(pipeline));
    }

    pub fn dispatch(&mut self, threads: [u32; 3]) {
        self.push(Command::Dispatch(threads));
    }

    /// Dispatches one thread per texel of `extent`.
    pub fn dispatch_extent(&mut self, extent: Extent) {
        self.dispatch(extent.to_array());
    }

    /// Iterates over the thread counts of every dispatch, in order.
    pub fn dispatches(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.commands.iter().filter_map(|c| match c {
            Command::Dispatch(threads) => Some(*threads),
            _ => None,
        })
    }

    /// Descriptor sets bound by the most recent bind before command `index`.
    pub fn bound_before(&self, index: usize) -> Option<&[DescriptorSetId]> {
        self.commands[..index.min(self.commands.len())]
            .iter()
            .rev()
            .find_map(|c| match c {
                Command::BindDescriptors(sets) => Some(sets.as_slice()),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_bumps_generation() {
        let mut cl = CommandList::new("frame");
        assert_eq!(cl.generation(), 0);
        cl.dispatch([1, 1, 1]);
        cl.clear();
        assert!(cl.is_empty());
        assert_eq!(cl.generation(), 1);
    }

    #[test]
    fn dispatches_in_order() {
        let mut cl = CommandList::new("frame");
        cl.bind_pipeline(PipelineId::from_raw(3));
        cl.dispatch_extent(Extent::d2(800, 600));
        cl.flush_buffer(BufferId::from_raw(1));
        cl.dispatch([1, 1, 1]);
        let d: Vec<_> = cl.dispatches().collect();
        assert_eq!(d, vec![[800, 600, 1], [1, 1, 1]]);
    }

    #[test]
    fn bound_before_finds_latest_bind() {
        let mut cl = CommandList::new("frame");
        cl.bind_descriptors(&[DescriptorSetId::from_raw(1)]);
        cl.bind_descriptors(&[DescriptorSetId::from_raw(2), DescriptorSetId::from_raw(3)]);
        cl.dispatch([4, 4, 1]);
        assert_eq!(
            cl.bound_before(2),
            Some(&[DescriptorSetId::from_raw(2), DescriptorSetId::from_raw(3)][..])
        );
        assert_eq!(cl.bound_before(0), None);
    }
}
