//! The optional UI overlay.
//!
//! An overlay draws into its own texture, which the device blends over the
//! composite output when presenting. The frame controller records it into
//! a separate command list every frame, so UI changes never stale the main
//! recording.

use crate::error::Result;
use crate::gpu::{CommandList, Extent, GpuDevice, ImageId};
use crate::input::Control;

pub trait Overlay {
    /// Texture composited over the frame, once one exists.
    fn texture(&self) -> Option<ImageId>;

    fn resize(&mut self, device: &mut dyn GpuDevice, size: Extent) -> Result<()>;

    /// Appends this frame's UI work to `cl`, which is cleared beforehand.
    fn record(&mut self, device: &mut dyn GpuDevice, cl: &mut CommandList) -> Result<()>;

    /// Offers an input event to the UI. Returns `true` if the UI consumed
    /// it.
    fn on_input(&mut self, control: Control, active: bool) -> bool;

    fn release(&mut self, _device: &mut dyn GpuDevice) {}
}
