//! # Raylane
//!
//! **A compute-pass frame renderer that records once and resubmits.**
//!
//! Raylane assembles a fixed tree of GPU compute passes (primary rays,
//! shadows and lighting, volumetric clouds, final composition) into a single
//! command recording. The recording is replayed every frame and only rebuilt
//! when a pass reports that it went stale: after a resize, a new scene, a
//! hot-reloaded shader or a parameter edit that changes a dispatch shape.
//!
//! ## Quick Start
//!
//! ```no_run
//! use raylane::AppConfig;
//!
//! fn main() -> raylane::Result<()> {
//!     raylane::run(AppConfig::new().title("clouds").size(1600, 900))
//! }
//! ```
//!
//! ## Driving frames yourself
//!
//! [`FrameController`] is generic over the [`GpuDevice`](gpu::GpuDevice),
//! so the whole frame protocol also runs on the in-memory
//! [`HeadlessDevice`](gpu::HeadlessDevice):
//!
//! ```no_run
//! use raylane::gpu::{Extent, GpuDevice, HeadlessDevice};
//! use raylane::scene::{DemoScene, Scene};
//! use raylane::{CaptureRequest, FileShaderSource, FrameController, ResourceCache};
//!
//! # fn main() -> raylane::Result<()> {
//! let cache = ResourceCache::new(FileShaderSource::new("shaders"));
//! let mut frame = FrameController::new(
//!     HeadlessDevice::new(),
//!     cache,
//!     Box::new(|device: &mut dyn GpuDevice, cache: &mut ResourceCache| {
//!         Ok(Box::new(DemoScene::new(device, cache)?) as Box<dyn Scene>)
//!     }),
//! )?;
//! frame.init(Extent::d2(800, 600))?;
//! frame.update(0.016)?;
//! frame.render()?;
//! frame.capture(&CaptureRequest::new(3840, 2160, 8, "out/0"))?;
//! # Ok(())
//! # }
//! ```

mod app;
mod cache;
mod camera;
pub mod capture;
mod config;
mod error;
mod frame;
pub mod gpu;
mod hot_reload;
mod input;
mod overlay;
pub mod params;
pub mod pass;
pub mod passes;
pub mod scene;

pub use app::run;
pub use cache::{FileShaderSource, InlineShaders, ResourceCache, ShaderSource};
pub use camera::{CAMERA_BINDINGS, Camera, CameraFlags, CameraUniform, TILE};
pub use capture::{CaptureFormat, CaptureRequest, CapturedImage};
pub use config::{AppConfig, CaptureSettings, ResolutionPreset};
pub use error::{RenderError, Result};
pub use frame::{FpsCounter, FrameController, RecordingState, SceneFactory};
pub use hot_reload::{HotReload, PipelineChanged};
pub use input::{Control, InputDevice, InputState, Routed, control_event};
pub use overlay::Overlay;

// Re-export commonly used winit types for convenience
pub use winit::event::MouseButton;
pub use winit::keyboard::KeyCode;
