//! The per-frame driver.
//!
//! [`FrameController`] owns the GPU device, the pass tree, the active scene
//! and the single frame recording. It decides every frame whether the
//! recording is still valid:
//!
//! ```text
//!            resize / attach scene / mode change
//!   ┌───────┐ ───────────────────────────────▶ ┌───────┐
//!   │ Valid │                                  │ Stale │
//!   └───────┘ ◀─────────────────────────────── └───────┘
//!               clear, record tree, mark_recorded
//! ```
//!
//! While Valid, `render` resubmits the existing recording. Per-frame data
//! (camera, seed offsets, wind) reaches the GPU through the `FlushBuffer`
//! commands the recording already contains. Passes can also stale the
//! recording on their own through [`Pass::needs_rerecord`], after a hot
//! reload or a structural parameter edit.
//!
//! Offline captures run at the start of the next `render` after
//! [`request_capture`](FrameController::request_capture).

use std::path::PathBuf;

use log::{debug, error, info, warn};

use crate::cache::ResourceCache;
use crate::camera::{CAMERA_BINDINGS, Camera, CameraFlags};
use crate::capture::{self, CaptureRequest};
use crate::error::{RenderError, Result};
use crate::gpu::{
    BufferDesc, BufferId, CommandList, DescriptorSetId, DescriptorsDesc, Extent, GpuDevice,
    ImageFormat, ImageId, PipelineLayoutDesc, Subresource,
};
use crate::hot_reload::PipelineChanged;
use crate::input::{Control, InputState};
use crate::overlay::Overlay;
use crate::params::{CameraParams, Params};
use crate::pass::{OutputRegistry, Pass, PassContext, RenderMode};
use crate::passes::CompositePass;
use crate::scene::Scene;

/// Whether the frame recording matches the current configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    Valid,
    Stale,
}

/// Frames per second over windows of at least one second.
#[derive(Clone, Copy, Debug, Default)]
pub struct FpsCounter {
    frames: u32,
    elapsed: f32,
    fps: Option<f32>,
}

impl FpsCounter {
    /// Counts one frame. Returns the new rate when a window closes.
    pub fn tick(&mut self, dt: f32) -> Option<f32> {
        self.frames += 1;
        self.elapsed += dt;
        if self.elapsed < 1.0 {
            return None;
        }
        let fps = self.frames as f32 / self.elapsed;
        self.fps = Some(fps);
        self.frames = 0;
        self.elapsed = 0.0;
        Some(fps)
    }

    /// Rate of the last closed window.
    pub fn fps(&self) -> Option<f32> {
        self.fps
    }
}

/// Builds a scene on the controller's device.
pub type SceneFactory<'a> =
    dyn FnOnce(&mut dyn GpuDevice, &mut ResourceCache) -> Result<Box<dyn Scene>> + 'a;

/// Drives one viewport through `init → {update, render}* → release`.
pub struct FrameController<D: GpuDevice> {
    device: D,
    cache: ResourceCache,
    outputs: OutputRegistry,

    camera: Camera,
    camera_params: CameraParams,
    camera_buffer: BufferId,
    camera_set: DescriptorSetId,

    root: CompositePass,
    scene: Box<dyn Scene>,
    overlay: Option<Box<dyn Overlay>>,
    input: InputState,

    frame: CommandList,
    overlay_list: CommandList,
    state: RecordingState,
    viewport: Option<Extent>,
    pending_capture: Option<CaptureRequest>,
    fps: FpsCounter,
}

impl<D: GpuDevice> FrameController<D> {
    /// Builds the pass tree and the scene. Nothing is sized until
    /// [`init`](Self::init).
    pub fn new(
        mut device: D,
        mut cache: ResourceCache,
        make_scene: Box<SceneFactory<'_>>,
    ) -> Result<Self> {
        let camera_layout = cache.layout(
            &mut device,
            "Camera layout",
            &PipelineLayoutDesc::new(CAMERA_BINDINGS.to_vec()),
        )?;
        let camera_buffer = device.create_buffer(&BufferDesc::uniform(
            "Camera",
            std::mem::size_of::<crate::camera::CameraUniform>() as u64,
        ))?;
        let camera_set = device.create_descriptors(&DescriptorsDesc::new(
            "Camera descriptors",
            camera_layout,
            0,
            vec![(0, Subresource::Buffer(camera_buffer))],
        ))?;
        device.flush_descriptors(camera_set)?;

        let scene = make_scene(&mut device, &mut cache)?;
        let mut outputs = OutputRegistry::new();
        let mut ctx = PassContext::new(&mut device, &mut cache, &mut outputs);
        let mut root = CompositePass::new(&mut ctx, camera_set)?;
        root.attach_scene(&mut ctx, scene.as_ref())?;

        Ok(Self {
            device,
            cache,
            outputs,
            camera: Camera::new(),
            camera_params: CameraParams::default(),
            camera_buffer,
            camera_set,
            root,
            scene,
            overlay: None,
            input: InputState::new(),
            frame: CommandList::new("Frame"),
            overlay_list: CommandList::new("Overlay"),
            state: RecordingState::Stale,
            viewport: None,
            pending_capture: None,
            fps: FpsCounter::default(),
        })
    }

    pub fn with_overlay(mut self, overlay: Box<dyn Overlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn with_camera(mut self, camera: Camera) -> Self {
        self.camera_params = CameraParams {
            fov: camera.fov,
            speed: camera.speed,
        };
        self.camera = camera;
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn root(&self) -> &CompositePass {
        &self.root
    }

    pub fn scene(&self) -> &dyn Scene {
        self.scene.as_ref()
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn viewport(&self) -> Option<Extent> {
        self.viewport
    }

    pub fn fps(&self) -> Option<f32> {
        self.fps.fps()
    }

    /// Generation of the current frame recording.
    pub fn recording_generation(&self) -> u64 {
        self.frame.generation()
    }

    pub fn overlay_visible(&self) -> bool {
        self.camera.flags.contains(CameraFlags::USE_UI)
    }

    /// Whether the next `render` rebuilds the recording.
    pub fn needs_rerecord(&self) -> bool {
        self.state == RecordingState::Stale || self.root.needs_rerecord()
    }

    /// Every editable parameter group, camera first.
    pub fn params_mut(&mut self) -> Vec<&mut dyn Params> {
        let mut params: Vec<&mut dyn Params> = vec![&mut self.camera_params];
        params.extend(self.root.params_mut());
        params
    }

    /// Sizes the tree and the surface for a new viewport.
    pub fn init(&mut self, size: Extent) -> Result<()> {
        if self.viewport.is_some() {
            return Err(RenderError::MultipleViewports);
        }
        info!("Viewport init at {}x{}", size.width, size.height);
        self.device.configure_surface(size)?;
        self.resize_tree(size)?;
        if let Some(overlay) = &mut self.overlay {
            overlay.resize(&mut self.device, size)?;
        }
        self.viewport = Some(size);
        self.write_camera()
    }

    pub fn resize(&mut self, size: Extent) -> Result<()> {
        if self.viewport.is_none() {
            return Err(RenderError::NoViewport);
        }
        if size.is_empty() || self.viewport == Some(size) {
            return Ok(());
        }
        info!("Viewport resize to {}x{}", size.width, size.height);
        self.device.configure_surface(size)?;
        self.resize_tree(size)?;
        if let Some(overlay) = &mut self.overlay {
            overlay.resize(&mut self.device, size)?;
        }
        self.viewport = Some(size);
        self.write_camera()
    }

    /// Advances the camera, the scene and the pass tree by `dt` seconds.
    pub fn update(&mut self, dt: f32) -> Result<()> {
        if self.viewport.is_none() {
            return Err(RenderError::NoViewport);
        }
        for PipelineChanged(id) in self.cache.poll_hot_reload(&mut self.device) {
            if self.root.on_pipeline_changed(id) {
                debug!("Pipeline {id:?} reloaded, recording is stale");
            }
        }
        if let Some(fps) = self.fps.tick(dt) {
            debug!("{fps:.1} fps");
        }
        self.update_frame(dt)
    }

    /// Submits the frame and presents it, after running a pending capture.
    ///
    /// A failed capture is logged and returned as [`RenderError::Capture`];
    /// the live configuration is restored either way.
    pub fn render(&mut self) -> Result<()> {
        if self.viewport.is_none() {
            return Err(RenderError::NoViewport);
        }
        if let Some(request) = self.pending_capture.take() {
            self.capture(&request)?;
        }

        self.ensure_recorded()?;
        let output = self.root.output().ok_or(RenderError::NoViewport)?;
        let overlay = match &mut self.overlay {
            Some(overlay) if self.camera.flags.contains(CameraFlags::USE_UI) => {
                self.overlay_list.clear();
                overlay.record(&mut self.device, &mut self.overlay_list)?;
                overlay.texture()
            }
            _ => None,
        };
        if overlay.is_some() {
            self.device
                .present(output, overlay, &[&self.frame, &self.overlay_list])?;
        } else {
            self.device.present(output, None, &[&self.frame])?;
        }
        self.root.on_submitted();
        Ok(())
    }

    /// Routes one input event through the overlay, the camera and the
    /// scene.
    pub fn on_input_event(&mut self, control: Control, active: bool) {
        let visible = self.overlay_visible();
        let consumed = match &mut self.overlay {
            Some(overlay) if visible => overlay.on_input(control, active),
            _ => false,
        };
        let routed = self.input.apply(control, active, consumed);
        if routed.toggle_overlay {
            self.camera.flags.toggle(CameraFlags::USE_UI);
            debug!("Overlay visible: {}", self.overlay_visible());
        }
        if routed.forward_to_scene {
            self.scene.on_input(control, active);
        }
    }

    /// Queues a capture for the start of the next `render`.
    pub fn request_capture(&mut self, request: CaptureRequest) {
        self.pending_capture = Some(request);
    }

    pub fn has_pending_capture(&self) -> bool {
        self.pending_capture.is_some()
    }

    /// Runs a capture immediately and returns the written artifact's path.
    ///
    /// The capture size is clamped to the device's largest 2D texture.
    pub fn capture(&mut self, request: &CaptureRequest) -> Result<PathBuf> {
        let live = self.viewport.ok_or(RenderError::NoViewport)?;
        let flags = self.camera.flags;
        let size = self.device.limits().clamp_2d(request.size);
        if size != request.size {
            warn!(
                "Capture size {}x{} clamped to {}x{}",
                request.size.width, request.size.height, size.width, size.height
            );
        }
        info!(
            "Capture start: {}x{} at {} samples",
            size.width, size.height, request.samples
        );

        let result = self.run_capture(request, size);
        let restored = self.restore(live, flags);
        match (result, restored) {
            (Ok(path), Ok(())) => {
                info!("Capture finished: {}", path.display());
                Ok(path)
            }
            (Err(err), _) | (Ok(_), Err(err)) => {
                error!("Capture aborted: {err}");
                Err(RenderError::Capture(Box::new(err)))
            }
        }
    }

    /// Replaces the active scene. The old scene is released once the device
    /// is idle.
    pub fn replace_scene(&mut self, make_scene: Box<SceneFactory<'_>>) -> Result<()> {
        let scene = make_scene(&mut self.device, &mut self.cache)?;
        self.device.wait_idle();
        let mut old = std::mem::replace(&mut self.scene, scene);
        old.release(&mut self.device);
        let mut ctx = PassContext::new(&mut self.device, &mut self.cache, &mut self.outputs);
        self.root.attach_scene(&mut ctx, self.scene.as_ref())?;
        self.state = RecordingState::Stale;
        Ok(())
    }

    /// Destroys every resource and hands the device back.
    pub fn release(mut self) -> D {
        info!("Viewport release");
        self.device.wait_idle();
        if let Some(overlay) = &mut self.overlay {
            overlay.release(&mut self.device);
        }
        let mut ctx = PassContext::new(&mut self.device, &mut self.cache, &mut self.outputs);
        self.root.release(&mut ctx);
        self.scene.release(&mut self.device);
        self.device.destroy_descriptors(self.camera_set);
        self.device.destroy_buffer(self.camera_buffer);
        self.device.release_surface();
        self.device
    }

    fn run_capture(&mut self, request: &CaptureRequest, size: Extent) -> Result<PathBuf> {
        self.resize_tree(size)?;
        self.camera.flags.remove(CameraFlags::USE_UI);
        self.camera
            .flags
            .set(CameraFlags::USE_SUPERSAMPLING, request.samples > 1);
        self.set_mode(RenderMode::Offline);
        self.update_frame(0.0)?;
        self.ensure_recorded()?;

        for _ in 0..request.samples {
            self.device.submit(&[&self.frame])?;
            self.root.on_submitted();
        }
        let output = self
            .root
            .output()
            .ok_or_else(|| RenderError::Readback("composite output missing".into()))?;
        let format = self.image_format(output)?;
        let data = self.device.read_image(output)?;
        capture::save(request, size, format, &data)
    }

    fn image_format(&self, image: ImageId) -> Result<ImageFormat> {
        self.device
            .image_desc(image)
            .map(|desc| desc.format)
            .ok_or(RenderError::UnknownHandle {
                kind: ImageId::KIND,
                id: image.raw(),
            })
    }

    fn restore(&mut self, size: Extent, flags: CameraFlags) -> Result<()> {
        self.camera.flags = flags;
        self.set_mode(RenderMode::Interactive);
        self.resize_tree(size)?;
        self.write_camera()
    }

    fn set_mode(&mut self, mode: RenderMode) {
        if self.root.mode() != mode {
            debug!("Render mode {mode:?}");
            self.root.prepare_mode(mode);
            self.state = RecordingState::Stale;
        }
    }

    fn resize_tree(&mut self, size: Extent) -> Result<()> {
        self.camera.set_size(size.width, size.height);
        let mut ctx = PassContext::new(&mut self.device, &mut self.cache, &mut self.outputs);
        self.root.resize(&mut ctx, size)?;
        self.state = RecordingState::Stale;
        Ok(())
    }

    fn write_camera(&mut self) -> Result<()> {
        let uniform = self.camera.uniform();
        self.device
            .write_buffer(self.camera_buffer, 0, bytemuck::bytes_of(&uniform))
    }

    fn update_frame(&mut self, dt: f32) -> Result<()> {
        self.camera.apply_params(&self.camera_params);
        self.camera
            .advance(self.input.direction(), dt * self.input.speed_multiplier());
        self.write_camera()?;
        self.scene.update(&mut self.device, dt)?;
        let mut ctx = PassContext::new(&mut self.device, &mut self.cache, &mut self.outputs);
        self.root.update(&mut ctx, dt)
    }

    /// Rebuilds the recording if it is stale. Returns whether it did.
    fn ensure_recorded(&mut self) -> Result<bool> {
        if !self.needs_rerecord() {
            return Ok(false);
        }
        self.frame.clear();
        self.frame.flush_buffer(self.camera_buffer);
        self.scene.fill_command_list(&mut self.frame);
        let mut ctx = PassContext::new(&mut self.device, &mut self.cache, &mut self.outputs);
        self.root.record(&mut ctx, &mut self.frame)?;
        self.root.mark_recorded();
        self.state = RecordingState::Valid;
        debug!(
            "Recorded frame generation {} ({} commands)",
            self.frame.generation(),
            self.frame.len()
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::read_container;
    use crate::gpu::{DeviceLimits, HeadlessDevice, ImageDesc};
    use crate::params::{ParamValue, set_param};
    use crate::hot_reload::HotReload;
    use crate::passes::{names, testing};
    use crate::scene::DemoScene;
    use winit::keyboard::KeyCode;

    fn demo(device: &mut dyn GpuDevice, cache: &mut ResourceCache) -> Result<Box<dyn Scene>> {
        Ok(Box::new(DemoScene::new(device, cache)?))
    }

    fn controller_with(cache: ResourceCache) -> FrameController<HeadlessDevice> {
        FrameController::new(HeadlessDevice::new(), cache, Box::new(demo)).unwrap()
    }

    fn live(width: u32, height: u32) -> FrameController<HeadlessDevice> {
        let mut frame = controller_with(testing::cache());
        frame.init(Extent::d2(width, height)).unwrap();
        frame
    }

    /// Renders until the one-shot noise generation has left the recording.
    fn settle(frame: &mut FrameController<HeadlessDevice>) {
        for _ in 0..2 {
            frame.update(0.016).unwrap();
            frame.render().unwrap();
        }
        assert!(!frame.needs_rerecord());
    }

    fn last_present(frame: &FrameController<HeadlessDevice>) -> crate::gpu::Submission {
        frame.device().presents().last().cloned().unwrap()
    }

    #[derive(Default)]
    struct TestOverlay {
        texture: Option<ImageId>,
        consume: bool,
        records: usize,
    }

    impl Overlay for TestOverlay {
        fn texture(&self) -> Option<ImageId> {
            self.texture
        }

        fn resize(&mut self, device: &mut dyn GpuDevice, size: Extent) -> Result<()> {
            if let Some(old) = self.texture.take() {
                device.destroy_image(old);
            }
            self.texture =
                Some(device.create_image(&ImageDesc::d2("UI", ImageFormat::Rgba8Unorm, size))?);
            Ok(())
        }

        fn record(&mut self, _device: &mut dyn GpuDevice, _cl: &mut CommandList) -> Result<()> {
            self.records += 1;
            Ok(())
        }

        fn on_input(&mut self, _control: Control, _active: bool) -> bool {
            self.consume
        }
    }

    #[test]
    fn second_init_is_rejected() {
        let mut frame = live(64, 64);
        assert!(matches!(
            frame.init(Extent::d2(64, 64)),
            Err(RenderError::MultipleViewports)
        ));
    }

    #[test]
    fn render_needs_a_viewport() {
        let mut frame = controller_with(testing::cache());
        assert!(matches!(frame.render(), Err(RenderError::NoViewport)));
        assert!(matches!(frame.update(0.1), Err(RenderError::NoViewport)));
    }

    #[test]
    fn valid_recording_is_resubmitted() {
        let mut frame = live(64, 48);
        settle(&mut frame);
        let generation = frame.recording_generation();
        let before = frame.device().submissions.len();

        for _ in 0..3 {
            frame.update(0.016).unwrap();
            frame.render().unwrap();
        }
        assert_eq!(frame.recording_generation(), generation);
        let presents: Vec<_> = frame.device().submissions[before..].to_vec();
        assert_eq!(presents.len(), 3);
        assert!(presents.iter().all(|s| s.generations == vec![generation]));
    }

    #[test]
    fn resize_stales_until_next_record() {
        let mut frame = live(64, 48);
        settle(&mut frame);
        let generation = frame.recording_generation();

        frame.resize(Extent::d2(32, 32)).unwrap();
        assert!(frame.needs_rerecord());
        assert_eq!(frame.state(), RecordingState::Stale);
        frame.render().unwrap();
        assert!(frame.recording_generation() > generation);
        assert_eq!(frame.camera().width, 32);

        let output = frame.root().output().unwrap();
        assert_eq!(
            frame.device().image_desc(output).unwrap().extent,
            Extent::d2(32, 32)
        );
        assert_eq!(last_present(&frame).presented, Some(output));
    }

    #[test]
    fn resize_to_same_size_keeps_recording() {
        let mut frame = live(64, 48);
        settle(&mut frame);
        frame.resize(Extent::d2(64, 48)).unwrap();
        assert!(!frame.needs_rerecord());
    }

    #[test]
    fn new_scene_stales_and_releases_the_old_one() {
        let mut frame = live(16, 16);
        settle(&mut frame);
        let old_lights = frame.scene().light_buffer();
        let old_id = frame.scene().id();

        frame.replace_scene(Box::new(demo)).unwrap();
        assert_ne!(frame.scene().id(), old_id);
        assert!(frame.needs_rerecord());
        assert!(frame.device().destroyed_buffers.contains(&old_lights));
        frame.render().unwrap();
        assert_eq!(frame.state(), RecordingState::Valid);
    }

    #[test]
    fn capture_scenario_restores_live_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/0");
        let mut frame = live(800, 600);
        settle(&mut frame);
        let submissions_before = frame.device().submissions.len();

        frame.request_capture(CaptureRequest::new(3840, 2160, 8, &path));
        frame.render().unwrap();
        assert!(!frame.has_pending_capture());

        let image = read_container(&path).unwrap();
        assert_eq!(image.extent, Extent::d2(3840, 2160));
        assert_eq!(image.format, ImageFormat::Rgba8Unorm);

        let after = &frame.device().submissions[submissions_before..];
        let offline: Vec<_> = after.iter().filter(|s| s.presented.is_none()).collect();
        assert_eq!(offline.len(), 8);
        assert!(offline.iter().all(|s| s.generations == offline[0].generations));
        assert_eq!(frame.device().readbacks.len(), 1);

        assert_eq!(frame.viewport(), Some(Extent::d2(800, 600)));
        assert_eq!(frame.camera().width, 800);
        assert!(frame.overlay_visible());
        assert!(!frame.camera().flags.contains(CameraFlags::USE_SUPERSAMPLING));
        assert_eq!(frame.root().mode(), RenderMode::Interactive);

        let live_output = frame.root().output().unwrap();
        assert_eq!(
            frame.device().image_desc(live_output).unwrap().extent,
            Extent::d2(800, 600)
        );
        assert_eq!(last_present(&frame).presented, Some(live_output));
    }

    #[test]
    fn failed_readback_restores_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0");
        let mut frame = live(80, 60);
        settle(&mut frame);
        frame.device_mut().fail_readbacks(true);

        let err = frame
            .capture(&CaptureRequest::new(160, 120, 2, &path))
            .unwrap_err();
        assert!(matches!(err, RenderError::Capture(_)));
        assert!(matches!(err.root(), RenderError::Readback(_)));
        assert!(!path.exists());
        assert_eq!(frame.camera().width, 80);
        assert!(frame.overlay_visible());
        assert_eq!(frame.root().mode(), RenderMode::Interactive);

        frame.device_mut().clear_failures();
        frame.render().unwrap();
    }

    #[test]
    fn failed_capture_resize_restores_live_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut frame = live(80, 60);
        settle(&mut frame);
        frame.device_mut().fail_images_above(100 * 100);

        let request = CaptureRequest::new(1920, 1080, 4, dir.path().join("0"));
        frame.request_capture(request);
        let err = frame.render().unwrap_err();
        assert!(matches!(err.root(), RenderError::ResourceCreation { .. }));

        frame.device_mut().clear_failures();
        frame.render().unwrap();
        let output = frame.root().output().unwrap();
        assert_eq!(
            frame.device().image_desc(output).unwrap().extent,
            Extent::d2(80, 60)
        );
        assert_eq!(frame.camera().width, 80);
    }

    #[test]
    fn capture_above_the_buffer_limit_aborts_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("8k");
        let mut frame = live(80, 60);
        settle(&mut frame);

        frame.request_capture(CaptureRequest::new(7680, 4320, 4, &path));
        let err = frame.render().unwrap_err();
        assert!(matches!(err, RenderError::Capture(_)));
        assert!(matches!(err.root(), RenderError::ResourceCreation { .. }));
        assert!(!path.exists());
        assert_eq!(frame.device().readbacks.len(), 0);

        frame.render().unwrap();
        let output = frame.root().output().unwrap();
        assert_eq!(
            frame.device().image_desc(output).unwrap().extent,
            Extent::d2(80, 60)
        );
        assert_eq!(frame.root().mode(), RenderMode::Interactive);
        assert_eq!(last_present(&frame).presented, Some(output));
    }

    #[test]
    fn capture_size_is_clamped_to_the_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0");
        let device = HeadlessDevice::new().with_limits(DeviceLimits {
            max_texture_dimension_2d: 256,
            ..DeviceLimits::default()
        });
        let mut frame = FrameController::new(device, testing::cache(), Box::new(demo)).unwrap();
        frame.init(Extent::d2(80, 60)).unwrap();

        frame.capture(&CaptureRequest::new(400, 100, 1, &path)).unwrap();
        assert_eq!(read_container(&path).unwrap().extent, Extent::d2(256, 100));
        assert_eq!(frame.camera().width, 80);
    }

    #[test]
    fn noise_generation_survives_a_failed_first_frame() {
        let mut frame = live(32, 32);
        frame.device_mut().fail_submissions(true);
        frame.update(0.016).unwrap();
        assert!(matches!(frame.render(), Err(RenderError::Surface(_))));
        assert_eq!(frame.device().submissions.len(), 0);

        frame.device_mut().clear_failures();
        frame.update(0.016).unwrap();
        frame.render().unwrap();
        let first = last_present(&frame);
        assert!(first.dispatches.contains(&[128, 128, 128]));
        assert!(first.dispatches.contains(&[32, 32, 32]));

        frame.update(0.016).unwrap();
        frame.render().unwrap();
        let second = last_present(&frame);
        assert!(!second.dispatches.contains(&[128, 128, 128]));
        assert!(!second.dispatches.contains(&[32, 32, 32]));
    }

    #[test]
    fn numeric_param_edits_keep_the_recording() {
        let mut frame = live(64, 48);
        settle(&mut frame);
        frame.update(0.016).unwrap();
        frame.render().unwrap();
        let generation = frame.recording_generation();

        let edited = frame
            .params_mut()
            .into_iter()
            .filter(|p| p.title() == "Clouds")
            .any(|p| set_param(p, "absorption", ParamValue::F32(0.25)));
        assert!(edited);
        assert!(!frame.needs_rerecord());

        frame.update(0.016).unwrap();
        frame.render().unwrap();
        assert_eq!(frame.recording_generation(), generation);
        assert_eq!(last_present(&frame).generations, vec![generation]);
    }

    #[test]
    fn readback_format_needs_a_live_image() {
        let mut frame = live(16, 16);
        frame.render().unwrap();
        let output = frame.root().output().unwrap();
        assert_eq!(frame.image_format(output).unwrap(), ImageFormat::Rgba8Unorm);

        frame.device_mut().destroy_image(output);
        assert!(matches!(
            frame.image_format(output),
            Err(RenderError::UnknownHandle { kind: "image", .. })
        ));
    }

    #[test]
    fn hot_reload_stales_the_recording() {
        let cache = testing::cache().with_hot_reload(HotReload::new());
        let mut frame = controller_with(cache);
        frame.init(Extent::d2(32, 32)).unwrap();
        settle(&mut frame);

        frame
            .cache
            .hot_reload_mut()
            .unwrap()
            .notify("`/shaders/shadow.comp");
        frame.update(0.016).unwrap();
        assert!(frame.needs_rerecord());
        assert_eq!(frame.device().pipeline_rebuilds, 1);
    }

    #[test]
    fn f1_toggles_overlay_compositing() {
        let mut frame = controller_with(testing::cache())
            .with_overlay(Box::new(TestOverlay::default()));
        frame.init(Extent::d2(32, 32)).unwrap();
        frame.render().unwrap();
        assert!(last_present(&frame).overlay.is_some());

        frame.on_input_event(Control::Key(KeyCode::F1), true);
        frame.on_input_event(Control::Key(KeyCode::F1), false);
        assert!(!frame.overlay_visible());
        frame.render().unwrap();
        assert_eq!(last_present(&frame).overlay, None);
    }

    #[test]
    fn overlay_consumed_keys_do_not_move_camera() {
        let overlay = TestOverlay {
            consume: true,
            ..Default::default()
        };
        let mut frame = controller_with(testing::cache()).with_overlay(Box::new(overlay));
        frame.init(Extent::d2(32, 32)).unwrap();
        let eye = frame.camera().eye;

        frame.on_input_event(Control::Key(KeyCode::KeyW), true);
        frame.update(0.5).unwrap();
        assert_eq!(frame.camera().eye, eye);
    }

    #[test]
    fn movement_keys_move_camera() {
        let mut frame = live(32, 32);
        let eye = frame.camera().eye;
        frame.on_input_event(Control::Key(KeyCode::KeyW), true);
        frame.update(0.5).unwrap();
        assert_ne!(frame.camera().eye, eye);
    }

    #[test]
    fn release_destroys_everything() {
        let mut frame = live(32, 32);
        frame.render().unwrap();
        assert!(frame.outputs.image(names::OUTPUT).is_some());
        let device = frame.release();
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.surface_extent(), None);
    }

    #[test]
    fn fps_windows_last_a_second() {
        let mut fps = FpsCounter::default();
        assert_eq!(fps.tick(0.5), None);
        assert_eq!(fps.tick(0.25), None);
        let rate = fps.tick(0.25).unwrap();
        assert!((rate - 3.0).abs() < 1e-5);
        assert_eq!(fps.fps(), Some(rate));
    }
}
