//! The windowed host application.
//!
//! Opens a window, creates a [`WgpuDevice`] for it and drives a
//! [`FrameController`] with the demo scene from the winit event loop.
//!
//! | Key          | Action                                |
//! |--------------|---------------------------------------|
//! | W/A/S/D, Q/E | Move the camera                       |
//! | Ctrl, Shift  | Double the movement speed (each)      |
//! | F1           | Toggle the overlay                    |
//! | F12          | Capture with the configured settings  |
//! | P            | Toggle the sun animation              |

use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::KeyCode;
use winit::window::{Window, WindowAttributes, WindowId};

use crate::cache::{FileShaderSource, ResourceCache};
use crate::config::AppConfig;
use crate::error::{RenderError, Result};
use crate::frame::FrameController;
use crate::gpu::{Extent, GpuDevice, WgpuDevice};
use crate::hot_reload::HotReload;
use crate::input::{Control, control_event};
use crate::scene::{DemoScene, Scene};

/// Opens a window and runs until it is closed.
pub fn run(config: AppConfig) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = RaylaneApp::Pending { config };
    let mut failure = None;
    event_loop.run_app(&mut AppHandler {
        app: &mut app,
        failure: &mut failure,
    })?;

    if let RaylaneApp::Running { frame, .. } = app {
        frame.release();
    }
    failure.map_or(Ok(()), Err)
}

enum RaylaneApp {
    Pending {
        config: AppConfig,
    },
    Running {
        window: Arc<Window>,
        frame: FrameController<WgpuDevice>,
        config: AppConfig,
        last_frame: Instant,
    },
    Exited,
}

struct AppHandler<'a> {
    app: &'a mut RaylaneApp,
    /// First fatal error, returned from [`run`].
    failure: &'a mut Option<RenderError>,
}

impl AppHandler<'_> {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: RenderError) {
        error!("{err}");
        if self.failure.is_none() {
            *self.failure = Some(err);
        }
        event_loop.exit();
    }
}

fn start(
    event_loop: &ActiveEventLoop,
    config: &AppConfig,
) -> Result<(Arc<Window>, FrameController<WgpuDevice>)> {
    let attrs = WindowAttributes::default()
        .with_title(&config.title)
        .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));
    let window = Arc::new(event_loop.create_window(attrs)?);
    let device = WgpuDevice::new(window.clone())?;

    let mut cache = ResourceCache::new(FileShaderSource::new(&config.shader_root));
    if config.hot_reload_polling {
        cache = cache.with_hot_reload(HotReload::polling());
    }
    let mut frame = FrameController::new(
        device,
        cache,
        Box::new(|device: &mut dyn GpuDevice, cache: &mut ResourceCache| {
            Ok(Box::new(DemoScene::new(device, cache)?) as Box<dyn Scene>)
        }),
    )?;

    let size = window.inner_size();
    frame.init(Extent::d2(size.width.max(1), size.height.max(1)))?;
    window.request_redraw();
    Ok((window, frame))
}

impl ApplicationHandler for AppHandler<'_> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let RaylaneApp::Pending { config } = &*self.app else {
            return;
        };
        let config = config.clone();
        match start(event_loop, &config) {
            Ok((window, frame)) => {
                info!("Window '{}' ready", config.title);
                *self.app = RaylaneApp::Running {
                    window,
                    frame,
                    config,
                    last_frame: Instant::now(),
                };
            }
            Err(err) => {
                *self.app = RaylaneApp::Exited;
                self.fail(event_loop, err);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let RaylaneApp::Running {
            window,
            frame,
            config,
            last_frame,
        } = &mut *self.app
        else {
            return;
        };

        if let Some((control, active)) = control_event(&event) {
            if control == Control::Key(KeyCode::F12) && !active {
                frame.request_capture(config.capture.request());
            } else {
                frame.on_input_event(control, active);
            }
            return;
        }

        let result = match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
                Ok(())
            }
            WindowEvent::Resized(size) => {
                frame.resize(Extent::d2(size.width.max(1), size.height.max(1)))
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = now.duration_since(*last_frame).as_secs_f32();
                *last_frame = now;

                let result = frame.update(dt).and_then(|()| frame.render());
                window.request_redraw();
                match result {
                    // A failed capture already restored the live state.
                    Err(RenderError::Capture(err)) => {
                        warn!("Capture failed: {err}");
                        Ok(())
                    }
                    Err(RenderError::Surface(err)) => {
                        warn!("Dropped frame: {err}");
                        Ok(())
                    }
                    other => other,
                }
            }
            _ => Ok(()),
        };

        if let Err(err) = result {
            self.fail(event_loop, err);
        }
    }
}
